pub mod apng;
pub mod chunk;
pub mod container;
pub mod frame;
