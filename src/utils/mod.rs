pub mod error;
pub mod image;
pub mod latch;
pub mod logger;
pub mod options;
pub mod source;
pub(crate) mod traits;
pub mod writer;
