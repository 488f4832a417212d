mod decoders;
mod utils;

pub use decoders::apng::{ApngDecoder, DecodeState, FirstPassSummary, Opened, Progress};
pub use decoders::chunk::{chunk_crc, Chunk, ChunkReader, ChunkType, PNG_SIGNATURE};
pub use decoders::container::{
    AnimationControl, BlendOp, ColorType, DisposeOp, FrameControl, ImageHeader, LoopCount, Transparency,
};
pub use utils::error::{ApngError, ApngResult, ErrorKind};
pub use utils::image::ImageFrame;
pub use utils::logger::Logger;
pub use utils::options::DecodingOptions;
pub use utils::source::{ByteSource, FileSource, MemorySource, StreamFeeder, StreamReader, StreamSource};
pub use utils::writer::Writer;

use std::path::Path;

impl ApngDecoder<FileSource> {
    /// Opens the file at `path` with the given options.
    pub fn open_path<P: AsRef<Path>>(path: P, options: DecodingOptions) -> ApngResult<Opened<FileSource>> {
        ApngDecoder::open(FileSource::new(path), options)
    }
}

impl ApngDecoder<MemorySource> {
    pub fn from_bytes(data: impl Into<std::sync::Arc<[u8]>>, options: DecodingOptions) -> ApngResult<Opened<MemorySource>> {
        ApngDecoder::open(MemorySource::new(data), options)
    }
}
