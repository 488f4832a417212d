use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bytes that cannot be a PNG stream: bad signature, lengths, checksums.
    Structural,
    /// Well-formed chunks that break APNG rules.
    Semantic,
    /// Valid PNG without animation control. Route to a static decoder.
    NotAnimated,
    /// A single frame could not be produced.
    Frame,
    /// The session is resetting or faulted.
    Session,
}

#[derive(Debug)]
pub enum ApngError {
    IoError(io::Error),
    MalformedSignature,
    TruncatedChunk { chunk: String, needed: u64 },
    ChunkTooLarge { chunk: String, length: u32 },
    ChunkIntegrityError { chunk: String, expected: u32, calculated: u32 },
    MissingHeader { found: String },
    InvalidHeader(String),
    InvalidAnimationControl(String),
    InvalidFrameControl(String),
    SequenceOrderError { expected: u32, found: u32 },
    FrameCountMismatch { declared: u32, found: u32 },
    InvalidFrameRect { width: u32, height: u32, x_offset: u32, y_offset: u32 },
    MisplacedChunk(String),
    NotAnimated,
    FrameDecodeError { index: usize, reason: String },
    IncompleteAnimation { requested: usize, available: usize },
    FrameOutOfRange { requested: usize, declared: usize },
    SessionResetting,
    Faulted(String),
}

impl ApngError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApngError::IoError(_)
            | ApngError::MalformedSignature
            | ApngError::TruncatedChunk { .. }
            | ApngError::ChunkTooLarge { .. }
            | ApngError::ChunkIntegrityError { .. } => ErrorKind::Structural,
            ApngError::MissingHeader { .. }
            | ApngError::InvalidHeader(_)
            | ApngError::InvalidAnimationControl(_)
            | ApngError::InvalidFrameControl(_)
            | ApngError::SequenceOrderError { .. }
            | ApngError::FrameCountMismatch { .. }
            | ApngError::InvalidFrameRect { .. }
            | ApngError::MisplacedChunk(_) => ErrorKind::Semantic,
            ApngError::NotAnimated => ErrorKind::NotAnimated,
            ApngError::FrameDecodeError { .. }
            | ApngError::IncompleteAnimation { .. }
            | ApngError::FrameOutOfRange { .. } => ErrorKind::Frame,
            ApngError::SessionResetting | ApngError::Faulted(_) => ErrorKind::Session,
        }
    }

    pub fn is_not_animated(&self) -> bool {
        matches!(self, ApngError::NotAnimated)
    }
}

impl Error for ApngError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ApngError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for ApngError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ApngError::IoError(err) => write!(f, "I/O error: {}", err),
            ApngError::MalformedSignature => write!(f, "Missing PNG signature"),
            ApngError::TruncatedChunk { chunk, needed } => {
                write!(f, "Chunk {} truncated, {} more bytes needed", chunk, needed)
            }
            ApngError::ChunkTooLarge { chunk, length } => {
                write!(f, "Chunk {} declares length {} which exceeds 2^31-1", chunk, length)
            }
            ApngError::ChunkIntegrityError { chunk, expected, calculated } => write!(
                f,
                "CRC mismatch for chunk {}: expected 0x{:08x}, calculated 0x{:08x}",
                chunk, expected, calculated
            ),
            ApngError::MissingHeader { found } => write!(f, "Expected IHDR as first chunk, found {}", found),
            ApngError::InvalidHeader(msg) => write!(f, "Invalid IHDR: {}", msg),
            ApngError::InvalidAnimationControl(msg) => write!(f, "Invalid acTL: {}", msg),
            ApngError::InvalidFrameControl(msg) => write!(f, "Invalid fcTL: {}", msg),
            ApngError::SequenceOrderError { expected, found } => {
                write!(f, "Sequence number out of order: expected {}, found {}", expected, found)
            }
            ApngError::FrameCountMismatch { declared, found } => {
                write!(f, "acTL declares {} frames, found at least {}", declared, found)
            }
            ApngError::InvalidFrameRect { width, height, x_offset, y_offset } => write!(
                f,
                "Frame rectangle {}x{} at ({}, {}) does not fit the canvas",
                width, height, x_offset, y_offset
            ),
            ApngError::MisplacedChunk(msg) => write!(f, "Misplaced chunk: {}", msg),
            ApngError::NotAnimated => write!(f, "Image has no animation control chunk"),
            ApngError::FrameDecodeError { index, reason } => {
                write!(f, "Failed to decode frame {}: {}", index, reason)
            }
            ApngError::IncompleteAnimation { requested, available } => write!(
                f,
                "Frame {} requested but the stream only contains {} frames",
                requested, available
            ),
            ApngError::FrameOutOfRange { requested, declared } => {
                write!(f, "Frame {} out of range, animation has {} frames", requested, declared)
            }
            ApngError::SessionResetting => write!(f, "Decode session is resetting"),
            ApngError::Faulted(msg) => write!(f, "Decode session faulted: {}", msg),
        }
    }
}

impl From<io::Error> for ApngError {
    fn from(error: io::Error) -> Self {
        ApngError::IoError(error)
    }
}

// Result type alias for decoder operations
pub type ApngResult<T> = Result<T, ApngError>;
