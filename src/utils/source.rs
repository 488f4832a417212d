//! Byte sources the decoder reads from.
//!
//! A source is a factory for readers: the decoder opens one reader for the
//! sequential chunk scan and, when frame data is not loaded into memory,
//! another one to fetch frame spans on demand. `reset` opens a fresh reader.

use parking_lot::{Condvar, Mutex};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait ByteSource: Send + Sync {
    type Reader: Read + Seek + Send;

    /// Opens a reader positioned at the first byte of the stream.
    fn open(&self) -> io::Result<Self::Reader>;
}

/// In-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    type Reader = Cursor<Arc<[u8]>>;

    fn open(&self) -> io::Result<Self::Reader> {
        Ok(Cursor::new(self.data.clone()))
    }
}

/// File on disk, reopened for every reader.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    type Reader = BufReader<File>;

    fn open(&self) -> io::Result<Self::Reader> {
        Ok(BufReader::new(File::open(&self.path)?))
    }
}

#[derive(Debug, Default)]
struct StreamBuffer {
    data: Vec<u8>,
    finished: bool,
}

#[derive(Debug, Default)]
struct StreamShared {
    buffer: Mutex<StreamBuffer>,
    grown: Condvar,
}

/// Bytes arriving over time, e.g. from a network download.
///
/// Readers block until the requested bytes have been pushed through the
/// matching [`StreamFeeder`] or the feed is finished. Received bytes are kept,
/// so the stream can be re-read from the start.
#[derive(Debug, Clone, Default)]
pub struct StreamSource {
    shared: Arc<StreamShared>,
}

/// Producer half of a [`StreamSource`].
#[derive(Debug, Clone)]
pub struct StreamFeeder {
    shared: Arc<StreamShared>,
}

impl StreamSource {
    pub fn new() -> (StreamSource, StreamFeeder) {
        let shared = Arc::new(StreamShared::default());
        let feeder = StreamFeeder { shared: shared.clone() };

        (StreamSource { shared }, feeder)
    }

    pub fn received(&self) -> usize {
        self.shared.buffer.lock().data.len()
    }
}

impl StreamFeeder {
    pub fn push(&self, bytes: &[u8]) {
        let mut buffer = self.shared.buffer.lock();
        if buffer.finished {
            log::warn!("Ignoring {} bytes pushed after the stream finished", bytes.len());
            return;
        }

        buffer.data.extend_from_slice(bytes);
        self.shared.grown.notify_all();
    }

    pub fn finish(&self) {
        let mut buffer = self.shared.buffer.lock();
        buffer.finished = true;
        self.shared.grown.notify_all();
    }
}

impl ByteSource for StreamSource {
    type Reader = StreamReader;

    fn open(&self) -> io::Result<Self::Reader> {
        Ok(StreamReader { shared: self.shared.clone(), position: 0 })
    }
}

#[derive(Debug)]
pub struct StreamReader {
    shared: Arc<StreamShared>,
    position: u64,
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut buffer = self.shared.buffer.lock();
        loop {
            let available = (buffer.data.len() as u64).saturating_sub(self.position);
            if available > 0 {
                let start = self.position as usize;
                let count = (available as usize).min(buf.len());
                buf[..count].copy_from_slice(&buffer.data[start..start + count]);
                self.position += count as u64;

                return Ok(count);
            }

            if buffer.finished {
                return Ok(0);
            }

            self.shared.grown.wait(&mut buffer);
        }
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let buffer = self.shared.buffer.lock();
                if !buffer.finished {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "cannot seek from the end of an unfinished stream",
                    ));
                }
                (buffer.data.len() as u64).checked_add_signed(delta)
            }
        };

        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")),
        }
    }
}
