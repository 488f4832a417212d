use crate::utils::error::{ApngError, ApngResult};
use std::fmt::{self, Debug, Display, Formatter};
use std::io::{self, Read};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

// PNG limits chunk lengths to 2^31 - 1
const MAX_CHUNK_LENGTH: u32 = 0x7FFF_FFFF;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    // Critical chunks
    pub const IHDR: ChunkType = ChunkType(*b"IHDR");
    pub const PLTE: ChunkType = ChunkType(*b"PLTE");
    pub const IDAT: ChunkType = ChunkType(*b"IDAT");
    pub const IEND: ChunkType = ChunkType(*b"IEND");

    // Ancillary chunks the decoder reads
    pub const TRNS: ChunkType = ChunkType(*b"tRNS");

    // Animation chunks
    pub const ACTL: ChunkType = ChunkType(*b"acTL");
    pub const FCTL: ChunkType = ChunkType(*b"fcTL");
    pub const FDAT: ChunkType = ChunkType(*b"fdAT");

    /// Bit 5 of the first byte is clear for critical chunks.
    pub fn is_critical(&self) -> bool {
        self.0[0] & 0x20 == 0
    }

    pub fn is_animation(&self) -> bool {
        matches!(*self, ChunkType::ACTL | ChunkType::FCTL | ChunkType::FDAT)
    }

    /// Chunks whose corruption always aborts the pass. The animation chunks
    /// are ancillary by name, but frame layout depends on them.
    pub fn requires_integrity(&self) -> bool {
        self.is_critical() || self.is_animation()
    }
}

impl Display for ChunkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Debug for ChunkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkType({})", self)
    }
}

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            if c & 1 == 1 {
                c = 0xedb88320u32 ^ (c >> 1);
            } else {
                c >>= 1;
            }
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

fn update_crc(crc: u32, buf: &[u8]) -> u32 {
    let mut c = crc;
    for &b in buf {
        c = CRC_TABLE[((c ^ u32::from(b)) & 0xff) as usize] ^ (c >> 8);
    }
    c
}

/// CRC-32 of a chunk's type and payload, as stored after the payload.
pub fn chunk_crc(kind: &ChunkType, data: &[u8]) -> u32 {
    update_crc(update_crc(0xffffffff, &kind.0), data) ^ 0xffffffff
}

/// A chunk whose payload borrows the reader's buffer.
#[derive(Debug)]
pub struct Chunk<'a> {
    pub kind: ChunkType,
    /// Absolute stream position of the first payload byte.
    pub offset: u64,
    pub data: &'a [u8],
    pub crc: u32,
}

impl Chunk<'_> {
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Pulls validated chunks out of a PNG byte stream, one at a time.
pub struct ChunkReader<R: Read> {
    reader: R,
    position: u64,
    signature_checked: bool,
    finished: bool,
    buffer: Vec<u8>,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
            signature_checked: false,
            finished: false,
            buffer: Vec::new(),
        }
    }

    /// Re-targets the reader at the start of a freshly opened stream. The
    /// signature is checked again on the next call to [`ChunkReader::next`].
    pub fn reset(&mut self, reader: R) {
        self.reader = reader;
        self.position = 0;
        self.signature_checked = false;
        self.finished = false;
        self.buffer.clear();
    }

    /// Bytes consumed from the stream so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns the next chunk, or `None` once the stream ends on a chunk
    /// boundary. Ancillary chunks with a bad CRC are logged and skipped.
    pub fn next(&mut self) -> ApngResult<Option<Chunk<'_>>> {
        if self.finished {
            return Ok(None);
        }

        if !self.signature_checked {
            self.read_signature()?;
        }

        loop {
            let mut header = [0u8; 8];
            let read = self.fill(&mut header)?;
            if read == 0 {
                self.finished = true;
                return Ok(None);
            }

            let kind = ChunkType([header[4], header[5], header[6], header[7]]);
            if read < header.len() {
                return Err(ApngError::TruncatedChunk {
                    chunk: kind.to_string(),
                    needed: (header.len() - read) as u64,
                });
            }

            let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            if length > MAX_CHUNK_LENGTH {
                return Err(ApngError::ChunkTooLarge { chunk: kind.to_string(), length });
            }

            let offset = self.position;
            self.read_payload(&kind, length as usize)?;

            let mut crc_bytes = [0u8; 4];
            let read = self.fill(&mut crc_bytes)?;
            if read < crc_bytes.len() {
                return Err(ApngError::TruncatedChunk {
                    chunk: kind.to_string(),
                    needed: (crc_bytes.len() - read) as u64,
                });
            }

            let expected = u32::from_be_bytes(crc_bytes);
            let calculated = chunk_crc(&kind, &self.buffer);

            if calculated != expected {
                if kind.requires_integrity() {
                    return Err(ApngError::ChunkIntegrityError { chunk: kind.to_string(), expected, calculated });
                }

                log::warn!(
                    "CRC mismatch for ancillary chunk {}: expected 0x{:08x}, calculated 0x{:08x}, skipping",
                    kind,
                    expected,
                    calculated
                );
                continue;
            }

            log::debug!("Chunk {} at {} ({} bytes)", kind, offset, length);

            return Ok(Some(Chunk {
                kind,
                offset,
                data: &self.buffer,
                crc: expected,
            }));
        }
    }

    fn read_signature(&mut self) -> ApngResult<()> {
        let mut signature = [0u8; 8];
        let read = self.fill(&mut signature)?;

        if read < signature.len() || signature != PNG_SIGNATURE {
            return Err(ApngError::MalformedSignature);
        }

        self.signature_checked = true;

        Ok(())
    }

    fn read_payload(&mut self, kind: &ChunkType, length: usize) -> ApngResult<()> {
        self.buffer.clear();

        let read = (&mut self.reader).take(length as u64).read_to_end(&mut self.buffer)?;
        self.position += read as u64;

        if read < length {
            return Err(ApngError::TruncatedChunk {
                chunk: kind.to_string(),
                needed: (length - read) as u64,
            });
        }

        Ok(())
    }

    /// Reads until `buf` is full or the stream ends; returns bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.reader.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.position += total as u64;

        Ok(total)
    }
}
