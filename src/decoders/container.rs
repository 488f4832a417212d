use crate::decoders::chunk::{Chunk, ChunkType};
use crate::utils::error::{ApngError, ApngResult};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on the frame count an acTL may declare. Frame slots are
/// allocated up front from this number.
pub const MAX_FRAMES: u32 = 1 << 20;

const MAX_DIMENSION: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorType {
    Grayscale = 0,
    Rgb = 2,
    Indexed = 3,
    GrayscaleAlpha = 4,
    Rgba = 6,
}

impl ColorType {
    pub fn channels(&self) -> usize {
        match self {
            ColorType::Grayscale | ColorType::Indexed => 1,
            ColorType::GrayscaleAlpha => 2,
            ColorType::Rgb => 3,
            ColorType::Rgba => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: ColorType,
    pub interlaced: bool,
}

impl ImageHeader {
    fn parse(data: &[u8]) -> ApngResult<ImageHeader> {
        if data.len() != 13 {
            return Err(ApngError::InvalidHeader(format!("length {}, expected 13", data.len())));
        }

        let width = read_u32(data, 0);
        let height = read_u32(data, 4);
        let bit_depth = data[8];
        let compression_method = data[10];
        let filter_method = data[11];

        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ApngError::InvalidHeader(format!("dimensions {}x{}", width, height)));
        }

        let color_type = match data[9] {
            0 => ColorType::Grayscale,
            2 => ColorType::Rgb,
            3 => ColorType::Indexed,
            4 => ColorType::GrayscaleAlpha,
            6 => ColorType::Rgba,
            other => return Err(ApngError::InvalidHeader(format!("color type {}", other))),
        };

        let depth_allowed = match color_type {
            ColorType::Grayscale => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
            ColorType::Indexed => matches!(bit_depth, 1 | 2 | 4 | 8),
            ColorType::Rgb | ColorType::GrayscaleAlpha | ColorType::Rgba => matches!(bit_depth, 8 | 16),
        };

        if !depth_allowed {
            return Err(ApngError::InvalidHeader(format!(
                "bit depth {} for color type {:?}",
                bit_depth, color_type
            )));
        }

        if compression_method != 0 {
            return Err(ApngError::InvalidHeader(format!("compression method {}", compression_method)));
        }

        if filter_method != 0 {
            return Err(ApngError::InvalidHeader(format!("filter method {}", filter_method)));
        }

        let interlaced = match data[12] {
            0 => false,
            1 => true,
            other => return Err(ApngError::InvalidHeader(format!("interlace method {}", other))),
        };

        Ok(ImageHeader {
            width,
            height,
            bit_depth,
            color_type,
            interlaced,
        })
    }

    pub fn bits_per_pixel(&self) -> usize {
        self.color_type.channels() * self.bit_depth as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Infinite,
    Finite(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationControl {
    pub num_frames: u32,
    pub num_plays: u32,
}

impl AnimationControl {
    pub fn loop_count(&self) -> LoopCount {
        match self.num_plays {
            0 => LoopCount::Infinite,
            n => LoopCount::Finite(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeOp {
    None,
    Background,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    Source,
    Over,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    pub sequence_number: u32,
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub delay_num: u16,
    pub delay_den: u16,
    pub dispose_op: DisposeOp,
    pub blend_op: BlendOp,
}

impl FrameControl {
    fn parse(data: &[u8], header: &ImageHeader) -> ApngResult<FrameControl> {
        if data.len() != 26 {
            return Err(ApngError::InvalidFrameControl(format!("length {}, expected 26", data.len())));
        }

        let dispose_op = match data[24] {
            0 => DisposeOp::None,
            1 => DisposeOp::Background,
            2 => DisposeOp::Previous,
            other => return Err(ApngError::InvalidFrameControl(format!("dispose_op {}", other))),
        };

        let blend_op = match data[25] {
            0 => BlendOp::Source,
            1 => BlendOp::Over,
            other => return Err(ApngError::InvalidFrameControl(format!("blend_op {}", other))),
        };

        let fctl = FrameControl {
            sequence_number: read_u32(data, 0),
            width: read_u32(data, 4),
            height: read_u32(data, 8),
            x_offset: read_u32(data, 12),
            y_offset: read_u32(data, 16),
            delay_num: u16::from_be_bytes([data[20], data[21]]),
            delay_den: u16::from_be_bytes([data[22], data[23]]),
            dispose_op,
            blend_op,
        };

        // Never clamped: a rectangle outside the canvas is corrupt data
        let fits_x = fctl.x_offset.checked_add(fctl.width).is_some_and(|right| right <= header.width);
        let fits_y = fctl.y_offset.checked_add(fctl.height).is_some_and(|bottom| bottom <= header.height);

        if fctl.width == 0 || fctl.height == 0 || !fits_x || !fits_y {
            return Err(fctl.rect_error());
        }

        Ok(fctl)
    }

    fn rect_error(&self) -> ApngError {
        ApngError::InvalidFrameRect {
            width: self.width,
            height: self.height,
            x_offset: self.x_offset,
            y_offset: self.y_offset,
        }
    }

    /// A zero denominator means hundredths of a second.
    pub fn delay(&self) -> Duration {
        let den = if self.delay_den == 0 { 100 } else { self.delay_den as u64 };

        Duration::from_nanos(self.delay_num as u64 * 1_000_000_000 / den)
    }

    pub fn covers(&self, header: &ImageHeader) -> bool {
        self.x_offset == 0 && self.y_offset == 0 && self.width == header.width && self.height == header.height
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transparency {
    Grayscale(u16),
    Rgb(u16, u16, u16),
    Palette(Vec<u8>),
}

/// Everything a frame decoder needs besides the frame itself.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub header: ImageHeader,
    pub animation: AnimationControl,
    pub palette: Option<Arc<[[u8; 3]]>>,
    pub transparency: Option<Transparency>,
}

/// Location of compressed bytes in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: u64,
    pub len: u32,
}

#[derive(Debug, Clone)]
pub enum FrameData {
    /// Positions in the source, read back when the frame is decoded.
    Spans(Vec<Span>),
    /// Compressed bytes copied during the first pass.
    Loaded(Arc<[u8]>),
}

impl FrameData {
    pub fn compressed_len(&self) -> u64 {
        match self {
            FrameData::Spans(spans) => spans.iter().map(|span| span.len as u64).sum(),
            FrameData::Loaded(bytes) => bytes.len() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub index: usize,
    pub control: FrameControl,
    pub data: FrameData,
}

#[derive(Debug)]
pub enum ParseEvent {
    /// Header and animation control are known and frame data begins.
    Ready(ContainerInfo),
    /// Image data arrived before any acTL.
    NotAnimated(ImageHeader),
    /// A frame's metadata and data location are complete.
    Frame(FrameRecord),
    /// The IDAT image that is not part of the animation.
    DefaultImage(FrameData),
    End,
}

pub type ParseEvents = SmallVec<[ParseEvent; 2]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ExpectHeader,
    BeforeImageData,
    /// Hidden default image: IDAT seen, no fcTL yet.
    DefaultImage,
    /// Inside frame `n` (its fcTL has been read).
    InFrame,
    /// Between a closed hidden default image and the next fcTL.
    BetweenFrames,
    Done,
}

/// Data accumulated for the frame or default image currently open.
#[derive(Debug)]
struct OpenData {
    spans: Vec<Span>,
    bytes: Vec<u8>,
}

impl OpenData {
    fn new() -> Self {
        Self { spans: Vec::new(), bytes: Vec::new() }
    }

    fn push(&mut self, offset: u64, data: &[u8], load: bool) {
        if data.is_empty() {
            return;
        }

        if load {
            self.bytes.extend_from_slice(data);
        } else {
            self.spans.push(Span { offset, len: data.len() as u32 });
        }
    }

    fn close(self, load: bool) -> FrameData {
        if load {
            FrameData::Loaded(self.bytes.into())
        } else {
            FrameData::Spans(self.spans)
        }
    }
}

/// Turns a chunk sequence into header, animation and per-frame records.
pub struct ContainerParser {
    load_data: bool,
    phase: Phase,
    header: Option<ImageHeader>,
    animation: Option<AnimationControl>,
    palette: Option<Arc<[[u8; 3]]>>,
    transparency: Option<Transparency>,
    next_sequence: u32,
    frames_opened: u32,
    current: Option<(FrameControl, OpenData)>,
    default_image: Option<OpenData>,
    hidden_default: bool,
}

impl ContainerParser {
    pub fn new(load_data: bool) -> Self {
        Self {
            load_data,
            phase: Phase::ExpectHeader,
            header: None,
            animation: None,
            palette: None,
            transparency: None,
            next_sequence: 0,
            frames_opened: 0,
            current: None,
            default_image: None,
            hidden_default: false,
        }
    }

    pub fn has_header(&self) -> bool {
        self.phase != Phase::ExpectHeader
    }

    pub fn push(&mut self, chunk: &Chunk) -> ApngResult<ParseEvents> {
        match self.phase {
            Phase::ExpectHeader => {
                if chunk.kind != ChunkType::IHDR {
                    return Err(ApngError::MissingHeader { found: chunk.kind.to_string() });
                }

                let header = ImageHeader::parse(chunk.data)?;
                log::debug!("IHDR: {:?}", header);
                self.header = Some(header);
                self.phase = Phase::BeforeImageData;

                Ok(SmallVec::new())
            }
            Phase::BeforeImageData => self.push_before_image_data(chunk),
            Phase::DefaultImage | Phase::InFrame | Phase::BetweenFrames => self.push_animation(chunk),
            Phase::Done => Ok(SmallVec::new()),
        }
    }

    /// Closes whatever is open once the stream has ended.
    pub fn finish(&mut self) -> ApngResult<ParseEvents> {
        let mut events = ParseEvents::new();

        match self.phase {
            Phase::ExpectHeader => {
                return Err(ApngError::MissingHeader { found: "end of stream".to_string() });
            }
            Phase::BeforeImageData => {
                if self.animation.is_none() {
                    let header = self.require_header()?;
                    self.phase = Phase::Done;
                    return Ok(smallvec![ParseEvent::NotAnimated(header)]);
                }

                log::warn!("Stream ended before any image data");
                events.push(ParseEvent::Ready(self.container_info()?));
            }
            Phase::DefaultImage | Phase::InFrame | Phase::BetweenFrames => self.close_open(&mut events),
            Phase::Done => return Ok(events),
        }

        self.phase = Phase::Done;
        events.push(ParseEvent::End);

        Ok(events)
    }

    fn push_before_image_data(&mut self, chunk: &Chunk) -> ApngResult<ParseEvents> {
        match chunk.kind {
            ChunkType::PLTE => self.read_plte(chunk.data)?,
            ChunkType::TRNS => self.read_trns(chunk.data)?,
            ChunkType::ACTL => self.read_actl(chunk.data)?,
            ChunkType::IDAT => {
                if self.animation.is_none() {
                    let header = self.require_header()?;
                    self.phase = Phase::Done;
                    return Ok(smallvec![ParseEvent::NotAnimated(header)]);
                }

                self.check_palette()?;
                self.hidden_default = true;

                let mut default_image = OpenData::new();
                default_image.push(chunk.offset, chunk.data, self.load_data);
                self.default_image = Some(default_image);
                self.phase = Phase::DefaultImage;

                return Ok(smallvec![ParseEvent::Ready(self.container_info()?)]);
            }
            ChunkType::FCTL => {
                if self.animation.is_none() {
                    log::warn!("fcTL before acTL, ignoring");
                    return Ok(SmallVec::new());
                }

                self.check_palette()?;
                let info = self.container_info()?;
                let control = self.read_fctl(chunk.data)?;

                // fcTL ahead of IDAT makes the default image frame 0
                if !control.covers(&info.header) {
                    return Err(control.rect_error());
                }

                self.open_frame(control);

                return Ok(smallvec![ParseEvent::Ready(info)]);
            }
            ChunkType::FDAT => {
                return Err(ApngError::MisplacedChunk("fdAT before any fcTL".to_string()));
            }
            ChunkType::IEND => return self.finish(),
            other => Self::skip(&other),
        }

        Ok(SmallVec::new())
    }

    fn push_animation(&mut self, chunk: &Chunk) -> ApngResult<ParseEvents> {
        let mut events = ParseEvents::new();

        match chunk.kind {
            ChunkType::IDAT => match self.phase {
                Phase::DefaultImage => {
                    if let Some(default_image) = self.default_image.as_mut() {
                        default_image.push(chunk.offset, chunk.data, self.load_data);
                    }
                }
                Phase::InFrame if self.takes_idat() => {
                    if let Some((_, data)) = self.current.as_mut() {
                        data.push(chunk.offset, chunk.data, self.load_data);
                    }
                }
                _ => {
                    return Err(ApngError::MisplacedChunk("IDAT after animation frames began".to_string()));
                }
            },
            ChunkType::FDAT => {
                if chunk.data.len() < 4 {
                    return Err(ApngError::MisplacedChunk("fdAT shorter than its sequence number".to_string()));
                }

                self.check_sequence(read_u32(chunk.data, 0))?;

                match self.current.as_mut() {
                    Some((_, data)) if self.phase == Phase::InFrame => {
                        data.push(chunk.offset + 4, &chunk.data[4..], self.load_data);
                    }
                    _ => return Err(ApngError::MisplacedChunk("fdAT before any fcTL".to_string())),
                }
            }
            ChunkType::FCTL => {
                let declared = self.declared_frames();
                if self.frames_opened >= declared {
                    return Err(ApngError::FrameCountMismatch { declared, found: self.frames_opened + 1 });
                }

                self.close_open(&mut events);
                let control = self.read_fctl(chunk.data)?;
                self.open_frame(control);
            }
            ChunkType::IEND => {
                events.extend(self.finish()?);
            }
            ChunkType::ACTL => log::warn!("Duplicate or late acTL ignored"),
            ChunkType::PLTE | ChunkType::TRNS => {
                return Err(ApngError::MisplacedChunk(format!("{} after image data", chunk.kind)));
            }
            other => {
                Self::skip(&other);

                // Nothing can follow the last declared frame's data
                if self.phase == Phase::InFrame && self.frames_opened == self.declared_frames() {
                    events.extend(self.finish()?);
                }
            }
        }

        Ok(events)
    }

    // IDAT belongs to frame 0 only when its fcTL preceded the image data,
    // and only until an fdAT has been seen
    fn takes_idat(&self) -> bool {
        self.frames_opened == 1 && !self.hidden_default && self.next_sequence == 1
    }

    fn declared_frames(&self) -> u32 {
        self.animation.map(|actl| actl.num_frames).unwrap_or(0)
    }

    fn open_frame(&mut self, control: FrameControl) {
        self.frames_opened += 1;
        self.current = Some((control, OpenData::new()));
        self.phase = Phase::InFrame;
    }

    fn close_open(&mut self, events: &mut ParseEvents) {
        if let Some(default_image) = self.default_image.take() {
            events.push(ParseEvent::DefaultImage(default_image.close(self.load_data)));
            self.phase = Phase::BetweenFrames;
        }

        if let Some((control, data)) = self.current.take() {
            let record = FrameRecord {
                index: self.frames_opened as usize - 1,
                control,
                data: data.close(self.load_data),
            };

            log::debug!(
                "Frame {} resolved: {}x{} at ({}, {}), {} compressed bytes",
                record.index,
                control.width,
                control.height,
                control.x_offset,
                control.y_offset,
                record.data.compressed_len()
            );

            events.push(ParseEvent::Frame(record));
            self.phase = Phase::BetweenFrames;
        }
    }

    fn check_sequence(&mut self, found: u32) -> ApngResult<()> {
        if found != self.next_sequence {
            return Err(ApngError::SequenceOrderError { expected: self.next_sequence, found });
        }

        self.next_sequence = self.next_sequence.wrapping_add(1);

        Ok(())
    }

    fn require_header(&self) -> ApngResult<ImageHeader> {
        self.header.ok_or_else(|| ApngError::MissingHeader { found: "nothing".to_string() })
    }

    fn container_info(&self) -> ApngResult<ContainerInfo> {
        let animation = self
            .animation
            .ok_or_else(|| ApngError::InvalidAnimationControl("missing".to_string()))?;

        Ok(ContainerInfo {
            header: self.require_header()?,
            animation,
            palette: self.palette.clone(),
            transparency: self.transparency.clone(),
        })
    }

    fn check_palette(&self) -> ApngResult<()> {
        let header = self.require_header()?;
        if header.color_type == ColorType::Indexed && self.palette.is_none() {
            return Err(ApngError::MisplacedChunk("image data before PLTE in an indexed image".to_string()));
        }

        Ok(())
    }

    fn read_plte(&mut self, data: &[u8]) -> ApngResult<()> {
        if data.is_empty() || data.len() % 3 != 0 || data.len() > 256 * 3 {
            return Err(ApngError::MisplacedChunk(format!("PLTE with length {}", data.len())));
        }

        let palette: Vec<[u8; 3]> = data.chunks_exact(3).map(|rgb| [rgb[0], rgb[1], rgb[2]]).collect();
        self.palette = Some(palette.into());

        Ok(())
    }

    fn read_trns(&mut self, data: &[u8]) -> ApngResult<()> {
        let header = self.require_header()?;

        let transparency = match header.color_type {
            ColorType::Grayscale if data.len() >= 2 => Transparency::Grayscale(u16::from_be_bytes([data[0], data[1]])),
            ColorType::Rgb if data.len() >= 6 => Transparency::Rgb(
                u16::from_be_bytes([data[0], data[1]]),
                u16::from_be_bytes([data[2], data[3]]),
                u16::from_be_bytes([data[4], data[5]]),
            ),
            ColorType::Indexed => {
                if self.palette.is_none() {
                    return Err(ApngError::MisplacedChunk("tRNS before PLTE".to_string()));
                }
                Transparency::Palette(data.to_vec())
            }
            _ => {
                log::warn!("Ignoring tRNS of {} bytes for color type {:?}", data.len(), header.color_type);
                return Ok(());
            }
        };

        self.transparency = Some(transparency);

        Ok(())
    }

    fn read_actl(&mut self, data: &[u8]) -> ApngResult<()> {
        if self.animation.is_some() {
            log::warn!("Duplicate acTL ignored");
            return Ok(());
        }

        if data.len() != 8 {
            return Err(ApngError::InvalidAnimationControl(format!("length {}, expected 8", data.len())));
        }

        let actl = AnimationControl {
            num_frames: read_u32(data, 0),
            num_plays: read_u32(data, 4),
        };

        if actl.num_frames == 0 {
            // Nothing to animate; handled like a plain PNG
            log::warn!("acTL with zero frames, treating image as not animated");
            return Ok(());
        }

        if actl.num_frames > MAX_FRAMES {
            return Err(ApngError::InvalidAnimationControl(format!(
                "{} frames exceeds the limit of {}",
                actl.num_frames, MAX_FRAMES
            )));
        }

        log::debug!("acTL: {} frames, {} plays", actl.num_frames, actl.num_plays);
        self.animation = Some(actl);

        Ok(())
    }

    fn read_fctl(&mut self, data: &[u8]) -> ApngResult<FrameControl> {
        if data.len() < 4 {
            return Err(ApngError::InvalidFrameControl(format!("length {}, expected 26", data.len())));
        }

        self.check_sequence(read_u32(data, 0))?;

        let header = self.require_header()?;
        FrameControl::parse(data, &header)
    }

    fn skip(kind: &ChunkType) {
        if kind.is_critical() {
            log::warn!("Unknown critical chunk {} ignored", kind);
        } else {
            log::debug!("Skipping ancillary chunk {}", kind);
        }
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
