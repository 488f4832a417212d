use crate::decoders::chunk::ChunkReader;
use crate::decoders::container::{
    AnimationControl, ContainerInfo, ContainerParser, FrameControl, FrameData, FrameRecord, ImageHeader, LoopCount,
    ParseEvent, ParseEvents,
};
use crate::decoders::frame::{Canvas, FrameDecoder};
use crate::utils::error::{ApngError, ApngResult};
use crate::utils::image::ImageFrame;
use crate::utils::latch::Latch;
use crate::utils::options::DecodingOptions;
use crate::utils::source::ByteSource;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::borrow::Cow;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DecodeState {
    Initialized = 0,
    ParsingHeader = 1,
    /// IHDR is known, waiting for acTL or the first image data.
    AwaitingAnimationControl = 2,
    NotAnimated = 3,
    DecodingFrames = 4,
    FirstPassComplete = 5,
    Faulted = 6,
}

impl From<u8> for DecodeState {
    fn from(value: u8) -> Self {
        match value {
            1 => DecodeState::ParsingHeader,
            2 => DecodeState::AwaitingAnimationControl,
            3 => DecodeState::NotAnimated,
            4 => DecodeState::DecodingFrames,
            5 => DecodeState::FirstPassComplete,
            6 => DecodeState::Faulted,
            _ => DecodeState::Initialized,
        }
    }
}

/// Result of a completed metadata pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstPassSummary {
    /// Frames actually present. Lower than `declared_frames` when the
    /// stream ended early.
    pub frame_count: usize,
    pub declared_frames: u32,
    pub duration: Duration,
    pub loop_count: LoopCount,
}

impl FirstPassSummary {
    pub fn is_complete(&self) -> bool {
        self.frame_count == self.declared_frames as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Metadata of frame `n` was published.
    Frame(usize),
    Complete(FirstPassSummary),
}

/// Outcome of [`ApngDecoder::open`].
pub enum Opened<S: ByteSource> {
    Animated(ApngDecoder<S>),
    /// A plain PNG. The source is handed back for a still-image decoder.
    Static { source: S, header: ImageHeader },
}

impl<S: ByteSource> Opened<S> {
    pub fn is_animated(&self) -> bool {
        matches!(self, Opened::Animated(_))
    }

    pub fn animated(self) -> ApngResult<ApngDecoder<S>> {
        match self {
            Opened::Animated(decoder) => Ok(decoder),
            Opened::Static { .. } => Err(ApngError::NotAnimated),
        }
    }
}

#[derive(Default)]
struct FrameSlot {
    record: OnceLock<FrameRecord>,
    bitmap: OnceLock<Arc<[u8]>>,
}

/// Everything readers may see of one pass. Replaced wholesale on reset.
struct Published {
    info: ContainerInfo,
    slots: Box<[FrameSlot]>,
    scanned: AtomicUsize,
    duration_nanos: AtomicU64,
    default_image: OnceLock<FrameData>,
    first_pass: Latch<FirstPassSummary>,
}

impl Published {
    fn new(info: ContainerInfo) -> Self {
        let slots = (0..info.animation.num_frames).map(|_| FrameSlot::default()).collect();

        Self {
            info,
            slots,
            scanned: AtomicUsize::new(0),
            duration_nanos: AtomicU64::new(0),
            default_image: OnceLock::new(),
            first_pass: Latch::new(),
        }
    }

    fn scanned(&self) -> usize {
        self.scanned.load(Ordering::Acquire)
    }

    fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos.load(Ordering::Acquire))
    }

    fn record(&self, index: usize) -> Option<&FrameRecord> {
        self.slots.get(index)?.record.get()
    }
}

struct ParseSession<R: Read> {
    reader: ChunkReader<R>,
    parser: ContainerParser,
    published: Arc<Published>,
    /// The stream already ended while the header was being read.
    ended: bool,
    /// Summary of a pass that completed under the lock, announced once the
    /// lock is released.
    completed: Option<FirstPassSummary>,
}

impl<R: Read> ParseSession<R> {
    fn pull(&mut self) -> ApngResult<ParseEvents> {
        match self.reader.next()? {
            Some(chunk) => self.parser.push(&chunk),
            None => self.parser.finish(),
        }
    }
}

enum Started {
    Animated {
        parser: ContainerParser,
        published: Arc<Published>,
        ended: bool,
    },
    Static(ImageHeader),
}

struct Compositor<R> {
    published: Arc<Published>,
    canvas: Canvas,
    /// Index of the frame the canvas is ready to receive.
    next: usize,
    spans: Option<R>,
}

impl<R: Read + Seek> Compositor<R> {
    fn new(published: Arc<Published>) -> Self {
        let canvas = Canvas::new(&published.info.header);

        Self {
            published,
            canvas,
            next: 0,
            spans: None,
        }
    }

    /// Picks the cheapest starting point for rendering `target`: the live
    /// canvas, a cached bitmap, or frame 0.
    fn seek(&mut self, target: usize) {
        let live = (self.next <= target).then_some(self.next);
        let lower = live.unwrap_or(0);

        for k in (lower..target).rev() {
            let slot = &self.published.slots[k];
            let (Some(record), Some(bitmap)) = (slot.record.get(), slot.bitmap.get()) else {
                continue;
            };

            if self.canvas.resume_from(bitmap, &record.control) {
                log::debug!("Resuming frame {} from cached frame {}", target, k);
                self.next = k + 1;
                return;
            }
        }

        if live.is_none() {
            self.canvas.clear();
            self.next = 0;
        }
    }

    fn render<S>(&mut self, target: usize, source: &S, retain: bool) -> ApngResult<Arc<[u8]>>
    where
        S: ByteSource<Reader = R>,
    {
        self.canvas.allocate()?;
        self.seek(target);

        let published = Arc::clone(&self.published);
        let decoder = FrameDecoder::new(&published.info);

        loop {
            let index = self.next;
            let slot = &published.slots[index];
            let record = slot.record.get().ok_or(ApngError::SessionResetting)?;

            let compressed = self.load(&record.data, source)?;
            let result = decoder.decode(index, &record.control, &compressed, &mut self.canvas);
            self.next = index + 1;

            match result {
                Ok(pixels) => {
                    if retain {
                        let _ = slot.bitmap.set(Arc::clone(&pixels));
                    }

                    if index == target {
                        return Ok(pixels);
                    }
                }
                Err(e) if index == target => return Err(e),
                Err(e) => log::warn!("Skipping frame {} while compositing frame {}: {}", index, target, e),
            }
        }
    }

    fn load<'d, S>(&mut self, data: &'d FrameData, source: &S) -> io::Result<Cow<'d, [u8]>>
    where
        S: ByteSource<Reader = R>,
    {
        let spans = match data {
            FrameData::Loaded(bytes) => return Ok(Cow::Borrowed(&bytes[..])),
            FrameData::Spans(spans) => spans,
        };

        let reader = match &mut self.spans {
            Some(reader) => reader,
            None => self.spans.insert(source.open()?),
        };

        let mut compressed = vec![0u8; data.compressed_len() as usize];
        let mut filled = 0;
        for span in spans {
            let end = filled + span.len as usize;
            reader.seek(SeekFrom::Start(span.offset))?;
            reader.read_exact(&mut compressed[filled..end])?;
            filled = end;
        }

        Ok(Cow::Owned(compressed))
    }
}

/// Clears the reset flag however `reset` exits.
struct ResetFlag<'a>(&'a AtomicBool);

impl Drop for ResetFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Progressive APNG decoder.
///
/// Frame metadata is discovered by a first pass over the chunk stream, which
/// runs on demand, on a worker thread, or up front depending on
/// [`DecodingOptions`]. Frames are composited when requested. The decoder is
/// `Send + Sync` and meant to be shared through an `Arc`.
pub struct ApngDecoder<S: ByteSource> {
    source: S,
    options: DecodingOptions,
    state: AtomicU8,
    consumed: AtomicU64,
    resetting: AtomicBool,
    fault: Mutex<Option<String>>,
    // Lock order: session, then compositor.
    session: Mutex<ParseSession<S::Reader>>,
    compositor: Mutex<Compositor<S::Reader>>,
    published: RwLock<Arc<Published>>,
}

impl<S: ByteSource> ApngDecoder<S> {
    /// Reads up to the first image data. Plain PNGs come back as
    /// [`Opened::Static`].
    pub fn open(source: S, options: DecodingOptions) -> ApngResult<Opened<S>> {
        let state = AtomicU8::new(DecodeState::Initialized as u8);
        let mut reader = ChunkReader::new(source.open()?);

        let (parser, published, ended) = match Self::start(&mut reader, &options, &state)? {
            Started::Animated { parser, published, ended } => (parser, published, ended),
            Started::Static(header) => {
                log::info!("No animation control before image data, not animated");
                return Ok(Opened::Static { source, header });
            }
        };

        let info = &published.info;
        log::info!(
            "APNG {}x{}, {} frames, {} plays",
            info.header.width,
            info.header.height,
            info.animation.num_frames,
            info.animation.num_plays
        );

        let decoder = Self {
            options,
            state,
            consumed: AtomicU64::new(reader.position()),
            resetting: AtomicBool::new(false),
            fault: Mutex::new(None),
            compositor: Mutex::new(Compositor::new(Arc::clone(&published))),
            published: RwLock::new(Arc::clone(&published)),
            session: Mutex::new(ParseSession {
                reader,
                parser,
                published,
                ended,
                completed: None,
            }),
            source,
        };

        if options.full_first_pass {
            decoder.complete_first_pass()?;
        }

        Ok(Opened::Animated(decoder))
    }

    /// Drives a fresh parser until the container is known to be animated
    /// or not.
    fn start(reader: &mut ChunkReader<S::Reader>, options: &DecodingOptions, state: &AtomicU8) -> ApngResult<Started> {
        let mut parser = ContainerParser::new(options.load_frame_data);
        state.store(DecodeState::ParsingHeader as u8, Ordering::Release);

        loop {
            let events = match reader.next()? {
                Some(chunk) => parser.push(&chunk)?,
                None => parser.finish()?,
            };

            if parser.has_header() {
                let _ = state.compare_exchange(
                    DecodeState::ParsingHeader as u8,
                    DecodeState::AwaitingAnimationControl as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }

            let mut ready = None;
            let mut ended = false;
            for event in events {
                match event {
                    ParseEvent::NotAnimated(header) => {
                        state.store(DecodeState::NotAnimated as u8, Ordering::Release);
                        return Ok(Started::Static(header));
                    }
                    ParseEvent::Ready(info) => ready = Some(info),
                    ParseEvent::End => ended = true,
                    other => log::warn!("Unexpected {:?} before animation start", other),
                }
            }

            if let Some(info) = ready {
                state.store(DecodeState::DecodingFrames as u8, Ordering::Release);
                return Ok(Started::Animated {
                    parser,
                    published: Arc::new(Published::new(info)),
                    ended,
                });
            }
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn options(&self) -> DecodingOptions {
        self.options
    }

    pub fn state(&self) -> DecodeState {
        DecodeState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DecodeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn published(&self) -> Arc<Published> {
        Arc::clone(&self.published.read())
    }

    pub fn header(&self) -> ImageHeader {
        self.published.read().info.header
    }

    pub fn animation(&self) -> AnimationControl {
        self.published.read().info.animation
    }

    pub fn loop_count(&self) -> LoopCount {
        self.animation().loop_count()
    }

    /// Frame count declared by acTL.
    pub fn frame_count(&self) -> usize {
        self.published.read().slots.len()
    }

    /// Frames whose metadata the first pass has published so far.
    pub fn scanned_frames(&self) -> usize {
        self.published.read().scanned()
    }

    /// Source bytes consumed by the first pass.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn frame_control(&self, index: usize) -> Option<FrameControl> {
        self.published.read().record(index).map(|record| record.control)
    }

    /// Sum of the delays of the frames scanned so far. Final once the first
    /// pass completes; never decreases before that.
    pub fn duration(&self) -> Duration {
        self.published.read().duration()
    }

    pub fn is_first_pass_complete(&self) -> bool {
        self.published.read().first_pass.is_fired()
    }

    pub fn first_pass_summary(&self) -> Option<FirstPassSummary> {
        self.published.read().first_pass.get()
    }

    /// Calls `callback` once the current pass completes, or right away if it
    /// already has.
    pub fn on_first_pass_complete<F>(&self, callback: F)
    where
        F: FnOnce(&FirstPassSummary) + Send + 'static,
    {
        self.published().first_pass.subscribe(callback);
    }

    pub fn wait_first_pass(&self, timeout: Duration) -> Option<FirstPassSummary> {
        self.published().first_pass.wait_timeout(timeout)
    }

    /// Scans until one more frame's metadata is published or the pass ends.
    pub fn advance(&self) -> ApngResult<Progress> {
        self.advance_session(self.session.lock())
    }

    /// Advances, then releases `session` before first pass subscribers run
    /// so they may call back into the decoder.
    fn advance_session(&self, mut session: MutexGuard<'_, ParseSession<S::Reader>>) -> ApngResult<Progress> {
        let progress = self.advance_locked(&mut session);
        let completed = session.completed.take().map(|summary| (Arc::clone(&session.published), summary));
        drop(session);

        if let Some((published, summary)) = completed {
            Self::announce(&published, summary);
        }

        progress
    }

    fn advance_locked(&self, session: &mut ParseSession<S::Reader>) -> ApngResult<Progress> {
        if let Some(message) = self.fault.lock().clone() {
            return Err(ApngError::Faulted(message));
        }

        let published = Arc::clone(&session.published);
        if let Some(summary) = published.first_pass.get() {
            return Ok(Progress::Complete(summary));
        }

        if session.ended {
            return Ok(Progress::Complete(self.complete_pass(session)));
        }

        loop {
            let pulled = session.pull();
            self.consumed.store(session.reader.position(), Ordering::Release);
            let events = pulled.map_err(|e| self.fault(e))?;

            let mut progress = None;
            for event in events {
                match event {
                    ParseEvent::Frame(record) => {
                        let index = record.index;
                        self.publish_frame(&published, record);
                        progress = Some(Progress::Frame(index));
                    }
                    ParseEvent::DefaultImage(data) => {
                        log::debug!("Hidden default image, {} compressed bytes", data.compressed_len());
                        let _ = published.default_image.set(data);
                    }
                    ParseEvent::End => session.ended = true,
                    other => log::warn!("Unexpected {:?} during frame scan", other),
                }
            }

            // The last frame and the end can arrive together. Report the
            // frame; the next call returns the summary.
            if session.ended {
                let summary = self.complete_pass(session);
                return Ok(progress.unwrap_or(Progress::Complete(summary)));
            }

            if let Some(progress) = progress {
                return Ok(progress);
            }
        }
    }

    fn publish_frame(&self, published: &Published, record: FrameRecord) {
        let index = record.index;
        let delay = record.control.delay();

        let Some(slot) = published.slots.get(index) else {
            log::warn!("Frame {} is beyond the declared count, ignoring", index);
            return;
        };

        if slot.record.set(record).is_err() {
            log::warn!("Frame {} was already published", index);
            return;
        }

        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let _ = published
            .duration_nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| Some(total.saturating_add(nanos)));
        published.scanned.store(index + 1, Ordering::Release);
        log::debug!("Frame {} published, delay {:?}", index, delay);

        if self.options.preload_all_frames {
            if let Err(e) = self.render(index) {
                log::warn!("Failed to preload frame {}: {}", index, e);
            }
        }
    }

    fn complete_pass(&self, session: &mut ParseSession<S::Reader>) -> FirstPassSummary {
        let published = &session.published;
        let summary = FirstPassSummary {
            frame_count: published.scanned(),
            declared_frames: published.info.animation.num_frames,
            duration: published.duration(),
            loop_count: published.info.animation.loop_count(),
        };

        if !summary.is_complete() {
            log::warn!(
                "Stream ended after {} of {} declared frames",
                summary.frame_count,
                summary.declared_frames
            );
        }

        self.set_state(DecodeState::FirstPassComplete);
        session.completed = Some(summary);

        summary
    }

    fn announce(published: &Published, summary: FirstPassSummary) {
        if published.first_pass.fire(summary) {
            log::info!("First pass complete: {} frames, {:?}", summary.frame_count, summary.duration);
        }
    }

    fn fault(&self, error: ApngError) -> ApngError {
        log::error!("Decoding pass aborted: {}", error);

        *self.fault.lock() = Some(error.to_string());
        self.set_state(match error {
            ApngError::NotAnimated => DecodeState::NotAnimated,
            _ => DecodeState::Faulted,
        });

        error
    }

    /// Runs the first pass to the end on the calling thread.
    pub fn complete_first_pass(&self) -> ApngResult<FirstPassSummary> {
        loop {
            if let Progress::Complete(summary) = self.advance()? {
                return Ok(summary);
            }
        }
    }

    /// Runs the first pass on a dedicated worker thread.
    pub fn spawn_first_pass(self: &Arc<Self>) -> io::Result<JoinHandle<ApngResult<FirstPassSummary>>>
    where
        S: 'static,
    {
        let decoder = Arc::clone(self);

        thread::Builder::new()
            .name("apng-first-pass".to_string())
            .spawn(move || decoder.complete_first_pass())
    }

    /// Returns the composited canvas after frame `index`.
    pub fn frame(&self, index: usize) -> ApngResult<ImageFrame> {
        loop {
            if self.resetting.load(Ordering::Acquire) {
                return Err(ApngError::SessionResetting);
            }

            if let Some(message) = self.fault.lock().clone() {
                return Err(ApngError::Faulted(message));
            }

            let published = self.published();
            let declared = published.slots.len();
            if index >= declared {
                return Err(ApngError::FrameOutOfRange { requested: index, declared });
            }

            if published.record(index).is_some() {
                break;
            }

            if published.first_pass.is_fired() {
                return Err(ApngError::IncompleteAnimation {
                    requested: index,
                    available: published.scanned(),
                });
            }

            let session = self.session.lock();
            if Arc::ptr_eq(&session.published, &published) {
                self.advance_session(session)?;
            }
        }

        self.render(index)
    }

    fn render(&self, index: usize) -> ApngResult<ImageFrame> {
        let mut compositor = self.compositor.lock();
        let published = Arc::clone(&compositor.published);

        let slot = published.slots.get(index).ok_or(ApngError::SessionResetting)?;
        let record = slot.record.get().ok_or(ApngError::SessionResetting)?;
        let header = published.info.header;

        let pixels = match slot.bitmap.get() {
            Some(bitmap) => Arc::clone(bitmap),
            None => compositor.render(index, &self.source, self.options.retains_bitmaps())?,
        };

        Ok(ImageFrame::new(index, header.width, header.height, record.control, pixels))
    }

    /// Decodes the IDAT image that is not part of the animation, if the file
    /// has one. Returns RGBA8 covering the whole canvas.
    pub fn default_image(&self) -> ApngResult<Option<Vec<u8>>> {
        loop {
            let published = self.published();
            if let Some(data) = published.default_image.get() {
                let mut compositor = self.compositor.lock();
                let compressed = compositor.load(data, &self.source)?;

                return FrameDecoder::new(&published.info).decode_default_image(&compressed).map(Some);
            }

            // The default image closes when the first fcTL arrives.
            if published.scanned() > 0 || published.first_pass.is_fired() {
                return Ok(None);
            }

            let session = self.session.lock();
            if Arc::ptr_eq(&session.published, &published) {
                self.advance_session(session)?;
            }
        }
    }

    /// Re-reads the source from the start and replaces all published state.
    ///
    /// `frame` calls that race the reset fail with
    /// [`ApngError::SessionResetting`]. Frames returned earlier keep their
    /// pixels.
    pub fn reset(&self) -> ApngResult<()> {
        self.resetting.store(true, Ordering::Release);
        let _flag = ResetFlag(&self.resetting);

        let mut session = self.session.lock();
        let mut compositor = self.compositor.lock();

        log::info!("Resetting decoder");
        self.set_state(DecodeState::Initialized);

        let reader = self.source.open().map_err(|e| self.fault(e.into()))?;
        session.reader.reset(reader);

        let started = Self::start(&mut session.reader, &self.options, &self.state);
        self.consumed.store(session.reader.position(), Ordering::Release);

        let (parser, published, ended) = match started {
            Ok(Started::Animated { parser, published, ended }) => (parser, published, ended),
            Ok(Started::Static(_)) => return Err(self.fault(ApngError::NotAnimated)),
            Err(e) => return Err(self.fault(e)),
        };

        session.parser = parser;
        session.published = Arc::clone(&published);
        session.ended = ended;
        session.completed = None;
        *compositor = Compositor::new(Arc::clone(&published));
        *self.published.write() = published;
        *self.fault.lock() = None;

        drop(compositor);

        if self.options.full_first_pass {
            loop {
                if let Progress::Complete(_) = self.advance_session(session)? {
                    break;
                }
                session = self.session.lock();
            }
        }

        Ok(())
    }
}
