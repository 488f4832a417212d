#[cfg(test)]
mod tests {
    use apng_stream::{
        chunk_crc, ApngDecoder, ApngError, ChunkReader, ChunkType, DecodeState, DecodingOptions, ErrorKind,
        ImageFrame, Logger, LoopCount, MemorySource, Opened, Progress, StreamSource, Writer, PNG_SIGNATURE,
    };
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use log::LevelFilter;
    use std::io::{Cursor, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const CLEAR: [u8; 4] = [0, 0, 0, 0];

    const DISPOSE_NONE: u8 = 0;
    const DISPOSE_BACKGROUND: u8 = 1;
    const DISPOSE_PREVIOUS: u8 = 2;
    const BLEND_SOURCE: u8 = 0;
    const BLEND_OVER: u8 = 1;

    fn zlib(raw: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).unwrap();
        encoder.finish().unwrap()
    }

    /// Unfiltered RGBA8 scanlines of a single colour.
    fn solid_rows(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let mut raw = Vec::new();
        for _ in 0..height {
            raw.push(0);
            for _ in 0..width {
                raw.extend_from_slice(&rgba);
            }
        }
        raw
    }

    struct TestFrame {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        delay: (u16, u16),
        dispose: u8,
        blend: u8,
        raw: Vec<u8>,
    }

    impl TestFrame {
        fn solid(x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) -> Self {
            Self {
                x,
                y,
                width,
                height,
                delay: (1, 10),
                dispose: DISPOSE_NONE,
                blend: BLEND_SOURCE,
                raw: solid_rows(width, height, rgba),
            }
        }

        fn dispose(mut self, op: u8) -> Self {
            self.dispose = op;
            self
        }

        fn blend(mut self, op: u8) -> Self {
            self.blend = op;
            self
        }

        fn delay(mut self, num: u16, den: u16) -> Self {
            self.delay = (num, den);
            self
        }
    }

    struct ApngBuilder {
        bytes: Vec<u8>,
        sequence: u32,
    }

    impl ApngBuilder {
        fn new() -> Self {
            Self {
                bytes: PNG_SIGNATURE.to_vec(),
                sequence: 0,
            }
        }

        fn chunk(&mut self, kind: &[u8; 4], data: &[u8]) -> &mut Self {
            self.bytes.extend_from_slice(&(data.len() as u32).to_be_bytes());
            self.bytes.extend_from_slice(kind);
            self.bytes.extend_from_slice(data);
            self.bytes.extend_from_slice(&chunk_crc(&ChunkType(*kind), data).to_be_bytes());
            self
        }

        fn ihdr(&mut self, width: u32, height: u32, bit_depth: u8, color_type: u8, interlaced: bool) -> &mut Self {
            let mut data = Vec::new();
            data.extend_from_slice(&width.to_be_bytes());
            data.extend_from_slice(&height.to_be_bytes());
            data.extend_from_slice(&[bit_depth, color_type, 0, 0, interlaced as u8]);
            self.chunk(b"IHDR", &data)
        }

        fn actl(&mut self, frames: u32, plays: u32) -> &mut Self {
            let mut data = Vec::new();
            data.extend_from_slice(&frames.to_be_bytes());
            data.extend_from_slice(&plays.to_be_bytes());
            self.chunk(b"acTL", &data)
        }

        fn fctl(&mut self, frame: &TestFrame) -> &mut Self {
            let mut data = Vec::new();
            data.extend_from_slice(&self.sequence.to_be_bytes());
            data.extend_from_slice(&frame.width.to_be_bytes());
            data.extend_from_slice(&frame.height.to_be_bytes());
            data.extend_from_slice(&frame.x.to_be_bytes());
            data.extend_from_slice(&frame.y.to_be_bytes());
            data.extend_from_slice(&frame.delay.0.to_be_bytes());
            data.extend_from_slice(&frame.delay.1.to_be_bytes());
            data.extend_from_slice(&[frame.dispose, frame.blend]);
            self.sequence += 1;
            self.chunk(b"fcTL", &data)
        }

        fn idat(&mut self, raw: &[u8]) -> &mut Self {
            self.chunk(b"IDAT", &zlib(raw))
        }

        fn fdat(&mut self, raw: &[u8]) -> &mut Self {
            self.fdat_compressed(&zlib(raw))
        }

        fn fdat_compressed(&mut self, compressed: &[u8]) -> &mut Self {
            let mut data = self.sequence.to_be_bytes().to_vec();
            data.extend_from_slice(compressed);
            self.sequence += 1;
            self.chunk(b"fdAT", &data)
        }

        fn skip_sequence(&mut self) -> &mut Self {
            self.sequence += 1;
            self
        }

        fn corrupt_last_crc(&mut self) -> &mut Self {
            if let Some(last) = self.bytes.last_mut() {
                *last ^= 0xFF;
            }
            self
        }

        fn iend(&mut self) -> &mut Self {
            self.chunk(b"IEND", &[])
        }

        fn build(&self) -> Vec<u8> {
            self.bytes.clone()
        }
    }

    /// RGBA8 animation whose first frame is the IDAT image.
    fn build_apng(width: u32, height: u32, declared: u32, plays: u32, frames: &[TestFrame]) -> Vec<u8> {
        let mut png = ApngBuilder::new();
        png.ihdr(width, height, 8, 6, false).actl(declared, plays);

        for (i, frame) in frames.iter().enumerate() {
            png.fctl(frame);
            if i == 0 {
                png.idat(&frame.raw);
            } else {
                png.fdat(&frame.raw);
            }
        }

        png.iend().build()
    }

    fn simple_animation() -> Vec<u8> {
        let frames = [
            TestFrame::solid(0, 0, 4, 4, RED).delay(10, 100),
            TestFrame::solid(0, 0, 4, 4, GREEN).delay(20, 100),
            TestFrame::solid(0, 0, 4, 4, BLUE).delay(30, 100),
        ];

        build_apng(4, 4, 3, 0, &frames)
    }

    /// Exercises every disposal and blend operation.
    fn mixed_animation() -> Vec<u8> {
        let frames = [
            TestFrame::solid(0, 0, 4, 4, RED).delay(1, 0),
            TestFrame::solid(1, 1, 2, 2, GREEN).dispose(DISPOSE_PREVIOUS).delay(5, 100),
            TestFrame::solid(0, 0, 1, 1, BLUE).dispose(DISPOSE_BACKGROUND).delay(1, 3),
            TestFrame::solid(0, 0, 4, 4, [0, 0, 255, 128]).blend(BLEND_OVER),
            TestFrame::solid(3, 3, 1, 1, WHITE).dispose(DISPOSE_PREVIOUS).delay(0, 0),
        ];

        build_apng(4, 4, 5, 2, &frames)
    }

    fn open(bytes: &[u8], options: DecodingOptions) -> Result<ApngDecoder<MemorySource>, ApngError> {
        ApngDecoder::from_bytes(bytes.to_vec(), options)?.animated()
    }

    fn open_error(bytes: &[u8], options: DecodingOptions) -> ApngError {
        match open(bytes, options) {
            Ok(_) => panic!("expected the decoder to fail"),
            Err(e) => e,
        }
    }

    fn decode_all<S: apng_stream::ByteSource>(decoder: &ApngDecoder<S>) -> Result<Vec<ImageFrame>, ApngError> {
        (0..decoder.frame_count()).map(|i| decoder.frame(i)).collect()
    }

    fn pixel(frame: &ImageFrame, x: u32, y: u32) -> [u8; 4] {
        frame.pixel(x, y).unwrap()
    }

    #[test]
    pub fn test_chunk_reader() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = simple_animation();
        let mut reader = ChunkReader::new(Cursor::new(bytes.clone()));

        let mut kinds = Vec::new();
        let mut first_offset = None;
        while let Some(chunk) = reader.next()? {
            first_offset.get_or_insert(chunk.offset);
            kinds.push(chunk.kind.to_string());
        }

        assert_eq!(
            kinds,
            ["IHDR", "acTL", "fcTL", "IDAT", "fcTL", "fdAT", "fcTL", "fdAT", "IEND"]
        );
        assert_eq!(first_offset, Some(16));
        assert_eq!(reader.position(), bytes.len() as u64);
        assert!(reader.is_finished());
        assert!(reader.next()?.is_none());

        assert!(ChunkType::IHDR.is_critical());
        assert!(!ChunkType::TRNS.is_critical());
        assert!(ChunkType::FCTL.requires_integrity());
        assert!(!ChunkType(*b"tEXt").requires_integrity());

        Ok(())
    }

    #[test]
    pub fn test_frame_count_and_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let decoder = open(&simple_animation(), DecodingOptions::default())?;

        assert_eq!(decoder.state(), DecodeState::DecodingFrames);
        assert_eq!(decoder.header().width, 4);
        assert_eq!(decoder.header().height, 4);
        assert_eq!(decoder.frame_count(), 3);
        assert!(!decoder.is_first_pass_complete());

        let summary = decoder.complete_first_pass()?;
        assert_eq!(summary.frame_count, 3);
        assert_eq!(summary.declared_frames, 3);
        assert!(summary.is_complete());
        assert_eq!(decoder.scanned_frames(), 3);
        assert_eq!(decoder.state(), DecodeState::FirstPassComplete);

        let control = decoder.frame_control(1).ok_or("missing frame control")?;
        assert_eq!(control.sequence_number, 1);
        assert_eq!(control.delay(), Duration::from_millis(200));
        assert!(decoder.frame_control(3).is_none());

        let frames = decode_all(&decoder)?;
        assert_eq!(frames.len(), 3);
        assert_eq!(pixel(&frames[0], 0, 0), RED);
        assert_eq!(pixel(&frames[1], 3, 3), GREEN);
        assert_eq!(pixel(&frames[2], 2, 1), BLUE);
        assert_eq!(frames[2].index(), 2);
        assert_eq!(frames[2].delay_ms(), 300);
        assert_eq!(frames[0].pixels().len(), 4 * 4 * 4);
        assert!(!frames[0].has_alpha());

        Ok(())
    }

    #[test]
    pub fn test_duration_matches_in_both_modes() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = mixed_animation();

        let eager = open(&bytes, DecodingOptions::eager())?;
        assert!(eager.is_first_pass_complete());

        let incremental = open(&bytes, DecodingOptions::default())?;
        let summary = incremental.complete_first_pass()?;

        let frames = decode_all(&eager)?;
        let delays: Duration = frames.iter().map(|frame| frame.delay()).sum();

        assert_eq!(eager.duration(), delays);
        assert_eq!(incremental.duration(), delays);
        assert_eq!(summary.duration, delays);
        // 10ms + 50ms + 333.333333ms + 100ms + 0
        assert_eq!(delays, Duration::from_nanos(493_333_333));

        Ok(())
    }

    #[test]
    pub fn test_partial_duration_is_monotonic() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = mixed_animation();
        let total = open(&bytes, DecodingOptions::eager())?.duration();
        let decoder = open(&bytes, DecodingOptions::default())?;

        let mut last = decoder.duration();
        assert_eq!(last, Duration::ZERO);

        let mut published = Vec::new();
        loop {
            let progress = decoder.advance()?;
            let duration = decoder.duration();

            assert!(duration >= last);
            assert!(duration <= total);
            last = duration;

            match progress {
                Progress::Frame(index) => {
                    published.push(index);
                    assert_eq!(decoder.scanned_frames(), index + 1);
                }
                Progress::Complete(summary) => {
                    assert_eq!(summary.duration, total);
                    break;
                }
            }
        }

        assert_eq!(published, [0, 1, 2, 3, 4]);
        assert_eq!(last, total);
        assert!(matches!(decoder.advance()?, Progress::Complete(_)));

        Ok(())
    }

    #[test]
    pub fn test_reset_is_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let options = DecodingOptions {
            cache_decoded_images: true,
            ..DecodingOptions::default()
        };
        let decoder = open(&mixed_animation(), options)?;

        let before = decode_all(&decoder)?;
        assert!(decoder.is_first_pass_complete());

        decoder.reset()?;
        assert_eq!(decoder.state(), DecodeState::DecodingFrames);
        assert_eq!(decoder.scanned_frames(), 0);
        assert!(!decoder.is_first_pass_complete());

        let after = decode_all(&decoder)?;
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.pixels(), b.pixels());
            assert_eq!(a.control(), b.control());
        }

        Ok(())
    }

    #[test]
    pub fn test_not_animated() -> Result<(), Box<dyn std::error::Error>> {
        let mut png = ApngBuilder::new();
        png.ihdr(3, 2, 8, 6, false).idat(&solid_rows(3, 2, RED)).iend();

        match ApngDecoder::from_bytes(png.build(), DecodingOptions::default())? {
            Opened::Static { header, source } => {
                assert_eq!((header.width, header.height), (3, 2));
                assert_eq!(source.bytes(), png.build().as_slice());
            }
            Opened::Animated(_) => panic!("plain PNG reported as animated"),
        }

        let error = open_error(&png.build(), DecodingOptions::eager());
        assert!(error.is_not_animated());
        assert_eq!(error.kind(), ErrorKind::NotAnimated);

        // acTL declaring no frames is handled like a plain PNG
        let mut png = ApngBuilder::new();
        png.ihdr(2, 2, 8, 6, false)
            .actl(0, 0)
            .idat(&solid_rows(2, 2, RED))
            .iend();
        let opened = ApngDecoder::from_bytes(png.build(), DecodingOptions::default())?;
        assert!(!opened.is_animated());

        Ok(())
    }

    #[test]
    pub fn test_incomplete_animation() -> Result<(), Box<dyn std::error::Error>> {
        let frames = [
            TestFrame::solid(0, 0, 2, 2, RED),
            TestFrame::solid(0, 0, 2, 2, GREEN),
            TestFrame::solid(0, 0, 2, 2, BLUE),
        ];
        let decoder = open(&build_apng(2, 2, 5, 0, &frames), DecodingOptions::default())?;

        assert_eq!(decoder.frame_count(), 5);
        for i in 0..3 {
            decoder.frame(i)?;
        }

        match decoder.frame(3) {
            Err(ApngError::IncompleteAnimation { requested, available }) => {
                assert_eq!(requested, 3);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected result: {:?}", other.map(|frame| frame.index())),
        }

        assert!(matches!(
            decoder.frame(5),
            Err(ApngError::FrameOutOfRange { requested: 5, declared: 5 })
        ));

        let summary = decoder.first_pass_summary().ok_or("first pass did not complete")?;
        assert_eq!(summary.frame_count, 3);
        assert!(!summary.is_complete());
        assert_eq!(decoder.state(), DecodeState::FirstPassComplete);

        Ok(())
    }

    #[test]
    pub fn test_loop_count() -> Result<(), Box<dyn std::error::Error>> {
        let frames = [TestFrame::solid(0, 0, 1, 1, RED)];

        let infinite = open(&build_apng(1, 1, 1, 0, &frames), DecodingOptions::default())?;
        assert_eq!(infinite.loop_count(), LoopCount::Infinite);

        let three = open(&build_apng(1, 1, 1, 3, &frames), DecodingOptions::eager())?;
        assert_eq!(three.loop_count(), LoopCount::Finite(3));
        assert_eq!(three.animation().num_plays, 3);
        assert_eq!(
            three.first_pass_summary().map(|summary| summary.loop_count),
            Some(LoopCount::Finite(3))
        );

        Ok(())
    }

    #[test]
    pub fn test_dispose_background() -> Result<(), Box<dyn std::error::Error>> {
        let frames = [
            TestFrame::solid(0, 0, 4, 4, RED),
            TestFrame::solid(0, 0, 2, 2, GREEN).dispose(DISPOSE_BACKGROUND),
            TestFrame::solid(3, 3, 1, 1, BLUE).blend(BLEND_OVER),
        ];
        let decoder = open(&build_apng(4, 4, 3, 0, &frames), DecodingOptions::default())?;

        let frame = decoder.frame(1)?;
        assert_eq!(pixel(&frame, 0, 0), GREEN);
        assert_eq!(pixel(&frame, 2, 2), RED);

        let frame = decoder.frame(2)?;
        assert_eq!(pixel(&frame, 0, 0), CLEAR);
        assert_eq!(pixel(&frame, 1, 1), CLEAR);
        assert_eq!(pixel(&frame, 2, 0), RED);
        assert_eq!(pixel(&frame, 3, 3), BLUE);
        assert!(frame.has_alpha());

        Ok(())
    }

    #[test]
    pub fn test_dispose_previous() -> Result<(), Box<dyn std::error::Error>> {
        let frames = [
            TestFrame::solid(0, 0, 4, 4, RED),
            TestFrame::solid(1, 1, 2, 2, GREEN).dispose(DISPOSE_PREVIOUS),
            TestFrame::solid(0, 0, 1, 1, BLUE),
        ];
        let decoder = open(&build_apng(4, 4, 3, 0, &frames), DecodingOptions::default())?;

        // Requested out of order to go through a canvas restart
        let last = decoder.frame(2)?;
        let middle = decoder.frame(1)?;

        assert_eq!(pixel(&middle, 1, 1), GREEN);
        assert_eq!(pixel(&middle, 0, 0), RED);
        assert_eq!(pixel(&last, 0, 0), BLUE);
        assert_eq!(pixel(&last, 1, 1), RED);
        assert_eq!(pixel(&last, 2, 2), RED);

        Ok(())
    }

    #[test]
    pub fn test_first_frame_dispose_previous() -> Result<(), Box<dyn std::error::Error>> {
        let frames = [
            TestFrame::solid(0, 0, 2, 2, RED).dispose(DISPOSE_PREVIOUS),
            TestFrame::solid(0, 0, 1, 1, GREEN).blend(BLEND_OVER),
        ];
        let decoder = open(&build_apng(2, 2, 2, 0, &frames), DecodingOptions::default())?;

        let frame = decoder.frame(1)?;
        assert_eq!(pixel(&frame, 0, 0), GREEN);
        assert_eq!(pixel(&frame, 1, 1), CLEAR);

        Ok(())
    }

    #[test]
    pub fn test_blend_over() -> Result<(), Box<dyn std::error::Error>> {
        let frames = [
            TestFrame::solid(0, 0, 2, 1, RED),
            TestFrame::solid(0, 0, 1, 1, [0, 0, 255, 128]).blend(BLEND_OVER),
            TestFrame::solid(1, 0, 1, 1, [0, 0, 255, 128]).dispose(DISPOSE_BACKGROUND),
        ];
        let decoder = open(&build_apng(2, 1, 3, 0, &frames), DecodingOptions::default())?;

        let frame = decoder.frame(1)?;
        assert_eq!(pixel(&frame, 0, 0), [127, 0, 128, 255]);
        assert_eq!(pixel(&frame, 1, 0), RED);

        // Source replaces instead of blending
        let frame = decoder.frame(2)?;
        assert_eq!(pixel(&frame, 1, 0), [0, 0, 255, 128]);

        let mut png = ApngBuilder::new();
        png.ihdr(1, 1, 8, 6, false).actl(2, 0);
        png.fctl(&TestFrame::solid(0, 0, 1, 1, CLEAR)).idat(&solid_rows(1, 1, CLEAR));
        let over = TestFrame::solid(0, 0, 1, 1, [10, 20, 30, 128]).blend(BLEND_OVER);
        png.fctl(&over).fdat(&over.raw).iend();

        let decoder = open(&png.build(), DecodingOptions::default())?;
        assert_eq!(pixel(&decoder.frame(1)?, 0, 0), [10, 20, 30, 128]);

        Ok(())
    }

    #[test]
    pub fn test_hidden_default_image() -> Result<(), Box<dyn std::error::Error>> {
        let red = TestFrame::solid(0, 0, 2, 2, RED);
        let green = TestFrame::solid(0, 0, 2, 2, GREEN);

        let mut png = ApngBuilder::new();
        png.ihdr(2, 2, 8, 6, false)
            .actl(2, 0)
            .idat(&solid_rows(2, 2, WHITE))
            .fctl(&red)
            .fdat(&red.raw)
            .fctl(&green)
            .fdat(&green.raw)
            .iend();

        for load_frame_data in [false, true] {
            let options = DecodingOptions {
                load_frame_data,
                ..DecodingOptions::default()
            };
            let decoder = open(&png.build(), options)?;

            let default_image = decoder.default_image()?.ok_or("default image missing")?;
            assert_eq!(&default_image[..4], &WHITE);

            let frames = decode_all(&decoder)?;
            assert_eq!(frames.len(), 2);
            assert_eq!(pixel(&frames[0], 0, 0), RED);
            assert_eq!(pixel(&frames[1], 1, 1), GREEN);
            assert_eq!(frames[0].control().sequence_number, 0);
        }

        // IDAT after the first fcTL is frame 0, not a hidden image
        let decoder = open(&simple_animation(), DecodingOptions::default())?;
        assert!(decoder.default_image()?.is_none());

        Ok(())
    }

    #[test]
    pub fn test_first_pass_notification() -> Result<(), Box<dyn std::error::Error>> {
        let decoder = open(&simple_animation(), DecodingOptions::default())?;
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        decoder.on_first_pass_complete(move |summary| {
            assert_eq!(summary.frame_count, 3);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(decoder.wait_first_pass(Duration::from_millis(1)).is_none());

        decoder.complete_first_pass()?;
        decoder.complete_first_pass()?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Late subscribers are called right away
        let counter = Arc::clone(&calls);
        decoder.on_first_pass_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let summary = decoder.wait_first_pass(Duration::from_millis(1)).ok_or("no summary")?;
        assert_eq!(summary.duration, Duration::from_millis(600));

        Ok(())
    }

    #[test]
    pub fn test_all_option_combinations() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = mixed_animation();
        let reference: Vec<Vec<u8>> = decode_all(&open(&bytes, DecodingOptions::default())?)?
            .iter()
            .map(|frame| frame.as_rgba8())
            .collect();

        let expected_last = {
            // Frame 4 is disposed to previous, so frame 3 shows through
            let mut pixels = reference[3].clone();
            pixels[60..64].copy_from_slice(&WHITE);
            pixels
        };
        assert_eq!(reference[4], expected_last);

        let combinations: Vec<DecodingOptions> = DecodingOptions::all_combinations().collect();
        assert_eq!(combinations.len(), 16);

        for options in combinations {
            let decoder = open(&bytes, options)?;
            assert_eq!(decoder.is_first_pass_complete(), options.full_first_pass);

            for (i, expected) in reference.iter().enumerate() {
                assert_eq!(&decoder.frame(i)?.as_rgba8(), expected, "frame {} with {:?}", i, options);
            }

            for (i, expected) in reference.iter().enumerate().rev() {
                assert_eq!(&decoder.frame(i)?.as_rgba8(), expected, "frame {} reversed with {:?}", i, options);
            }
        }

        Ok(())
    }

    #[test]
    pub fn test_stream_source() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = mixed_animation();
        let reference = decode_all(&open(&bytes, DecodingOptions::default())?)?;

        let (source, feeder) = StreamSource::new();
        let payload = bytes.clone();
        let producer = thread::spawn(move || {
            for piece in payload.chunks(7) {
                feeder.push(piece);
                thread::sleep(Duration::from_millis(1));
            }
            feeder.finish();
        });

        let decoder = ApngDecoder::open(source, DecodingOptions::default())?.animated()?;
        let frames = decode_all(&decoder)?;
        producer.join().unwrap();

        assert_eq!(frames.len(), reference.len());
        for (a, b) in frames.iter().zip(reference.iter()) {
            assert_eq!(a.pixels(), b.pixels());
        }
        assert_eq!(decoder.source().received(), bytes.len());
        assert_eq!(decoder.bytes_consumed(), bytes.len() as u64);

        Ok(())
    }

    #[test]
    pub fn test_first_pass_worker() -> Result<(), Box<dyn std::error::Error>> {
        let options = DecodingOptions {
            preload_all_frames: true,
            ..DecodingOptions::default()
        };
        let decoder = Arc::new(open(&mixed_animation(), options)?);

        let worker = decoder.spawn_first_pass()?;
        let frame = decoder.frame(2)?;
        let summary = worker.join().unwrap()?;

        assert_eq!(summary.frame_count, 5);
        assert_eq!(pixel(&frame, 0, 0), BLUE);
        assert_eq!(decoder.wait_first_pass(Duration::from_secs(1)), Some(summary));

        Ok(())
    }

    #[test]
    pub fn test_callback_reenters_decoder() -> Result<(), Box<dyn std::error::Error>> {
        let decoder = Arc::new(open(&simple_animation(), DecodingOptions::default())?);
        let calls = Arc::new(AtomicUsize::new(0));

        let (inner, counter) = (Arc::clone(&decoder), Arc::clone(&calls));
        decoder.on_first_pass_complete(move |summary| {
            assert!(matches!(inner.advance(), Ok(Progress::Complete(s)) if s == *summary));
            assert_eq!(inner.complete_first_pass().ok(), Some(*summary));
            assert_eq!(inner.frame(2).map(|frame| frame.pixel(0, 0)).ok(), Some(Some(BLUE)));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (done, finished) = mpsc::channel();
        let runner = Arc::clone(&decoder);
        let worker = thread::spawn(move || {
            let _ = done.send(runner.complete_first_pass().map(|summary| summary.frame_count));
        });

        let frame_count = finished.recv_timeout(Duration::from_secs(10))??;
        worker.join().unwrap();

        assert_eq!(frame_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Reset from inside a callback
        let inner = Arc::clone(&decoder);
        decoder.reset()?;
        decoder.on_first_pass_complete(move |_| {
            assert!(inner.reset().is_ok());
        });
        decoder.complete_first_pass()?;
        assert_eq!(decoder.frame_count(), 3);
        assert_eq!(pixel(&decoder.frame(1)?, 2, 2), GREEN);

        Ok(())
    }

    #[test]
    pub fn test_reset_races_frame_requests() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = mixed_animation();
        let reference: Vec<Vec<u8>> = decode_all(&open(&bytes, DecodingOptions::default())?)?
            .iter()
            .map(|frame| frame.as_rgba8())
            .collect();
        let reference = Arc::new(reference);

        for options in [DecodingOptions::default(), DecodingOptions::eager()] {
            let decoder = Arc::new(open(&bytes, options)?);

            let readers: Vec<_> = (0..2)
                .map(|offset| {
                    let decoder = Arc::clone(&decoder);
                    let reference = Arc::clone(&reference);

                    thread::spawn(move || {
                        for round in 0..200 {
                            let index = (round + offset) % reference.len();
                            match decoder.frame(index) {
                                Ok(frame) => assert_eq!(frame.as_rgba8(), reference[index], "frame {}", index),
                                Err(ApngError::SessionResetting) => {}
                                Err(e) => panic!("frame {} failed while resetting: {}", index, e),
                            }
                        }
                    })
                })
                .collect();

            for _ in 0..50 {
                decoder.reset()?;
                thread::yield_now();
            }

            for reader in readers {
                reader.join().unwrap();
            }

            for (i, expected) in reference.iter().enumerate() {
                assert_eq!(&decoder.frame(i)?.as_rgba8(), expected, "frame {} with {:?}", i, options);
            }
        }

        // Reset while a worker is still scanning
        let decoder = Arc::new(open(&bytes, DecodingOptions::default())?);
        let worker = decoder.spawn_first_pass()?;
        for _ in 0..20 {
            decoder.reset()?;
        }

        let summary = worker.join().unwrap()?;
        assert_eq!(summary.frame_count, 5);

        let summary = decoder.complete_first_pass()?;
        assert_eq!(summary.duration, Duration::from_nanos(493_333_333));
        assert_eq!(decoder.state(), DecodeState::FirstPassComplete);
        for (i, expected) in reference.iter().enumerate() {
            assert_eq!(&decoder.frame(i)?.as_rgba8(), expected);
        }

        Ok(())
    }

    #[test]
    pub fn test_oversized_canvas() -> Result<(), Box<dyn std::error::Error>> {
        let side = 0x7FFF_FFFF;
        let full = TestFrame {
            width: side,
            height: side,
            ..TestFrame::solid(0, 0, 1, 1, RED)
        };

        let mut png = ApngBuilder::new();
        png.ihdr(side, side, 8, 6, false).actl(1, 0).fctl(&full).iend();
        let bytes = png.build();

        for options in [DecodingOptions::default(), DecodingOptions::eager()] {
            let decoder = open(&bytes, options)?;
            assert_eq!(decoder.header().width, side);

            let summary = decoder.complete_first_pass()?;
            assert_eq!(summary.frame_count, 1);
            assert!(matches!(decoder.frame(0), Err(ApngError::InvalidHeader(_))));
            assert_eq!(decoder.state(), DecodeState::FirstPassComplete);
        }

        // Hidden default image covering the whole canvas
        let small = TestFrame::solid(0, 0, 1, 1, RED);
        let mut png = ApngBuilder::new();
        png.ihdr(side, 2, 8, 6, false)
            .actl(1, 0)
            .idat(&small.raw)
            .fctl(&small)
            .fdat(&small.raw)
            .iend();

        let decoder = open(&png.build(), DecodingOptions::default())?;
        assert!(matches!(decoder.default_image(), Err(ApngError::FrameDecodeError { .. })));
        assert!(matches!(decoder.frame(0), Err(ApngError::InvalidHeader(_))));

        Ok(())
    }

    #[test]
    pub fn test_duration_saturates() -> Result<(), Box<dyn std::error::Error>> {
        // 300k frames of 65535 s each overflow u64 nanoseconds
        let frames = 300_000;
        let frame = TestFrame::solid(0, 0, 1, 1, RED).delay(u16::MAX, 1);

        let mut png = ApngBuilder::new();
        png.ihdr(1, 1, 8, 6, false).actl(frames, 0);
        for _ in 0..frames {
            png.fctl(&frame);
        }
        let bytes = png.iend().build();

        let decoder = open(&bytes, DecodingOptions::default())?;
        let mut last = Duration::ZERO;
        loop {
            let progress = decoder.advance()?;
            let duration = decoder.duration();
            assert!(duration >= last);
            last = duration;

            if let Progress::Complete(summary) = progress {
                assert_eq!(summary.frame_count, frames as usize);
                assert_eq!(summary.duration, Duration::from_nanos(u64::MAX));
                break;
            }
        }

        Ok(())
    }

    #[test]
    pub fn test_last_frame_ends_at_trailing_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let red = TestFrame::solid(0, 0, 2, 2, RED);
        let green = TestFrame::solid(0, 0, 2, 2, GREEN);
        let blue = TestFrame::solid(0, 0, 2, 2, BLUE);

        let compressed = zlib(&green.raw);
        let (head, tail) = compressed.split_at(compressed.len() / 2);

        let mut png = ApngBuilder::new();
        png.ihdr(2, 2, 8, 6, false)
            .actl(3, 0)
            .fctl(&red)
            .idat(&red.raw)
            .fctl(&green)
            .fdat_compressed(head)
            .chunk(b"tEXt", b"Comment\0inside a frame")
            .fdat_compressed(tail)
            .fctl(&blue)
            .fdat(&blue.raw)
            .chunk(b"tEXt", b"Comment\0trailer");

        // Anything after the trailer is never read
        let scanned_len = png.build().len();
        let mut bytes = png.build();
        bytes.extend_from_slice(&[0, 0, 0, 64, b'I', b'D']);

        let decoder = open(&bytes, DecodingOptions::default())?;
        let summary = decoder.complete_first_pass()?;

        assert!(summary.is_complete());
        assert_eq!(decoder.bytes_consumed(), scanned_len as u64);
        assert_eq!(pixel(&decoder.frame(1)?, 1, 1), GREEN);
        assert_eq!(pixel(&decoder.frame(2)?, 0, 1), BLUE);

        Ok(())
    }

    #[test]
    pub fn test_logger_install() -> Result<(), Box<dyn std::error::Error>> {
        let _ = Logger::init(LevelFilter::Off);

        let error: Box<dyn std::error::Error> = match Logger::init(LevelFilter::Off) {
            Ok(()) => return Err("logger installed twice".into()),
            Err(e) => e.into(),
        };
        assert!(!error.to_string().is_empty());

        Ok(())
    }

    #[test]
    pub fn test_file_source() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = simple_animation();
        let path = std::env::temp_dir().join(format!("apng_stream_file_source_{}.png", std::process::id()));
        std::fs::write(&path, &bytes)?;

        let decoder = ApngDecoder::open_path(&path, DecodingOptions::default())?.animated()?;
        assert_eq!(decoder.source().path(), path.as_path());

        let frames = decode_all(&decoder)?;
        assert_eq!(pixel(&frames[1], 0, 0), GREEN);

        decoder.reset()?;
        assert_eq!(pixel(&decoder.frame(2)?, 3, 3), BLUE);

        std::fs::remove_file(&path)?;

        Ok(())
    }

    #[test]
    pub fn test_interlaced_decode() -> Result<(), Box<dyn std::error::Error>> {
        const PASSES: [(usize, usize, usize, usize); 7] = [
            (0, 0, 8, 8),
            (4, 0, 8, 8),
            (0, 4, 4, 8),
            (2, 0, 4, 4),
            (0, 2, 2, 4),
            (1, 0, 2, 2),
            (0, 1, 1, 2),
        ];

        let (width, height) = (5usize, 5usize);
        let color = |x: usize, y: usize| [(x * 50) as u8, (y * 50) as u8, ((x + y) * 20) as u8, 255];

        let mut plain = Vec::new();
        for y in 0..height {
            plain.push(0);
            for x in 0..width {
                plain.extend_from_slice(&color(x, y));
            }
        }

        let mut interlaced = Vec::new();
        for (col_start, row_start, col_delta, row_delta) in PASSES {
            if col_start >= width {
                continue;
            }
            for y in (row_start..height).step_by(row_delta) {
                interlaced.push(0);
                for x in (col_start..width).step_by(col_delta) {
                    interlaced.extend_from_slice(&color(x, y));
                }
            }
        }

        let frame = TestFrame::solid(0, 0, width as u32, height as u32, RED);
        let decode = |raw: &[u8], interlace: bool| -> Result<ImageFrame, ApngError> {
            let mut png = ApngBuilder::new();
            png.ihdr(width as u32, height as u32, 8, 6, interlace)
                .actl(1, 0)
                .fctl(&frame)
                .idat(raw)
                .iend();
            open(&png.build(), DecodingOptions::default())?.frame(0)
        };

        let expected = decode(&plain, false)?;
        let actual = decode(&interlaced, true)?;

        assert_eq!(pixel(&expected, 4, 3), color(4, 3));
        assert_eq!(actual.pixels(), expected.pixels());

        Ok(())
    }

    #[test]
    pub fn test_scanline_filters() -> Result<(), Box<dyn std::error::Error>> {
        let (width, height, bpp) = (3usize, 5usize, 4usize);
        let raw_rows: Vec<Vec<u8>> = (0..height)
            .map(|y| (0..width * bpp).map(|i| (i * 37 + y * 91 + 13) as u8).collect())
            .collect();

        let paeth = |a: u8, b: u8, c: u8| {
            let p = a as i16 + b as i16 - c as i16;
            let (pa, pb, pc) = ((p - a as i16).abs(), (p - b as i16).abs(), (p - c as i16).abs());
            if pa <= pb && pa <= pc {
                a
            } else if pb <= pc {
                b
            } else {
                c
            }
        };

        let zero = vec![0u8; width * bpp];
        let mut encoded = Vec::new();
        for (y, row) in raw_rows.iter().enumerate() {
            let prior = if y == 0 { &zero } else { &raw_rows[y - 1] };
            let filter = y as u8;
            encoded.push(filter);

            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] } else { 0 };
                let up = prior[i];
                let up_left = if i >= bpp { prior[i - bpp] } else { 0 };
                let predictor = match filter {
                    0 => 0,
                    1 => left,
                    2 => up,
                    3 => ((left as u16 + up as u16) / 2) as u8,
                    _ => paeth(left, up, up_left),
                };
                encoded.push(row[i].wrapping_sub(predictor));
            }
        }

        let frame = TestFrame::solid(0, 0, width as u32, height as u32, RED);
        let mut png = ApngBuilder::new();
        png.ihdr(width as u32, height as u32, 8, 6, false)
            .actl(1, 0)
            .fctl(&frame)
            .idat(&encoded)
            .iend();

        let decoded = open(&png.build(), DecodingOptions::default())?.frame(0)?;
        assert_eq!(decoded.pixels(), raw_rows.concat().as_slice());

        Ok(())
    }

    #[test]
    pub fn test_indexed_with_transparency() -> Result<(), Box<dyn std::error::Error>> {
        let frame = TestFrame::solid(0, 0, 4, 1, RED);
        let palette = [255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];

        let mut png = ApngBuilder::new();
        png.ihdr(4, 1, 2, 3, false)
            .chunk(b"PLTE", &palette)
            .chunk(b"tRNS", &[0])
            .actl(1, 0)
            .fctl(&frame)
            .idat(&[0, 0b00_01_10_11])
            .iend();

        let decoded = open(&png.build(), DecodingOptions::default())?.frame(0)?;
        assert_eq!(pixel(&decoded, 0, 0), [255, 0, 0, 0]);
        assert_eq!(pixel(&decoded, 1, 0), GREEN);
        assert_eq!(pixel(&decoded, 2, 0), BLUE);
        assert_eq!(pixel(&decoded, 3, 0), WHITE);

        Ok(())
    }

    #[test]
    pub fn test_sixteen_bit_grayscale() -> Result<(), Box<dyn std::error::Error>> {
        let frame = TestFrame::solid(0, 0, 2, 1, RED);

        let mut png = ApngBuilder::new();
        png.ihdr(2, 1, 16, 0, false)
            .chunk(b"tRNS", &[0x12, 0x34])
            .actl(1, 0)
            .fctl(&frame)
            .idat(&[0, 0xAB, 0xCD, 0x12, 0x34])
            .iend();

        let decoded = open(&png.build(), DecodingOptions::default())?.frame(0)?;
        assert_eq!(pixel(&decoded, 0, 0), [0xAB, 0xAB, 0xAB, 255]);
        assert_eq!(pixel(&decoded, 1, 0), [0x12, 0x12, 0x12, 0]);
        assert_eq!(decoded.as_rgb8(), vec![0xAB, 0xAB, 0xAB, 0x12, 0x12, 0x12]);

        Ok(())
    }

    #[test]
    pub fn test_frame_decode_error_is_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let red = TestFrame::solid(0, 0, 4, 4, RED);
        let broken = TestFrame::solid(0, 0, 2, 2, GREEN);
        let blue = TestFrame::solid(3, 3, 1, 1, BLUE).blend(BLEND_OVER);

        let mut png = ApngBuilder::new();
        png.ihdr(4, 4, 8, 6, false)
            .actl(3, 0)
            .fctl(&red)
            .idat(&red.raw)
            .fctl(&broken)
            .fdat_compressed(&[0xDE, 0xAD, 0xBE, 0xEF])
            .fctl(&blue)
            .fdat(&blue.raw)
            .iend();

        let decoder = open(&png.build(), DecodingOptions::default())?;

        let frame = decoder.frame(2)?;
        assert_eq!(pixel(&frame, 0, 0), RED);
        assert_eq!(pixel(&frame, 3, 3), BLUE);

        match decoder.frame(1) {
            Err(error @ ApngError::FrameDecodeError { index: 1, .. }) => assert_eq!(error.kind(), ErrorKind::Frame),
            other => panic!("unexpected result: {:?}", other.map(|frame| frame.index())),
        }

        assert_ne!(decoder.state(), DecodeState::Faulted);
        assert_eq!(pixel(&decoder.frame(0)?, 1, 1), RED);

        Ok(())
    }

    #[test]
    pub fn test_malformed_signature() -> Result<(), Box<dyn std::error::Error>> {
        let mut bytes = simple_animation();
        bytes[1] = b'X';

        let error = open_error(&bytes, DecodingOptions::default());
        assert!(matches!(error, ApngError::MalformedSignature));
        assert_eq!(error.kind(), ErrorKind::Structural);

        assert!(matches!(open_error(&[], DecodingOptions::default()), ApngError::MalformedSignature));

        Ok(())
    }

    #[test]
    pub fn test_truncated_stream() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = simple_animation();

        let error = open_error(&bytes[..20], DecodingOptions::default());
        assert!(matches!(error, ApngError::TruncatedChunk { .. }), "{:?}", error);

        // Cut inside the last fdAT
        let cut = &bytes[..bytes.len() - 20];
        let error = open_error(cut, DecodingOptions::eager());
        assert!(matches!(error, ApngError::TruncatedChunk { .. }), "{:?}", error);

        let decoder = open(cut, DecodingOptions::default())?;
        assert_eq!(pixel(&decoder.frame(0)?, 0, 0), RED);
        assert!(matches!(decoder.frame(2), Err(ApngError::TruncatedChunk { .. })));
        assert_eq!(decoder.state(), DecodeState::Faulted);
        assert!(matches!(decoder.frame(0), Err(ApngError::Faulted(_))));
        assert!(matches!(decoder.advance(), Err(ApngError::Faulted(_))));

        Ok(())
    }

    #[test]
    pub fn test_chunk_too_large() -> Result<(), Box<dyn std::error::Error>> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&0x8000_0000u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");

        let error = open_error(&bytes, DecodingOptions::default());
        assert!(matches!(error, ApngError::ChunkTooLarge { length: 0x8000_0000, .. }), "{:?}", error);

        Ok(())
    }

    #[test]
    pub fn test_crc_mismatch() -> Result<(), Box<dyn std::error::Error>> {
        let mut png = ApngBuilder::new();
        png.ihdr(2, 2, 8, 6, false).corrupt_last_crc();
        let error = open_error(&png.build(), DecodingOptions::default());
        assert!(matches!(error, ApngError::ChunkIntegrityError { .. }), "{:?}", error);

        let red = TestFrame::solid(0, 0, 2, 2, RED);
        let green = TestFrame::solid(0, 0, 2, 2, GREEN);
        let mut png = ApngBuilder::new();
        png.ihdr(2, 2, 8, 6, false)
            .actl(2, 0)
            .fctl(&red)
            .idat(&red.raw)
            .fctl(&green)
            .corrupt_last_crc()
            .fdat(&green.raw)
            .iend();

        let decoder = open(&png.build(), DecodingOptions::default())?;
        assert!(matches!(decoder.frame(1), Err(ApngError::ChunkIntegrityError { .. })));
        assert!(matches!(decoder.frame(0), Err(ApngError::Faulted(_))));

        // Reset clears the fault; the corrupt chunk is reached again
        decoder.reset()?;
        assert_eq!(decoder.state(), DecodeState::DecodingFrames);
        assert!(matches!(decoder.frame(0), Err(ApngError::ChunkIntegrityError { .. })));

        Ok(())
    }

    #[test]
    pub fn test_ancillary_crc_mismatch_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let red = TestFrame::solid(0, 0, 2, 2, RED);
        let green = TestFrame::solid(0, 0, 2, 2, GREEN);

        let mut png = ApngBuilder::new();
        png.ihdr(2, 2, 8, 6, false)
            .chunk(b"tEXt", b"Comment\0broken")
            .corrupt_last_crc()
            .actl(2, 0)
            .fctl(&red)
            .idat(&red.raw)
            .chunk(b"tEXt", b"Comment\0between frames")
            .corrupt_last_crc()
            .fctl(&green)
            .fdat(&green.raw)
            .iend();

        let decoder = open(&png.build(), DecodingOptions::eager())?;
        assert_eq!(decoder.scanned_frames(), 2);
        assert_eq!(pixel(&decoder.frame(1)?, 1, 1), GREEN);

        Ok(())
    }

    #[test]
    pub fn test_semantic_errors() -> Result<(), Box<dyn std::error::Error>> {
        let red = TestFrame::solid(0, 0, 4, 4, RED);

        // acTL ahead of IHDR
        let mut png = ApngBuilder::new();
        png.actl(1, 0);
        let error = open_error(&png.build(), DecodingOptions::default());
        assert!(matches!(error, ApngError::MissingHeader { ref found } if found == "acTL"), "{:?}", error);
        assert_eq!(error.kind(), ErrorKind::Semantic);

        let mut png = ApngBuilder::new();
        png.ihdr(4, 4, 8, 6, false).actl(2, 0).fctl(&red).idat(&red.raw).skip_sequence();
        png.fctl(&red).fdat(&red.raw).iend();
        let error = open_error(&png.build(), DecodingOptions::eager());
        assert!(
            matches!(error, ApngError::SequenceOrderError { expected: 1, found: 2 }),
            "{:?}",
            error
        );

        let outside = TestFrame::solid(3, 0, 2, 2, GREEN);
        let mut png = ApngBuilder::new();
        png.ihdr(4, 4, 8, 6, false).actl(2, 0).fctl(&red).idat(&red.raw);
        png.fctl(&outside).fdat(&outside.raw).iend();
        let error = open_error(&png.build(), DecodingOptions::eager());
        assert!(matches!(error, ApngError::InvalidFrameRect { x_offset: 3, .. }), "{:?}", error);

        // The frame that holds IDAT must cover the canvas
        let small = TestFrame::solid(0, 0, 2, 2, RED);
        let mut png = ApngBuilder::new();
        png.ihdr(4, 4, 8, 6, false).actl(1, 0).fctl(&small).idat(&small.raw).iend();
        let error = open_error(&png.build(), DecodingOptions::default());
        assert!(matches!(error, ApngError::InvalidFrameRect { .. }), "{:?}", error);

        let error = open_error(&build_apng(4, 4, 1, 0, &[red, TestFrame::solid(0, 0, 4, 4, BLUE)]), DecodingOptions::eager());
        assert!(
            matches!(error, ApngError::FrameCountMismatch { declared: 1, found: 2 }),
            "{:?}",
            error
        );

        let red = TestFrame::solid(0, 0, 4, 4, RED);
        let mut png = ApngBuilder::new();
        png.ihdr(4, 4, 8, 6, false).actl(1, 0).fctl(&red).idat(&red.raw);
        png.chunk(b"PLTE", &[0, 0, 0]).iend();
        let error = open_error(&png.build(), DecodingOptions::eager());
        assert!(matches!(error, ApngError::MisplacedChunk(_)), "{:?}", error);

        let mut header = ApngBuilder::new();
        header.ihdr(4, 4, 8, 6, false).chunk(b"acTL", &[0; 3]);
        let error = open_error(&header.build(), DecodingOptions::default());
        assert!(matches!(error, ApngError::InvalidAnimationControl(_)), "{:?}", error);

        let mut header = ApngBuilder::new();
        header.ihdr(4, 4, 8, 5, false);
        let error = open_error(&header.build(), DecodingOptions::default());
        assert!(matches!(error, ApngError::InvalidHeader(_)), "{:?}", error);

        Ok(())
    }

    #[test]
    pub fn test_writer() -> Result<(), Box<dyn std::error::Error>> {
        let decoder = open(&simple_animation(), DecodingOptions::eager())?;
        let frames = decode_all(&decoder)?;

        let dir = std::env::temp_dir().join(format!("apng_stream_writer_{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;

        let ppm = dir.join("frame.ppm");
        Writer::write_ppm(&ppm, &frames[0])?;
        let data = std::fs::read(&ppm)?;
        assert!(data.starts_with(b"P6\n4 4\n255\n"));
        assert_eq!(data.len(), 11 + 4 * 4 * 3);
        assert_eq!(&data[11..14], &[255, 0, 0]);

        let pam = dir.join("frame.pam");
        Writer::write_pam(&pam, &frames[1])?;
        let data = std::fs::read(&pam)?;
        assert!(data.starts_with(b"P7\nWIDTH 4\nHEIGHT 4\nDEPTH 3\n"));

        assert!(Writer::write_webp(&dir.join("empty.webp"), &[]).is_err());

        std::fs::remove_dir_all(&dir)?;

        Ok(())
    }
}
