use crate::utils::image::ImageFrame;
use std::fs::File;
use std::io::{BufWriter, Error, ErrorKind, Write};
use std::path::Path;
use webp::{AnimEncoder, AnimFrame, WebPConfig};

pub struct Writer {}

impl Writer {
    /// Writes all frames as a lossless animated WebP.
    pub fn write_webp(output_path: &Path, frames: &[ImageFrame]) -> Result<(), Error> {
        let (width, height) = Writer::validate_frames(frames)?;

        let mut config = WebPConfig::new().map_err(|_| Error::new(ErrorKind::Other, "Failed to create WebP config"))?;
        config.lossless = 1;

        let mut encoder = AnimEncoder::new(width, height, &config);

        // Every frame needs a timestamp past the previous one
        let mut timestamp_ms = 0i32;
        for frame in frames {
            encoder.add_frame(AnimFrame::from_rgba(frame.pixels(), width, height, timestamp_ms));

            let delta = frame.delay_ms().clamp(1, i32::MAX as u32) as i32;
            timestamp_ms = timestamp_ms.saturating_add(delta);
        }

        let data = encoder.encode();

        let mut file = File::create(output_path)?;
        file.write_all(&data)?;

        Ok(())
    }

    /// Writes one frame as binary PPM, dropping alpha.
    pub fn write_ppm(output_path: &Path, frame: &ImageFrame) -> Result<(), Error> {
        Writer::validate_frames(std::slice::from_ref(frame))?;

        let mut file = BufWriter::new(File::create(output_path)?);

        file.write_all(b"P6\n")?;
        file.write_all(format!("{} {}\n", frame.width(), frame.height()).as_bytes())?;
        file.write_all(b"255\n")?;
        file.write_all(&frame.as_rgb8())?;
        file.flush()?;

        Ok(())
    }

    /// Writes one frame as PAM, keeping alpha when the frame has any.
    pub fn write_pam(output_path: &Path, frame: &ImageFrame) -> Result<(), Error> {
        Writer::validate_frames(std::slice::from_ref(frame))?;

        let mut file = BufWriter::new(File::create(output_path)?);

        file.write_all(b"P7\n")?;
        file.write_all(format!("WIDTH {}\n", frame.width()).as_bytes())?;
        file.write_all(format!("HEIGHT {}\n", frame.height()).as_bytes())?;

        if frame.has_alpha() {
            file.write_all(b"DEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n")?;
            file.write_all(frame.pixels())?;
        } else {
            file.write_all(b"DEPTH 3\nMAXVAL 255\nTUPLTYPE RGB\nENDHDR\n")?;
            file.write_all(&frame.as_rgb8())?;
        }
        file.flush()?;

        Ok(())
    }

    /// Writes each frame to `<stem>_frame_<n>.png` next to `output_path`.
    pub fn write_png_frames(output_path: &Path, frames: &[ImageFrame]) -> Result<(), Error> {
        Writer::validate_frames(frames)?;

        let output_dir = output_path.parent().unwrap_or_else(|| Path::new("."));
        let stem = output_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "Invalid output file name"))?;

        for frame in frames {
            let path = output_dir.join(format!("{}_frame_{}.png", stem, frame.index()));

            image::save_buffer(&path, frame.pixels(), frame.width(), frame.height(), image::ColorType::Rgba8)
                .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
        }

        Ok(())
    }

    /// Checks that there is something to write and that every buffer matches
    /// the first frame's size. Returns that size.
    fn validate_frames(frames: &[ImageFrame]) -> Result<(u32, u32), Error> {
        let Some(first) = frames.first() else {
            return Err(Error::new(ErrorKind::InvalidInput, "No frames to write"));
        };

        let width = first.width();
        let height = first.height();
        let expected_size = width as usize * height as usize * 4;

        for frame in frames {
            let actual_size = frame.pixels().len();

            if frame.width() != width || frame.height() != height || actual_size != expected_size {
                let msg = format!(
                    "Invalid pixel data size for frame {} ({}x{}): expected {} bytes, got {}",
                    frame.index(),
                    frame.width(),
                    frame.height(),
                    expected_size,
                    actual_size
                );

                return Err(Error::new(ErrorKind::InvalidData, msg));
            }
        }

        Ok((width, height))
    }
}
