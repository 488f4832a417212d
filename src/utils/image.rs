use crate::decoders::container::FrameControl;
use std::sync::Arc;
use std::time::Duration;

fn drop_transparency_channel(pixels: &[u8]) -> Vec<u8> {
    pixels.chunks_exact(4).flat_map(|chunk| [chunk[0], chunk[1], chunk[2]]).collect()
}

/// A composited animation frame. Always covers the full canvas, RGBA8,
/// non-premultiplied alpha. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    index: usize,
    width: u32,
    height: u32,
    control: FrameControl,
    pixels: Arc<[u8]>,
}

impl ImageFrame {
    pub(crate) fn new(index: usize, width: u32, height: u32, control: FrameControl, pixels: Arc<[u8]>) -> ImageFrame {
        ImageFrame {
            index,
            width,
            height,
            control,
            pixels,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn control(&self) -> &FrameControl {
        &self.control
    }

    pub fn delay(&self) -> Duration {
        self.control.delay()
    }

    /// Delay in whole milliseconds.
    pub fn delay_ms(&self) -> u32 {
        self.control.delay().as_millis().min(u32::MAX as u128) as u32
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Returns `true` if any pixel is not fully opaque.
    pub fn has_alpha(&self) -> bool {
        self.pixels.chunks_exact(4).any(|pixel| pixel[3] != 255)
    }

    pub fn as_rgba8(&self) -> Vec<u8> {
        self.pixels.to_vec()
    }

    pub fn as_rgb8(&self) -> Vec<u8> {
        drop_transparency_channel(&self.pixels)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let start = (y as usize * self.width as usize + x as usize) * 4;
        let pixel = self.pixels.get(start..start + 4)?;

        Some([pixel[0], pixel[1], pixel[2], pixel[3]])
    }
}
