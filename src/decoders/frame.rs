use crate::decoders::container::{BlendOp, ColorType, ContainerInfo, DisposeOp, FrameControl, ImageHeader, Transparency};
use crate::utils::error::{ApngError, ApngResult};
use crate::utils::traits::SafeAccess;
use flate2::read::ZlibDecoder;
use std::io::Read;
use std::sync::Arc;

/// Largest RGBA8 buffer a canvas or subimage may need.
pub const MAX_IMAGE_BYTES: usize = 1 << 30;

const ADAM7_COL_START: [usize; 7] = [0, 4, 0, 2, 0, 1, 0];
const ADAM7_ROW_START: [usize; 7] = [0, 0, 4, 0, 2, 0, 1];
const ADAM7_COL_DELTA: [usize; 7] = [8, 8, 4, 4, 2, 2, 1];
const ADAM7_ROW_DELTA: [usize; 7] = [8, 8, 8, 4, 4, 2, 2];

#[derive(Debug, Clone, Copy, PartialEq)]
enum FilterType {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

impl Rect {
    fn of(control: &FrameControl) -> Rect {
        Rect {
            x: control.x_offset as usize,
            y: control.y_offset as usize,
            width: control.width as usize,
            height: control.height as usize,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingDisposal {
    rect: Rect,
    op: DisposeOp,
    /// Canvas content of `rect` before the frame was drawn.
    saved: Option<Vec<u8>>,
}

/// The full-size RGBA8 output buffer frames are composited onto, plus the
/// disposal still owed by the last frame drawn.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: usize,
    height: usize,
    /// Empty until the first frame is composited.
    pixels: Vec<u8>,
    pending: Option<PendingDisposal>,
}

impl Canvas {
    pub fn new(header: &ImageHeader) -> Self {
        Self {
            width: header.width as usize,
            height: header.height as usize,
            pixels: Vec::new(),
            pending: None,
        }
    }

    pub fn allocate(&mut self) -> ApngResult<()> {
        if self.pixels.is_empty() {
            let len = rgba_len(self.width, self.height).map_err(ApngError::InvalidHeader)?;
            self.pixels = vec![0; len];
        }

        Ok(())
    }

    /// Back to the state before frame 0: fully transparent black.
    pub fn clear(&mut self) {
        self.pixels.fill(0);
        self.pending = None;
    }

    /// Continues from a previously composited frame. Only valid for frames
    /// that do not dispose to previous, whose prior content is not kept.
    pub fn resume_from(&mut self, pixels: &[u8], control: &FrameControl) -> bool {
        if control.dispose_op == DisposeOp::Previous || pixels.len() != self.pixels.len() {
            return false;
        }

        self.pixels.copy_from_slice(pixels);
        self.pending = Some(PendingDisposal {
            rect: Rect::of(control),
            op: control.dispose_op,
            saved: None,
        });

        true
    }

    fn apply_pending_disposal(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        match pending.op {
            DisposeOp::None => {}
            DisposeOp::Background => {
                for y in pending.rect.y..pending.rect.y + pending.rect.height {
                    let start = (y * self.width + pending.rect.x) * 4;
                    self.pixels[start..start + pending.rect.width * 4].fill(0);
                }
            }
            DisposeOp::Previous => {
                if let Some(saved) = pending.saved {
                    self.write_rect(&pending.rect, &saved);
                }
            }
        }
    }

    fn copy_rect(&self, rect: &Rect) -> Vec<u8> {
        let row_bytes = rect.width * 4;
        let mut out = Vec::with_capacity(row_bytes * rect.height);

        for y in rect.y..rect.y + rect.height {
            let start = (y * self.width + rect.x) * 4;
            out.extend_from_slice(&self.pixels[start..start + row_bytes]);
        }

        out
    }

    fn write_rect(&mut self, rect: &Rect, data: &[u8]) {
        let row_bytes = rect.width * 4;

        for (row, y) in (rect.y..rect.y + rect.height).enumerate() {
            let start = (y * self.width + rect.x) * 4;
            self.pixels[start..start + row_bytes].copy_from_slice(&data[row * row_bytes..(row + 1) * row_bytes]);
        }
    }

    fn blend(&mut self, rect: &Rect, blend_op: BlendOp, frame_data: &[u8]) {
        if blend_op == BlendOp::Source {
            self.write_rect(rect, frame_data);
            return;
        }

        for y in 0..rect.height {
            let frame_row_start = y * rect.width * 4;
            let output_row_start = ((y + rect.y) * self.width + rect.x) * 4;

            for x in 0..rect.width {
                let src = &frame_data[frame_row_start + x * 4..frame_row_start + x * 4 + 4];
                let dst = &mut self.pixels[output_row_start + x * 4..output_row_start + x * 4 + 4];
                blend_over(src, dst);
            }
        }
    }
}

/// Straight-alpha "over" with integer arithmetic so results are exact and
/// repeatable.
fn blend_over(src: &[u8], dst: &mut [u8]) {
    let src_a = src[3] as u32;

    if src_a == 255 {
        dst.copy_from_slice(src);
        return;
    }

    if src_a == 0 {
        return;
    }

    let dst_a = dst[3] as u32;
    let dst_weight = dst_a * (255 - src_a);
    let out_a = src_a * 255 + dst_weight;

    for i in 0..3 {
        let blended = (src[i] as u32 * src_a * 255 + dst[i] as u32 * dst_weight) / out_a;
        dst[i] = blended as u8;
    }

    dst[3] = ((out_a + 127) / 255) as u8;
}

fn rgba_len(width: usize, height: usize) -> Result<usize, String> {
    width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(4))
        .filter(|&len| len <= MAX_IMAGE_BYTES)
        .ok_or_else(|| format!("{}x{} exceeds the {} byte image limit", width, height, MAX_IMAGE_BYTES))
}

/// Decompresses frame data and composites it onto a [`Canvas`].
pub struct FrameDecoder<'a> {
    info: &'a ContainerInfo,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(info: &'a ContainerInfo) -> Self {
        Self { info }
    }

    /// Decodes frame `index` onto `canvas` and returns the full canvas.
    ///
    /// The previous frame's disposal is applied first. On failure the canvas
    /// is left as if this frame drew nothing, and its own disposal is still
    /// queued, so later frames can be decoded.
    pub fn decode(&self, index: usize, control: &FrameControl, compressed: &[u8], canvas: &mut Canvas) -> ApngResult<Arc<[u8]>> {
        canvas.allocate()?;
        canvas.apply_pending_disposal();

        let rect = Rect::of(control);
        let op = match control.dispose_op {
            // Nothing to restore before the first frame
            DisposeOp::Previous if index == 0 => DisposeOp::Background,
            op => op,
        };
        let saved = (op == DisposeOp::Previous).then(|| canvas.copy_rect(&rect));

        let result = self.decode_subimage(control.width, control.height, compressed);

        canvas.pending = Some(PendingDisposal { rect, op, saved });

        let subimage = result.map_err(|reason| ApngError::FrameDecodeError { index, reason })?;
        canvas.blend(&rect, control.blend_op, &subimage);

        Ok(Arc::from(canvas.pixels.as_slice()))
    }

    /// Decodes the image data that precedes the first fcTL as a full canvas.
    pub fn decode_default_image(&self, compressed: &[u8]) -> ApngResult<Vec<u8>> {
        let header = &self.info.header;

        self.decode_subimage(header.width, header.height, compressed)
            .map_err(|reason| ApngError::FrameDecodeError { index: 0, reason })
    }

    /// Inflates, unfilters and expands a `width` x `height` image to RGBA8.
    fn decode_subimage(&self, width: u32, height: u32, compressed: &[u8]) -> Result<Vec<u8>, String> {
        let width = width as usize;
        let height = height as usize;
        let output_len = rgba_len(width, height)?;
        let expected = self.encoded_len(width, height);

        let mut decompressed = Vec::with_capacity(expected);
        ZlibDecoder::new(compressed)
            .take(expected as u64)
            .read_to_end(&mut decompressed)
            .map_err(|e| format!("inflate failed: {}", e))?;

        if decompressed.len() < expected {
            return Err(format!("image data too short: {} bytes, expected {}", decompressed.len(), expected));
        }

        let mut output = vec![0u8; output_len];

        if !self.info.header.interlaced {
            let rows = self.unfilter_scanlines(&decompressed, width, height)?;
            let row_bytes = self.row_bytes(width);

            for (y, row) in rows.chunks_exact(row_bytes).enumerate() {
                self.expand_row(row, &mut output[y * width * 4..(y + 1) * width * 4])?;
            }

            return Ok(output);
        }

        let mut data_offset = 0;
        for pass in 0..7 {
            let (pass_width, pass_height) = adam7_pass_size(pass, width, height);
            if pass_width == 0 || pass_height == 0 {
                continue;
            }

            let pass_size = (self.row_bytes(pass_width) + 1) * pass_height;
            let pass_data = decompressed.get_range_safe(data_offset..data_offset + pass_size)?;
            let rows = self.unfilter_scanlines(pass_data, pass_width, pass_height)?;
            let mut pass_pixels = vec![0u8; pass_width * 4];

            for (row_index, row) in rows.chunks_exact(self.row_bytes(pass_width)).enumerate() {
                self.expand_row(row, &mut pass_pixels)?;

                let out_y = row_index * ADAM7_ROW_DELTA[pass] + ADAM7_ROW_START[pass];
                for col in 0..pass_width {
                    let out_x = col * ADAM7_COL_DELTA[pass] + ADAM7_COL_START[pass];
                    let out_pos = (out_y * width + out_x) * 4;
                    output[out_pos..out_pos + 4].copy_from_slice(&pass_pixels[col * 4..col * 4 + 4]);
                }
            }

            data_offset += pass_size;
        }

        Ok(output)
    }

    fn row_bytes(&self, width: usize) -> usize {
        (width * self.info.header.bits_per_pixel() + 7) / 8
    }

    /// Size of the filtered, possibly interlaced, image data.
    fn encoded_len(&self, width: usize, height: usize) -> usize {
        if !self.info.header.interlaced {
            return (self.row_bytes(width) + 1) * height;
        }

        (0..7)
            .map(|pass| adam7_pass_size(pass, width, height))
            .filter(|(w, h)| *w > 0 && *h > 0)
            .map(|(w, h)| (self.row_bytes(w) + 1) * h)
            .sum()
    }

    fn unfilter_scanlines(&self, data: &[u8], width: usize, height: usize) -> Result<Vec<u8>, String> {
        let bytes_per_pixel = (self.info.header.bits_per_pixel() + 7) / 8;
        let bytes_per_row = self.row_bytes(width);
        let scanline_bytes = 1 + bytes_per_row;

        let mut unfiltered = vec![0u8; bytes_per_row * height];
        let zero_row = vec![0u8; bytes_per_row];

        for y in 0..height {
            let scanline = data.get_range_safe(y * scanline_bytes..(y + 1) * scanline_bytes)?;

            let filter_type = match scanline[0] {
                0 => FilterType::None,
                1 => FilterType::Sub,
                2 => FilterType::Up,
                3 => FilterType::Average,
                4 => FilterType::Paeth,
                other => return Err(format!("invalid filter type {} on row {}", other, y)),
            };

            let (done, rest) = unfiltered.split_at_mut(y * bytes_per_row);
            let prior = if y == 0 { &zero_row[..] } else { &done[(y - 1) * bytes_per_row..] };
            let decoded = &mut rest[..bytes_per_row];
            let filtered = &scanline[1..];

            match filter_type {
                FilterType::None => decoded.copy_from_slice(filtered),
                FilterType::Sub => decode_sub_filter(filtered, decoded, bytes_per_pixel),
                FilterType::Up => decode_up_filter(filtered, decoded, prior),
                FilterType::Average => decode_average_filter(filtered, decoded, prior, bytes_per_pixel),
                FilterType::Paeth => decode_paeth_filter(filtered, decoded, prior, bytes_per_pixel),
            }
        }

        Ok(unfiltered)
    }

    /// Converts one unfiltered row to RGBA8 pixels.
    fn expand_row(&self, row: &[u8], out: &mut [u8]) -> Result<(), String> {
        let header = &self.info.header;
        let depth = header.bit_depth as usize;
        let width = out.len() / 4;
        let channels = header.color_type.channels();
        let transparency = self.info.transparency.as_ref();

        for x in 0..width {
            let pixel = &mut out[x * 4..x * 4 + 4];
            let at = x * channels;

            match header.color_type {
                ColorType::Grayscale => {
                    let value = sample(row, at, depth);
                    let gray = to_u8(value, depth);
                    let alpha = match transparency {
                        Some(Transparency::Grayscale(key)) if *key == value => 0,
                        _ => 255,
                    };
                    pixel.copy_from_slice(&[gray, gray, gray, alpha]);
                }
                ColorType::Rgb => {
                    let (r, g, b) = (sample(row, at, depth), sample(row, at + 1, depth), sample(row, at + 2, depth));
                    let alpha = match transparency {
                        Some(Transparency::Rgb(kr, kg, kb)) if (*kr, *kg, *kb) == (r, g, b) => 0,
                        _ => 255,
                    };
                    pixel.copy_from_slice(&[to_u8(r, depth), to_u8(g, depth), to_u8(b, depth), alpha]);
                }
                ColorType::Indexed => {
                    let index = sample(row, at, depth) as usize;
                    let palette = self.info.palette.as_deref().unwrap_or(&[]);
                    let color = palette
                        .get(index)
                        .ok_or_else(|| format!("palette index {} out of range ({} entries)", index, palette.len()))?;
                    let alpha = match transparency {
                        Some(Transparency::Palette(alphas)) => alphas.get(index).copied().unwrap_or(255),
                        _ => 255,
                    };
                    pixel.copy_from_slice(&[color[0], color[1], color[2], alpha]);
                }
                ColorType::GrayscaleAlpha => {
                    let gray = to_u8(sample(row, at, depth), depth);
                    let alpha = to_u8(sample(row, at + 1, depth), depth);
                    pixel.copy_from_slice(&[gray, gray, gray, alpha]);
                }
                ColorType::Rgba => {
                    for (c, channel) in pixel.iter_mut().enumerate() {
                        *channel = to_u8(sample(row, at + c, depth), depth);
                    }
                }
            }
        }

        Ok(())
    }
}

fn adam7_pass_size(pass: usize, width: usize, height: usize) -> (usize, usize) {
    let pass_width = (width + ADAM7_COL_DELTA[pass] - 1 - ADAM7_COL_START[pass]) / ADAM7_COL_DELTA[pass];
    let pass_height = (height + ADAM7_ROW_DELTA[pass] - 1 - ADAM7_ROW_START[pass]) / ADAM7_ROW_DELTA[pass];

    (pass_width, pass_height)
}

/// Reads the `index`th sample of a row, big-endian, MSB-first for packed depths.
fn sample(row: &[u8], index: usize, depth: usize) -> u16 {
    match depth {
        16 => u16::from_be_bytes([row[index * 2], row[index * 2 + 1]]),
        8 => row[index] as u16,
        _ => {
            let bit = index * depth;
            let shift = 8 - depth - (bit % 8);
            let mask = (1u16 << depth) - 1;
            ((row[bit / 8] as u16) >> shift) & mask
        }
    }
}

fn to_u8(value: u16, depth: usize) -> u8 {
    match depth {
        16 => (value >> 8) as u8,
        8 => value as u8,
        _ => (value * 255 / ((1u16 << depth) - 1)) as u8,
    }
}

fn decode_sub_filter(src: &[u8], dst: &mut [u8], bytes_per_pixel: usize) {
    for i in 0..src.len() {
        let left = if i >= bytes_per_pixel { dst[i - bytes_per_pixel] } else { 0 };
        dst[i] = src[i].wrapping_add(left);
    }
}

fn decode_up_filter(src: &[u8], dst: &mut [u8], prior: &[u8]) {
    for i in 0..src.len() {
        dst[i] = src[i].wrapping_add(prior[i]);
    }
}

fn decode_average_filter(src: &[u8], dst: &mut [u8], prior: &[u8], bytes_per_pixel: usize) {
    for i in 0..src.len() {
        let left = if i >= bytes_per_pixel { dst[i - bytes_per_pixel] as u16 } else { 0 };
        let above = prior[i] as u16;
        dst[i] = src[i].wrapping_add(((left + above) >> 1) as u8);
    }
}

fn decode_paeth_filter(src: &[u8], dst: &mut [u8], prior: &[u8], bytes_per_pixel: usize) {
    for i in 0..src.len() {
        let (left, upper_left) = if i >= bytes_per_pixel {
            (dst[i - bytes_per_pixel], prior[i - bytes_per_pixel])
        } else {
            (0, 0)
        };

        dst[i] = src[i].wrapping_add(paeth_predictor(left, prior[i], upper_left));
    }
}

fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    // a = left, b = above, c = upper left
    let a = a as i16;
    let b = b as i16;
    let c = c as i16;

    let p = a + b - c;        // Initial estimate
    let pa = (p - a).abs();   // Distance to a
    let pb = (p - b).abs();   // Distance to b
    let pc = (p - c).abs();   // Distance to c

    if pa <= pb && pa <= pc {
        a as u8
    } else if pb <= pc {
        b as u8
    } else {
        c as u8
    }
}
