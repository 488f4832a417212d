/// Decode strategy switches. Every combination is valid; the default (all
/// `false`) is the fully incremental, most memory-conservative behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodingOptions {
    /// Resolve the metadata of every frame before `open` returns.
    pub full_first_pass: bool,
    /// Copy each frame's compressed data into memory during the first pass
    /// instead of re-reading it from the source when the frame is decoded.
    pub load_frame_data: bool,
    /// Keep decoded bitmaps so repeated requests do not decode again.
    pub cache_decoded_images: bool,
    /// Decode and keep every frame's bitmap while the first pass runs.
    pub preload_all_frames: bool,
}

impl DecodingOptions {
    /// Everything up front: full scan, data in memory, all frames decoded.
    pub fn eager() -> Self {
        Self {
            full_first_pass: true,
            load_frame_data: true,
            cache_decoded_images: true,
            preload_all_frames: true,
        }
    }

    /// All sixteen flag combinations, in bitmask order.
    pub fn all_combinations() -> impl Iterator<Item = DecodingOptions> {
        (0u8..16).map(|bits| Self {
            full_first_pass: bits & 1 != 0,
            load_frame_data: bits & 2 != 0,
            cache_decoded_images: bits & 4 != 0,
            preload_all_frames: bits & 8 != 0,
        })
    }

    pub(crate) fn retains_bitmaps(&self) -> bool {
        self.cache_decoded_images || self.preload_all_frames
    }
}
