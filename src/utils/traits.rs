use std::ops::Range;

pub(crate) trait SafeAccess<T> {
    fn get_range_safe(&self, range: Range<usize>) -> Result<&[T], String>;
}

impl<T> SafeAccess<T> for [T] {
    /// Safely retrieves a range of elements in a slice.
    ///
    /// # Errors
    ///
    /// Returns a description of the failed access if the range is inverted or
    /// ends past the slice.
    fn get_range_safe(&self, range: Range<usize>) -> Result<&[T], String> {
        self.get(range.clone()).ok_or_else(|| {
            format!(
                "Range {}..{} out of bounds (len {})",
                range.start,
                range.end,
                self.len()
            )
        })
    }
}
