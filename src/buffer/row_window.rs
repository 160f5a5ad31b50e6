//! Contiguous row window
//!
//! When row mode is active the engine keeps a band of `max_rows`
//! consecutive rows resident across *every* column, one segment per
//! column. Accesses that walk along rows then hit memory instead of
//! faulting a whole column per cell.
//!
//! The window never owns file handles; loading and flushing go through
//! the [`ColumnFile`] list the engine passes in. At load time the column
//! cache is authoritative for any column it holds, so freshly read
//! segments are overwritten from the cache copy before use.

use crate::storage::ColumnFile;
use crate::Result;

use super::ColumnCache;

/// Resident band of rows `[first_row, first_row + height)` across all
/// columns.
pub struct RowWindow {
    first_row: usize,
    /// One segment per column, each exactly `height` values.
    segments: Vec<Vec<f64>>,
    height: usize,
}

impl RowWindow {
    /// Allocate a zero-filled window of `height` rows over `cols` columns,
    /// positioned at row 0.
    pub fn new(height: usize, cols: usize) -> Self {
        Self {
            first_row: 0,
            segments: (0..cols).map(|_| vec![0.0; height]).collect(),
            height,
        }
    }

    /// First matrix row held by the window.
    pub fn first_row(&self) -> usize {
        self.first_row
    }

    /// Number of rows the window holds.
    pub fn height(&self) -> usize {
        self.height
    }

    /// True if matrix row `row` is inside the window.
    pub fn contains(&self, row: usize) -> bool {
        row >= self.first_row && row < self.first_row + self.height
    }

    /// Value at an absolute matrix position. The row must be inside the
    /// window.
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.segments[col][row - self.first_row]
    }

    /// Mutable cell at an absolute matrix position.
    pub fn cell_mut(&mut self, row: usize, col: usize) -> &mut f64 {
        &mut self.segments[col][row - self.first_row]
    }

    /// Reposition the window so that `row` is resident and refill every
    /// segment from disk.
    ///
    /// The window is anchored at `row` but clamped so it never extends past
    /// the last matrix row. Segments of columns currently held by `cache`
    /// are then overwritten from the cache copy, which is authoritative
    /// until written back.
    pub fn load_at(
        &mut self,
        files: &[ColumnFile],
        total_rows: usize,
        row: usize,
        cache: &ColumnCache,
    ) -> Result<()> {
        self.first_row = row.min(total_rows.saturating_sub(self.height));

        for (segment, file) in self.segments.iter_mut().zip(files) {
            file.read_slice(self.first_row, segment)?;
        }

        for slot in cache.iter() {
            if let Some(segment) = self.segments.get_mut(slot.col) {
                let band = &slot.data[self.first_row..self.first_row + self.height];
                segment.copy_from_slice(band);
            }
        }

        log::debug!(
            "row window loaded at rows [{}, {})",
            self.first_row,
            self.first_row + self.height
        );
        Ok(())
    }

    /// Write every segment back to its file at the current position.
    pub fn flush(&self, files: &[ColumnFile]) -> Result<()> {
        for (segment, file) in self.segments.iter().zip(files) {
            file.write_slice(self.first_row, segment)?;
        }
        Ok(())
    }

    /// Extend the window with a zero-filled segment for a newly appended
    /// column.
    pub fn append_column(&mut self) {
        self.segments.push(vec![0.0; self.height]);
    }

    /// Reallocate every segment for a new height.
    ///
    /// Contents are discarded; the caller flushes beforehand and reloads
    /// afterwards.
    pub fn resize(&mut self, new_height: usize) {
        for segment in &mut self.segments {
            segment.clear();
            segment.resize(new_height, 0.0);
        }
        self.height = new_height;
    }

    /// Bytes of value storage held by the window.
    pub fn bytes_in_use(&self) -> usize {
        self.segments.len() * self.height * std::mem::size_of::<f64>()
    }
}
