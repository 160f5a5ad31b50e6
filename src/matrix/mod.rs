//! Buffered matrix engine
//!
//! [`BufferedMatrix`] is the public face of the crate: a dense `f64`
//! matrix with one file per column and a bounded resident set. Every cell
//! access is routed through the same path, in order of preference:
//!
//! 1. the row window, when row mode is active;
//! 2. the column cache;
//! 3. disk, faulting the column (and, in row mode, the surrounding row
//!    band) into the buffers first.
//!
//! A cell can be resident in both buffers at once. The engine tracks the
//! most recent such cell; the row window copy is authoritative until the
//! pending record is reconciled back into the cache, which happens lazily
//! before anything could observe or destroy the stale copy.
//!
//! In read-only mode all mutation is refused and evictions skip
//! write-back: the files are already authoritative.

pub mod aggregate;

use std::path::{Path, PathBuf};

use crate::buffer::{CacheSlot, ColumnCache, RowWindow};
use crate::storage::ColumnFile;
use crate::{MatrixError, Result};

/// Out-of-core matrix of doubles with file-backed columns.
///
/// The row count is set once with [`set_rows`](Self::set_rows); columns
/// are then added one at a time with
/// [`append_column`](Self::append_column), each backed by a fresh
/// zero-filled file. Cell reads take `&mut self` because a miss faults
/// data into the buffers.
///
/// Dropping the matrix removes every owned file.
pub struct BufferedMatrix {
    rows: usize,
    cols: usize,
    /// Height of the row window (or the height it would have, while in
    /// column mode).
    max_rows: usize,
    cache: ColumnCache,
    /// Present iff row mode is active.
    window: Option<RowWindow>,
    /// Most recent cell served from the row window while its column was
    /// also cached. The window copy is authoritative until reconciled.
    clash: Option<(usize, usize)>,
    read_only: bool,
    prefix: String,
    directory: PathBuf,
    files: Vec<ColumnFile>,
}

impl BufferedMatrix {
    /// Create an empty matrix.
    ///
    /// `max_rows` bounds the row window, `max_cols` the column cache; both
    /// must be at least 1. `prefix` and `directory` control where the
    /// per-column files are minted.
    pub fn new(
        max_rows: usize,
        max_cols: usize,
        prefix: &str,
        directory: impl AsRef<Path>,
    ) -> Result<Self> {
        if max_rows == 0 || max_cols == 0 {
            return Err(MatrixError::InvalidBufferSize);
        }
        Ok(Self {
            rows: 0,
            cols: 0,
            max_rows,
            cache: ColumnCache::new(max_cols),
            window: None,
            clash: None,
            read_only: false,
            prefix: prefix.to_string(),
            directory: directory.as_ref().to_path_buf(),
            files: Vec::new(),
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Column cache capacity.
    pub fn buffer_cols(&self) -> usize {
        self.cache.capacity()
    }

    /// Row window height (the configured height while in column mode).
    pub fn buffer_rows(&self) -> usize {
        self.max_rows
    }

    /// True when the row window is active.
    pub fn is_row_mode(&self) -> bool {
        self.window.is_some()
    }

    /// True when mutation is disabled.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Prefix used for minting new column files.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Change the file name prefix. Takes effect for files minted later;
    /// existing files keep their names.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.to_string();
    }

    /// Directory holding the column files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file backing column `col`.
    pub fn file_name(&self, col: usize) -> Result<&Path> {
        if col >= self.cols {
            return Err(MatrixError::ColumnOutOfBounds {
                col,
                cols: self.cols,
            });
        }
        Ok(self.files[col].path())
    }

    /// Fix the number of rows. Succeeds exactly once, with a positive
    /// count, and must precede the first [`append_column`](Self::append_column).
    pub fn set_rows(&mut self, rows: usize) -> Result<()> {
        if self.rows > 0 {
            return Err(MatrixError::RowsAlreadySet(self.rows));
        }
        if rows == 0 {
            return Err(MatrixError::InvalidRowCount);
        }
        self.rows = rows;
        if self.max_rows > rows {
            self.max_rows = rows;
            if let Some(window) = &mut self.window {
                window.resize(self.max_rows);
            }
        }
        Ok(())
    }

    /// Append one zero-filled column.
    ///
    /// The new column becomes the newest cache entry, evicting the oldest
    /// resident column if the cache is full, and extends the row window by
    /// one zero segment when row mode is active. A failure never advances
    /// the matrix dimensions.
    pub fn append_column(&mut self) -> Result<()> {
        if self.rows == 0 {
            return Err(MatrixError::RowsNotSet);
        }
        self.reconcile_clash();

        // Make room first: the victim is written back before the new file
        // exists, so an I/O failure leaves the dimensions untouched.
        let recycled = match self.cache.pop_oldest_if_full() {
            Some(victim) => {
                if !self.read_only {
                    self.files[victim.col].write_all(&victim.data)?;
                }
                let mut data = victim.data;
                data.fill(0.0);
                Some(data)
            }
            None => None,
        };

        let file = ColumnFile::create_zeroed(&self.directory, &self.prefix, self.rows)?;

        let col = self.cols;
        let data = recycled.unwrap_or_else(|| vec![0.0; self.rows]);
        self.cache.push_newest(CacheSlot { col, data });
        if let Some(window) = &mut self.window {
            window.append_column();
        }
        self.files.push(file);
        self.cols += 1;
        Ok(())
    }

    /// Resize both buffers.
    pub fn resize_buffer(&mut self, new_max_rows: usize, new_max_cols: usize) -> Result<()> {
        self.resize_col_buffer(new_max_cols)?;
        self.resize_row_buffer(new_max_rows)
    }

    /// Resize the column cache.
    ///
    /// Shrinking writes back and discards the oldest resident columns;
    /// growing faults additional columns in ascending index order until
    /// the new capacity is reached or every column is resident.
    pub fn resize_col_buffer(&mut self, new_max_cols: usize) -> Result<()> {
        if new_max_cols == 0 {
            return Err(MatrixError::InvalidBufferSize);
        }
        self.reconcile_clash();

        if new_max_cols < self.cache.capacity() {
            while self.cache.len() > new_max_cols {
                if !self.read_only {
                    self.flush_oldest_column()?;
                }
                self.cache.pop_oldest();
            }
            self.cache.set_capacity(new_max_cols);
        } else if new_max_cols > self.cache.capacity() {
            // The window may hold writes for columns that are not cached
            // (those leave no clash record); the files must be current
            // before they are read back below.
            if !self.read_only {
                self.flush_window()?;
            }
            self.cache.set_capacity(new_max_cols);
            for col in 0..self.cols {
                if self.cache.is_full() {
                    break;
                }
                if self.cache.locate(col).is_none() {
                    let mut data = vec![0.0; self.rows];
                    self.files[col].read_all(&mut data)?;
                    self.cache.push_newest(CacheSlot { col, data });
                }
            }
        }
        Ok(())
    }

    /// Resize the row window.
    ///
    /// In column mode only the configured height changes. In row mode the
    /// window is flushed, reallocated, repositioned so it still fits
    /// inside the matrix, and reloaded.
    pub fn resize_row_buffer(&mut self, new_max_rows: usize) -> Result<()> {
        if new_max_rows == 0 {
            return Err(MatrixError::InvalidBufferSize);
        }
        let clamped = if self.rows > 0 {
            new_max_rows.min(self.rows)
        } else {
            new_max_rows
        };

        if self.window.is_none() || self.max_rows == clamped {
            self.max_rows = clamped;
            return Ok(());
        }

        self.reconcile_clash();
        self.flush_window()?;
        let anchor = self.window.as_ref().map_or(0, RowWindow::first_row);
        if let Some(window) = &mut self.window {
            window.resize(clamped);
        }
        self.max_rows = clamped;
        // load_at clamps the anchor so the resized window stays in bounds
        self.load_window_at(anchor)
    }

    /// Switch the row window on or off. A no-op when already in the
    /// requested mode.
    pub fn set_row_mode(&mut self, on: bool) -> Result<()> {
        if on == self.is_row_mode() {
            return Ok(());
        }
        if on {
            self.window = Some(RowWindow::new(self.max_rows, self.cols));
            self.load_window_at(0)?;
            log::debug!(
                "row mode on: {} rows resident across {} columns",
                self.max_rows,
                self.cols
            );
        } else {
            self.reconcile_clash();
            self.flush_window()?;
            self.window = None;
            log::debug!("row mode off");
        }
        Ok(())
    }

    /// Switch read-only mode on or off.
    ///
    /// Turning it on first flushes both buffers so the files become
    /// authoritative; later evictions can then discard without writing.
    /// Turning it off is flag-only.
    pub fn set_read_only(&mut self, on: bool) -> Result<()> {
        if on && !self.read_only {
            self.reconcile_clash();
            self.flush_window()?;
            self.flush_all_columns()?;
        }
        self.read_only = on;
        Ok(())
    }

    /// Move every column file into `new_directory`, minting fresh names
    /// with the current prefix.
    pub fn move_directory(&mut self, new_directory: impl AsRef<Path>) -> Result<()> {
        let new_directory = new_directory.as_ref();
        for file in &mut self.files {
            file.move_to(new_directory, &self.prefix)?;
        }
        self.directory = new_directory.to_path_buf();
        Ok(())
    }

    /// Read the cell at `(row, col)`.
    pub fn get(&mut self, row: usize, col: usize) -> Result<f64> {
        self.check_cell(row, col)?;
        let value = self.cell(row, col)?;
        if self.read_only && self.is_row_mode() {
            // a read-only access cannot diverge, nothing to reconcile
            self.clash = None;
        }
        Ok(value)
    }

    /// Write the cell at `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        if self.read_only {
            return Err(MatrixError::ReadOnly);
        }
        self.check_cell(row, col)?;
        *self.cell_mut(row, col)? = value;
        Ok(())
    }

    /// Read by single index, where `index = col * rows + row`.
    pub fn get_single_index(&mut self, index: usize) -> Result<f64> {
        let (row, col) = self.split_index(index)?;
        self.get(row, col)
    }

    /// Write by single index, where `index = col * rows + row`.
    pub fn set_single_index(&mut self, index: usize, value: f64) -> Result<()> {
        let (row, col) = self.split_index(index)?;
        self.set(row, col, value)
    }

    /// Read whole columns into `out`, column-major: the values of
    /// `columns[k]` land in `out[k * rows .. (k + 1) * rows]`.
    pub fn read_columns(&mut self, columns: &[usize], out: &mut [f64]) -> Result<()> {
        self.check_columns(columns)?;
        self.check_len(columns.len() * self.rows, out.len())?;

        if self.is_row_mode() {
            for (k, &col) in columns.iter().enumerate() {
                for row in 0..self.rows {
                    out[k * self.rows + row] = self.cell(row, col)?;
                    self.clash = None; // read: nothing to reconcile
                }
            }
        } else {
            for (k, &col) in columns.iter().enumerate() {
                let slot = self.ensure_column(col)?;
                out[k * self.rows..(k + 1) * self.rows].copy_from_slice(self.cache.column(slot));
            }
        }
        Ok(())
    }

    /// Overwrite whole columns from `values`, laid out as in
    /// [`read_columns`](Self::read_columns).
    pub fn write_columns(&mut self, columns: &[usize], values: &[f64]) -> Result<()> {
        if self.read_only {
            return Err(MatrixError::ReadOnly);
        }
        self.check_columns(columns)?;
        self.check_len(columns.len() * self.rows, values.len())?;

        if self.is_row_mode() {
            for (k, &col) in columns.iter().enumerate() {
                for row in 0..self.rows {
                    *self.cell_mut(row, col)? = values[k * self.rows + row];
                }
            }
        } else {
            for (k, &col) in columns.iter().enumerate() {
                // A full overwrite needs no read from disk; stage an empty
                // slot when the column is not resident.
                let slot = match self.cache.locate(col) {
                    Some(slot) => slot,
                    None => {
                        self.flush_oldest_column()?;
                        self.stage_column(col)
                    }
                };
                self.cache
                    .column_mut(slot)
                    .copy_from_slice(&values[k * self.rows..(k + 1) * self.rows]);
            }
        }
        Ok(())
    }

    /// Read whole rows into `out`: the value at `(rows[i], col)` lands in
    /// `out[col * rows.len() + i]`.
    ///
    /// In column mode the resident columns are drained first and the rest
    /// are streamed in ascending order, so each on-disk column is read at
    /// most once.
    pub fn read_rows(&mut self, rows: &[usize], out: &mut [f64]) -> Result<()> {
        self.check_rows(rows)?;
        self.check_len(rows.len() * self.cols, out.len())?;
        let nrows = rows.len();

        if self.is_row_mode() {
            for (i, &row) in rows.iter().enumerate() {
                for col in 0..self.cols {
                    out[col * nrows + i] = self.cell(row, col)?;
                    self.clash = None;
                }
            }
        } else {
            for col in self.sweep_order() {
                for (i, &row) in rows.iter().enumerate() {
                    out[col * nrows + i] = self.cell(row, col)?;
                    self.clash = None;
                }
            }
        }
        Ok(())
    }

    /// Overwrite whole rows from `values`, laid out as in
    /// [`read_rows`](Self::read_rows).
    pub fn write_rows(&mut self, rows: &[usize], values: &[f64]) -> Result<()> {
        if self.read_only {
            return Err(MatrixError::ReadOnly);
        }
        self.check_rows(rows)?;
        self.check_len(rows.len() * self.cols, values.len())?;
        let nrows = rows.len();

        if self.is_row_mode() {
            for (i, &row) in rows.iter().enumerate() {
                for col in 0..self.cols {
                    *self.cell_mut(row, col)? = values[col * nrows + i];
                }
            }
        } else {
            for col in self.sweep_order() {
                for (i, &row) in rows.iter().enumerate() {
                    *self.cell_mut(row, col)? = values[col * nrows + i];
                }
            }
        }
        Ok(())
    }

    /// Read the rectangular subset `rows x columns` into `out`,
    /// column-major over the requested index sets: the value at
    /// `(rows[i], columns[k])` lands in `out[k * rows.len() + i]`.
    pub fn read_submatrix(
        &mut self,
        rows: &[usize],
        columns: &[usize],
        out: &mut [f64],
    ) -> Result<()> {
        self.check_rows(rows)?;
        self.check_columns(columns)?;
        self.check_len(rows.len() * columns.len(), out.len())?;

        for (k, &col) in columns.iter().enumerate() {
            for (i, &row) in rows.iter().enumerate() {
                out[k * rows.len() + i] = self.cell(row, col)?;
                self.clash = None;
            }
        }
        Ok(())
    }

    /// Overwrite the rectangular subset `rows x columns` from `values`,
    /// laid out as in [`read_submatrix`](Self::read_submatrix).
    pub fn write_submatrix(
        &mut self,
        rows: &[usize],
        columns: &[usize],
        values: &[f64],
    ) -> Result<()> {
        if self.read_only {
            return Err(MatrixError::ReadOnly);
        }
        self.check_rows(rows)?;
        self.check_columns(columns)?;
        self.check_len(rows.len() * columns.len(), values.len())?;

        for (k, &col) in columns.iter().enumerate() {
            for (i, &row) in rows.iter().enumerate() {
                *self.cell_mut(row, col)? = values[k * rows.len() + i];
            }
        }
        Ok(())
    }

    /// Copy every cell of `source` into this matrix. Dimensions must
    /// match.
    pub fn copy_values_from(&mut self, source: &mut BufferedMatrix) -> Result<()> {
        if self.read_only {
            return Err(MatrixError::ReadOnly);
        }
        if self.rows != source.rows || self.cols != source.cols {
            return Err(MatrixError::DimensionMismatch {
                expected: self.rows * self.cols,
                actual: source.rows * source.cols,
            });
        }
        for col in 0..self.cols {
            for row in 0..self.rows {
                let value = source.cell(row, col)?;
                source.clash = None;
                *self.cell_mut(row, col)? = value;
            }
        }
        Ok(())
    }

    /// Apply `f` to every cell in place, visiting resident columns first.
    pub fn ew_apply<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(f64) -> f64,
    {
        if self.read_only {
            return Err(MatrixError::ReadOnly);
        }
        for col in self.sweep_order() {
            for row in 0..self.rows {
                let cell = self.cell_mut(row, col)?;
                *cell = f(*cell);
            }
        }
        Ok(())
    }

    /// Bytes of memory held by the matrix: both buffers, the descriptor
    /// and the owned strings and paths.
    pub fn memory_in_use(&self) -> usize {
        let mut bytes = std::mem::size_of::<Self>();
        for slot in self.cache.iter() {
            bytes += std::mem::size_of::<CacheSlot>() + slot.data.len() * std::mem::size_of::<f64>();
        }
        if let Some(window) = &self.window {
            bytes += window.bytes_in_use();
        }
        bytes += self.prefix.len();
        bytes += self.directory.as_os_str().len();
        for file in &self.files {
            bytes += file.path().as_os_str().len();
        }
        bytes
    }

    /// Bytes of disk space occupied by the column files.
    pub fn file_space_in_use(&self) -> u64 {
        (self.rows * self.cols * std::mem::size_of::<f64>()) as u64
    }

    // ------------------------------------------------------------------
    // Internal plumbing
    // ------------------------------------------------------------------

    /// Mutable access to one cell, routed through the buffers.
    ///
    /// This is the single routing point every cell read and write goes
    /// through, mirroring the preference order row window, column cache,
    /// disk.
    fn cell_mut(&mut self, row: usize, col: usize) -> Result<&mut f64> {
        if self.is_row_mode() {
            self.reconcile_clash();

            let in_window = self.window.as_ref().is_some_and(|w| w.contains(row));
            if in_window {
                if self.cache.locate(col).is_some() {
                    self.clash = Some((row, col));
                }
            } else if let Some(slot) = self.cache.locate(col) {
                return Ok(self.cache.cell_mut(slot, row));
            } else {
                // Both buffers miss: flush, then rebuild them around the
                // requested cell.
                if !self.read_only {
                    self.flush_window()?;
                    self.flush_oldest_column()?;
                }
                self.load_window_at(row)?;
                self.load_column(col)?;
                self.clash = Some((row, col));
            }

            let window = self
                .window
                .as_mut()
                .expect("row window present in row mode");
            Ok(window.cell_mut(row, col))
        } else {
            let slot = self.ensure_column(col)?;
            Ok(self.cache.cell_mut(slot, row))
        }
    }

    /// Read one cell through the routing path.
    pub(crate) fn cell(&mut self, row: usize, col: usize) -> Result<f64> {
        Ok(*self.cell_mut(row, col)?)
    }

    /// Locate `col` in the cache, faulting it in (with write-back of the
    /// victim) on a miss.
    fn ensure_column(&mut self, col: usize) -> Result<usize> {
        if let Some(slot) = self.cache.locate(col) {
            return Ok(slot);
        }
        if !self.read_only {
            self.flush_oldest_column()?;
        }
        self.load_column(col)
    }

    /// Read column `col` from its file into the cache as the newest
    /// entry, recycling the victim's allocation when the cache is full.
    /// The victim must already have been written back if it was dirty.
    fn load_column(&mut self, col: usize) -> Result<usize> {
        let mut data = match self.cache.pop_oldest_if_full() {
            Some(victim) => victim.data,
            None => vec![0.0; self.rows],
        };
        self.files[col].read_all(&mut data)?;
        self.cache.push_newest(CacheSlot { col, data });
        log::debug!("column {col} faulted into the cache");
        Ok(self.cache.len() - 1)
    }

    /// Claim a cache slot for `col` without reading the file. The caller
    /// overwrites the whole column before anything reads it.
    fn stage_column(&mut self, col: usize) -> usize {
        let data = match self.cache.pop_oldest_if_full() {
            Some(victim) => victim.data,
            None => vec![0.0; self.rows],
        };
        self.cache.push_newest(CacheSlot { col, data });
        self.cache.len() - 1
    }

    /// Write the oldest resident column back to its file, leaving it
    /// resident.
    fn flush_oldest_column(&mut self) -> Result<()> {
        if let Some(slot) = self.cache.oldest() {
            self.files[slot.col].write_all(&slot.data)?;
        }
        Ok(())
    }

    /// Write every resident column back to its file.
    fn flush_all_columns(&mut self) -> Result<()> {
        for slot in self.cache.iter() {
            self.files[slot.col].write_all(&slot.data)?;
        }
        Ok(())
    }

    /// Write the row window back to the files, if active.
    fn flush_window(&mut self) -> Result<()> {
        if let Some(window) = &self.window {
            window.flush(&self.files)?;
        }
        Ok(())
    }

    /// Reposition and refill the row window around `row`, if active.
    fn load_window_at(&mut self, row: usize) -> Result<()> {
        if let Some(window) = &mut self.window {
            window.load_at(&self.files, self.rows, row, &self.cache)?;
        }
        Ok(())
    }

    /// Copy the tracked clash cell from the row window into the column
    /// cache and clear the record. The window copy wins.
    fn reconcile_clash(&mut self) {
        if let Some((row, col)) = self.clash.take() {
            if let (Some(window), Some(slot)) = (self.window.as_ref(), self.cache.locate(col)) {
                let winner = window.value(row, col);
                if winner != self.cache.column(slot)[row] {
                    *self.cache.cell_mut(slot, row) = winner;
                }
            }
        }
    }

    /// Column visiting order for full-matrix sweeps: resident columns
    /// first (so nothing is evicted unused), then the rest ascending.
    /// Guarantees each on-disk column is read at most once per sweep.
    pub(crate) fn sweep_order(&self) -> Vec<usize> {
        let mut order = self.cache.resident_columns();
        let mut done = vec![false; self.cols];
        for &col in &order {
            done[col] = true;
        }
        for col in 0..self.cols {
            if !done[col] {
                order.push(col);
            }
        }
        order
    }

    fn split_index(&self, index: usize) -> Result<(usize, usize)> {
        if self.rows == 0 {
            return Err(MatrixError::RowsNotSet);
        }
        Ok((index % self.rows, index / self.rows))
    }

    fn check_cell(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(MatrixError::OutOfBounds {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    fn check_columns(&self, columns: &[usize]) -> Result<()> {
        for &col in columns {
            if col >= self.cols {
                return Err(MatrixError::ColumnOutOfBounds {
                    col,
                    cols: self.cols,
                });
            }
        }
        Ok(())
    }

    fn check_rows(&self, rows: &[usize]) -> Result<()> {
        for &row in rows {
            if row >= self.rows {
                return Err(MatrixError::RowOutOfBounds {
                    row,
                    rows: self.rows,
                });
            }
        }
        Ok(())
    }

    fn check_len(&self, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(MatrixError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }
}

impl Drop for BufferedMatrix {
    fn drop(&mut self) {
        // The files are owned; buffer contents need no flush because the
        // matrix is going away with them.
        for file in &self.files {
            let _ = file.delete();
        }
    }
}
