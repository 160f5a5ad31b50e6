//! Per-column binary file I/O
//!
//! Each matrix column lives in its own file: `rows` contiguous
//! little-endian doubles at offset 0, no header, no footer. File names are
//! minted from a caller-supplied prefix plus a random suffix so that many
//! matrices can share one directory without colliding.
//!
//! All reads and writes are positional; no file handle outlives a call.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::Result;

/// Size of one stored value in bytes.
const VALUE_SIZE: usize = std::mem::size_of::<f64>();

/// Number of random suffix bytes in a minted file name.
const SUFFIX_LEN: usize = 8;

/// Cross-platform positioned read.
#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total_read = 0;
    while total_read < buf.len() {
        let n = file.seek_read(&mut buf[total_read..], offset + total_read as u64)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF"));
        }
        total_read += n;
    }
    Ok(())
}

/// Cross-platform positioned write.
#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total_written = 0;
    while total_written < buf.len() {
        let n = file.seek_write(&buf[total_written..], offset + total_written as u64)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
        }
        total_written += n;
    }
    Ok(())
}

/// A file holding exactly one matrix column.
///
/// The struct owns the path only; the file itself is opened per operation
/// and closed before the operation returns.
pub struct ColumnFile {
    path: PathBuf,
}

impl ColumnFile {
    /// Mint a fresh file in `directory` and fill it with `rows` zeros.
    ///
    /// The name is `prefix` followed by a random suffix that does not
    /// collide with any existing file in the directory.
    pub fn create_zeroed(directory: &Path, prefix: &str, rows: usize) -> Result<Self> {
        let (file, path) = tempfile::Builder::new()
            .prefix(prefix)
            .rand_bytes(SUFFIX_LEN)
            .tempfile_in(directory)?
            .keep()
            .map_err(|e| e.error)?;

        // A hole reads back as zeros, which is exactly the initial contents.
        file.set_len((rows * VALUE_SIZE) as u64)?;
        file.sync_data()?;

        Ok(Self { path })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole column into `buf`.
    pub fn read_all(&self, buf: &mut [f64]) -> Result<()> {
        self.read_slice(0, buf)
    }

    /// Overwrite the whole column from `buf`.
    pub fn write_all(&self, buf: &[f64]) -> Result<()> {
        self.write_slice(0, buf)
    }

    /// Read `buf.len()` values starting at row `offset_rows`.
    pub fn read_slice(&self, offset_rows: usize, buf: &mut [f64]) -> Result<()> {
        let file = File::open(&self.path)?;
        let mut bytes = vec![0u8; buf.len() * VALUE_SIZE];
        read_at(&file, &mut bytes, (offset_rows * VALUE_SIZE) as u64)?;

        for (value, chunk) in buf.iter_mut().zip(bytes.chunks_exact(VALUE_SIZE)) {
            let mut raw = [0u8; VALUE_SIZE];
            raw.copy_from_slice(chunk);
            *value = f64::from_le_bytes(raw);
        }
        Ok(())
    }

    /// Write `buf.len()` values starting at row `offset_rows`.
    pub fn write_slice(&self, offset_rows: usize, buf: &[f64]) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        let mut bytes = Vec::with_capacity(buf.len() * VALUE_SIZE);
        for value in buf {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        write_at(&file, &bytes, (offset_rows * VALUE_SIZE) as u64)?;
        Ok(())
    }

    /// Relocate the file into `directory` under a freshly minted name.
    pub fn move_to(&mut self, directory: &Path, prefix: &str) -> Result<()> {
        let (_, new_path) = tempfile::Builder::new()
            .prefix(prefix)
            .rand_bytes(SUFFIX_LEN)
            .tempfile_in(directory)?
            .keep()
            .map_err(|e| e.error)?;

        std::fs::rename(&self.path, &new_path)?;
        self.path = new_path;
        Ok(())
    }

    /// Remove the backing file.
    pub fn delete(&self) -> io::Result<()> {
        std::fs::remove_file(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_zeroed() {
        let dir = tempdir().unwrap();
        let file = ColumnFile::create_zeroed(dir.path(), "col", 16).unwrap();

        let mut buf = vec![1.0; 16];
        file.read_all(&mut buf).unwrap();
        assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_whole_column_round_trip() {
        let dir = tempdir().unwrap();
        let file = ColumnFile::create_zeroed(dir.path(), "col", 8).unwrap();

        let values: Vec<f64> = (0..8).map(|i| i as f64 * 0.5).collect();
        file.write_all(&values).unwrap();

        let mut buf = vec![0.0; 8];
        file.read_all(&mut buf).unwrap();
        assert_eq!(buf, values);
    }

    #[test]
    fn test_slice_round_trip() {
        let dir = tempdir().unwrap();
        let file = ColumnFile::create_zeroed(dir.path(), "col", 10).unwrap();

        file.write_slice(4, &[1.0, 2.0, 3.0]).unwrap();

        let mut buf = vec![0.0; 3];
        file.read_slice(4, &mut buf).unwrap();
        assert_eq!(buf, vec![1.0, 2.0, 3.0]);

        // Rows outside the slice are untouched
        let mut whole = vec![9.0; 10];
        file.read_all(&mut whole).unwrap();
        assert_eq!(whole[3], 0.0);
        assert_eq!(whole[7], 0.0);
        assert_eq!(whole[4], 1.0);
    }

    #[test]
    fn test_nan_survives_round_trip() {
        let dir = tempdir().unwrap();
        let file = ColumnFile::create_zeroed(dir.path(), "col", 3).unwrap();

        file.write_all(&[f64::NAN, f64::INFINITY, -0.0]).unwrap();

        let mut buf = vec![0.0; 3];
        file.read_all(&mut buf).unwrap();
        assert!(buf[0].is_nan());
        assert_eq!(buf[1], f64::INFINITY);
        assert_eq!(buf[2].to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn test_minted_names_are_unique() {
        let dir = tempdir().unwrap();
        let files: Vec<ColumnFile> = (0..64)
            .map(|_| ColumnFile::create_zeroed(dir.path(), "bm", 1).unwrap())
            .collect();

        let mut paths: Vec<&Path> = files.iter().map(|f| f.path()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 64);

        for file in &files {
            let name = file.path().file_name().unwrap().to_string_lossy();
            assert!(name.starts_with("bm"));
        }
    }

    #[test]
    fn test_move_to_preserves_contents() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();

        let mut file = ColumnFile::create_zeroed(src_dir.path(), "col", 4).unwrap();
        file.write_all(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let old_path = file.path().to_path_buf();

        file.move_to(dst_dir.path(), "col").unwrap();

        assert!(!old_path.exists());
        assert!(file.path().starts_with(dst_dir.path()));

        let mut buf = vec![0.0; 4];
        file.read_all(&mut buf).unwrap();
        assert_eq!(buf, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let file = ColumnFile::create_zeroed(dir.path(), "col", 4).unwrap();
        let path = file.path().to_path_buf();

        file.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_short_read_is_an_error() {
        let dir = tempdir().unwrap();
        let file = ColumnFile::create_zeroed(dir.path(), "col", 2).unwrap();

        let mut buf = vec![0.0; 5];
        assert!(file.read_all(&mut buf).is_err());
    }
}
