//! Storage module - file-per-column persistence
//!
//! Every matrix column is backed by exactly one file on local storage.
//! Files are created zero-filled when a column is appended, read and
//! written whole or as positional row slices, renamed on directory moves,
//! and removed when the matrix is dropped.

pub mod column_file;

pub use column_file::ColumnFile;
