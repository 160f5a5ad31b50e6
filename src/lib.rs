//! bufmat - Out-of-core Buffered Matrix
//!
//! A dense two-dimensional matrix of `f64` values whose total footprint may
//! exceed main memory. Every column is persisted in its own binary file and
//! a bounded amount of data is kept resident through two cooperating
//! buffers: a FIFO column cache and an optional contiguous row window.
//!
//! The matrix has a fixed number of rows (set once, before the first column
//! is appended) and grows by appending columns. Callers see an ordinary
//! mutable matrix; the engine decides when data is loaded, written back, or
//! evicted. The engine is single-threaded: no internal locks, no re-entrant
//! calls.

pub mod buffer;
pub mod matrix;
pub mod storage;

// Re-export main types
pub use matrix::BufferedMatrix;
pub use storage::ColumnFile;

/// Buffered matrix error type
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("row count already set to {0}")]
    RowsAlreadySet(usize),

    #[error("row count must be set before columns are appended")]
    RowsNotSet,

    #[error("row count must be positive")]
    InvalidRowCount,

    #[error("position ({row}, {col}) outside a {rows} x {cols} matrix")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("column {col} outside a matrix with {cols} columns")]
    ColumnOutOfBounds { col: usize, cols: usize },

    #[error("row {row} outside a matrix with {rows} rows")]
    RowOutOfBounds { row: usize, rows: usize },

    #[error("matrix is in read-only mode")]
    ReadOnly,

    #[error("buffer capacity must be at least 1")]
    InvalidBufferSize,

    #[error("dimension mismatch: expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, MatrixError>;
