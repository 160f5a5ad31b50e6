//! Buffer module - the two resident-data pools
//!
//! The engine keeps a bounded amount of matrix data in memory through two
//! cooperating buffers:
//!
//! - [`ColumnCache`]: a FIFO pool of whole columns, evicted oldest-first
//!   with write-back;
//! - [`RowWindow`]: an optional contiguous band of rows spanning every
//!   column, active only in row mode.
//!
//! A cell can be resident in both at once. The engine tracks the most
//! recent such cell and reconciles the two copies lazily (row window
//! wins) before either side is observed or destroyed.

pub mod column_cache;
pub mod row_window;

pub use column_cache::{CacheSlot, ColumnCache};
pub use row_window::RowWindow;
