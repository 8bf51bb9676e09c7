//! Record Store Error Types

use thiserror::Error;

/// Errors from record store access
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The record's slot has been reused by a newer record
    #[error("Record {seq} overwritten (slot now holds record {current})")]
    Overrun { seq: u64, current: u64 },

    /// Buffer capacity too small
    #[error("Buffer capacity {0} too small (minimum 2)")]
    Capacity(usize),
}
