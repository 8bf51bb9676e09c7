//! Acquisition Error Types

use aldl_protocol::CommDefError;
use data_convert::DefinitionError;
use record_store::StoreError;
use thiserror::Error;

/// Configuration and startup errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum AcqError {
    /// Inter-poll delay above the allowed maximum
    #[error("Acquisition delay {0}us too high (max 200000)")]
    RateTooHigh(u64),

    /// Buffer size outside the allowed range
    #[error("Buffer size {0} out of range (10-10000)")]
    BufferSize(usize),

    /// Pre-buffer threshold larger than the buffer
    #[error("Buffer start {bufstart} exceeds buffer size {bufsize}")]
    BufferStart { bufstart: usize, bufsize: usize },

    #[error("Invalid comm definition: {0}")]
    CommDef(#[from] CommDefError),

    #[error("Invalid signal definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}
