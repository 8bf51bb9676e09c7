//! Record Store
//!
//! A fixed-capacity circular buffer of decoded snapshots. Records are linked
//! in creation order and handed out as generation-tagged [`RecordId`]
//! handles, so a reader that falls a full buffer behind gets
//! [`StoreError::Overrun`] instead of someone else's data.

mod buffer;
mod error;

pub use buffer::{PendingRecord, Record, RecordId, RecordStore, DEFAULT_CAPACITY};
pub use error::StoreError;
