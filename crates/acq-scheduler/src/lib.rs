//! ALDL Acquisition Scheduler
//!
//! The acquisition loop that polls an ECM packet by packet, the queue used
//! to inject auxiliary commands, and the shared [`Aldl`] context through
//! which consumers observe records, connection state and statistics.

mod config;
mod context;
mod error;
mod queue;
mod scheduler;
mod stats;

pub use config::{AcqConfig, MAX_RATE_US};
pub use context::Aldl;
pub use error::AcqError;
pub use queue::{AuxCommand, CommandQueue};
pub use scheduler::{apply_priority, Acquisition, FrequencyGate};
pub use stats::{FailureKind, PacketRate, Stats};
