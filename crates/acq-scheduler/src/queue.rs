//! Auxiliary Command Queue
//!
//! Any thread may enqueue raw frames; only the acquisition loop dequeues
//! them, sending at most one per packet slot in place of a data poll.

use aldl_protocol::{frame, CommDef};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// One raw command and the delay to observe after sending it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxCommand {
    pub bytes: Vec<u8>,
    /// Settle delay after sending (ms)
    pub delay_ms: u64,
}

impl AuxCommand {
    pub fn new(bytes: &[u8], delay_ms: u64) -> Self {
        Self {
            bytes: bytes.to_vec(),
            delay_ms,
        }
    }

    /// Mode-only frame addressed to the ECM in `comm`
    pub fn mode(comm: &CommDef, mode: u8, delay_ms: u64) -> Self {
        Self {
            bytes: frame::mode_frame(comm.address, mode),
            delay_ms,
        }
    }

    /// Mode+message frame addressed to the ECM in `comm`
    pub fn request(comm: &CommDef, mode: u8, message: u8, delay_ms: u64) -> Self {
        Self {
            bytes: frame::request_frame(comm.address, mode, message),
            delay_ms,
        }
    }
}

/// Unbounded FIFO of auxiliary commands
#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: Mutex<VecDeque<AuxCommand>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command at the tail
    pub fn push(&self, command: AuxCommand) {
        debug!("Queued aux command: {}", frame::hex(&command.bytes));
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(command);
    }

    /// Remove the command at the head, if any
    pub fn pop(&self) -> Option<AuxCommand> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
