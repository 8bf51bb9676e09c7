//! Link Statistics

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Why a packet retrieval failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Header,
    Checksum,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Header => "header",
            FailureKind::Checksum => "checksum",
        }
    }
}

/// Failure counters and packet rate, shared with consumers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub checksum_failures: u64,
    pub header_failures: u64,
    pub timeouts: u64,
    /// Failed retrievals in a row, reset by any success
    pub consecutive_failures: u32,
    pub packets_per_second: f32,
}

impl Stats {
    /// Count a failure; returns the new consecutive failure count
    pub fn record_failure(&mut self, kind: FailureKind) -> u32 {
        match kind {
            FailureKind::Timeout => self.timeouts += 1,
            FailureKind::Header => self.header_failures += 1,
            FailureKind::Checksum => self.checksum_failures += 1,
        }
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// All failures of every kind
    pub fn total_failures(&self) -> u64 {
        self.checksum_failures + self.header_failures + self.timeouts
    }
}

/// Good packets per second, averaged over a fixed window
#[derive(Debug)]
pub struct PacketRate {
    window: Duration,
    started: Instant,
    count: u32,
}

impl PacketRate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: Instant::now(),
            count: 0,
        }
    }

    pub fn tick(&mut self) {
        self.count += 1;
    }

    /// The window average, once per elapsed window
    pub fn poll(&mut self) -> Option<f32> {
        self.poll_at(Instant::now())
    }

    fn poll_at(&mut self, now: Instant) -> Option<f32> {
        if self.window.is_zero() || now.duration_since(self.started) < self.window {
            return None;
        }
        let rate = self.count as f32 / self.window.as_secs_f32();
        self.started = now;
        self.count = 0;
        Some(rate)
    }
}
