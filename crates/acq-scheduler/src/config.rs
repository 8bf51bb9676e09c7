//! Acquisition Settings

use crate::error::AcqError;
use record_store::DEFAULT_CAPACITY;
use serde::{Deserialize, Serialize};

/// Maximum inter-poll delay (µs)
pub const MAX_RATE_US: u64 = 200_000;

/// Acquisition loop and buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcqConfig {
    /// Record buffer capacity
    pub bufsize: usize,
    /// Sweeps to complete before consumers are released, defaults to half
    /// the buffer
    pub bufstart: Option<usize>,
    /// Clamp converted values to their [min, max] range
    pub clamp: bool,
    /// Consecutive failures tolerated before declaring desync
    pub maxfail: u32,
    /// Delay between polls while connected (µs)
    pub rate_us: u64,
    /// Packet rate averaging window (s), 0 disables
    pub pktrate_window_s: u64,
    /// Send each auxiliary command three times
    pub aux_command_repeat: bool,
    /// Reject replies with a bad address or length byte before checksumming
    pub header_check: bool,
    /// Nice value for the acquisition thread
    pub acq_priority: Option<i32>,
}

impl Default for AcqConfig {
    fn default() -> Self {
        Self {
            bufsize: DEFAULT_CAPACITY,
            bufstart: None,
            clamp: true,
            maxfail: 6,
            rate_us: 0,
            pktrate_window_s: 5,
            aux_command_repeat: true,
            header_check: true,
            acq_priority: None,
        }
    }
}

impl AcqConfig {
    /// Effective pre-buffer threshold
    pub fn bufstart(&self) -> usize {
        self.bufstart.unwrap_or(self.bufsize / 2)
    }

    pub fn validate(&self) -> Result<(), AcqError> {
        if !(10..=10_000).contains(&self.bufsize) {
            return Err(AcqError::BufferSize(self.bufsize));
        }
        if self.bufstart() > self.bufsize {
            return Err(AcqError::BufferStart {
                bufstart: self.bufstart(),
                bufsize: self.bufsize,
            });
        }
        if self.rate_us > MAX_RATE_US {
            return Err(AcqError::RateTooHigh(self.rate_us));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AcqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bufstart(), 100);
    }

    #[test]
    fn test_sanity_checks() {
        let config = AcqConfig {
            rate_us: 200_001,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AcqError::RateTooHigh(200_001))));

        let config = AcqConfig {
            bufstart: Some(300),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AcqError::BufferStart { .. })));

        let config = AcqConfig {
            bufsize: 5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AcqError::BufferSize(5))));
    }
}
