//! Signal Alarms

use thiserror::Error;

/// A converted value outside its configured alarm thresholds
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Alarm {
    /// Value below the low threshold
    #[error("{signal} value {value} below alarm threshold {threshold}")]
    Low {
        signal: String,
        value: f64,
        threshold: f64,
    },

    /// Value above the high threshold
    #[error("{signal} value {value} above alarm threshold {threshold}")]
    High {
        signal: String,
        value: f64,
        threshold: f64,
    },

    /// Error code flag is set
    #[error("{signal} error code set")]
    ErrorCode { signal: String },
}

impl Alarm {
    /// Name of the signal that raised the alarm
    pub fn signal(&self) -> &str {
        match self {
            Alarm::Low { signal, .. } | Alarm::High { signal, .. } | Alarm::ErrorCode { signal } => {
                signal
            }
        }
    }
}
