//! Conversion Error Types

use thiserror::Error;

/// Errors in a signal definition, detected when the converter is built
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DefinitionError {
    /// Signal refers to a packet that does not exist
    #[error("Signal {signal}: packet {packet} out of range ({count} packets)")]
    PacketIndex {
        signal: String,
        packet: usize,
        count: usize,
    },

    /// Signal reads past the end of its packet
    #[error("Signal {signal}: data ends at byte {end}, packet is {length} bytes")]
    OutOfBounds {
        signal: String,
        end: usize,
        length: usize,
    },

    /// Boolean bit position outside 0-7
    #[error("Signal {signal}: bit position {bit} out of range (0-7)")]
    BitPosition { signal: String, bit: u8 },

    /// Clamp range is inverted or not a number
    #[error("Signal {signal}: invalid range {min}..{max}")]
    Range { signal: String, min: f64, max: f64 },

    /// Empty signal name
    #[error("Signal {0} has an empty name")]
    EmptyName(usize),

    /// Forbidden character in a name or unit string
    #[error("Signal {signal}: bad character {ch:?} in {field}")]
    BadChar {
        signal: String,
        field: &'static str,
        ch: char,
    },

    /// Two signals share a name
    #[error("Duplicate signal name {name} at {first} and {second}")]
    Duplicate {
        name: String,
        first: usize,
        second: usize,
    },

    /// Unsupported input bit size
    #[error("Unsupported bit size {0}, only 8 and 16 are allowed")]
    BitSize(u8),
}
