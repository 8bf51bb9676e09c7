//! ALDL Error Types

use thiserror::Error;

/// Errors raised by a serial transport backend
#[derive(Debug, Error)]
pub enum TransportError {
    /// Device could not be opened
    #[error("Failed to open serial device {device}: {reason}")]
    Open { device: String, reason: String },

    /// I/O failure on an open device
    #[error("Serial I/O error: {0}")]
    Io(String),

    /// Device is not ready (unplugged, closed)
    #[error("Serial device not ready")]
    NotReady,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Errors that can occur during ALDL link communication
#[derive(Debug, Error)]
pub enum LinkError {
    /// Underlying transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Timeout waiting for bytes
    #[error("Timeout after {timeout_ms}ms waiting for {wanted} bytes (got {got})")]
    Timeout {
        wanted: usize,
        got: usize,
        timeout_ms: u64,
    },

    /// The echo of a request never showed up in the input stream
    #[error("Echo not found within {scanned} bytes")]
    NoEcho { scanned: usize },

    /// Reply header does not carry the ECM address and expected length byte
    #[error("Bad packet header: address {address:02X}, length byte {length:02X}")]
    BadHeader { address: u8, length: u8 },

    /// Reply failed checksum verification
    #[error("Checksum mismatch: frame sums to {sum:02X}")]
    Checksum { sum: u8 },

    /// Acquisition was asked to quit while waiting
    #[error("Quit requested")]
    Quit,
}

/// Errors in a communication definition, detected at load time
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommDefError {
    /// No packets are configured
    #[error("No packets specified")]
    NoPackets,

    /// Every packet has frequency 0
    #[error("All packets are disabled")]
    AllDisabled,

    /// Packet too short for address, length, mode and checksum, or over 255
    #[error("Packet {index} length {length} out of range (4-255)")]
    PacketLength { index: usize, length: usize },

    /// Header offset at or beyond the end of the packet
    #[error("Packet {index} header offset {offset} exceeds length {length}")]
    HeaderOffset {
        index: usize,
        offset: usize,
        length: usize,
    },

    /// Shutup is enabled but a required mode byte is missing
    #[error("Handshake requires {0} when shutup_repeat > 0")]
    MissingMode(&'static str),
}
