//! ECM Communication Definition
//!
//! Static description of how to talk to one ECM: its address, the handshake
//! used to silence idle chatter, and the data packets it can be polled for.

use crate::error::CommDefError;
use crate::frame;
use crate::mode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bit numbering used for boolean flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Bit 0 is the least significant bit
    #[default]
    Msb,
    /// Bit positions are mirrored: bit 0 is the most significant bit
    Lsb,
}

/// Handshake settings for entering diagnostic mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeDef {
    /// Wait for idle chatter before attempting to connect
    pub chatter_wait: bool,
    /// Delay after idle traffic (ms)
    pub idle_delay_ms: u64,
    /// Mode byte of the shutup (disable chatter) command
    pub shutup_mode: Option<u8>,
    /// Mode byte of the return-to-normal command
    pub return_mode: Option<u8>,
    /// How many times to repeat a shutup request, 0 disables shutup
    pub shutup_repeat: u32,
    /// Delay between failed shutup requests (ms)
    pub shutup_repeat_delay_ms: u64,
    /// How long a shutup lasts on the ECM (ms), 0 disables lag tracking
    pub shutup_time_ms: u64,
}

impl Default for HandshakeDef {
    fn default() -> Self {
        Self {
            chatter_wait: true,
            idle_delay_ms: 10,
            shutup_mode: None,
            return_mode: None,
            shutup_repeat: 1,
            shutup_repeat_delay_ms: 75,
            shutup_time_ms: 2500,
        }
    }
}

/// One pollable data packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketDefinition {
    /// Message number
    pub id: u8,
    /// Total reply length including header and checksum
    pub length: usize,
    /// Offset of the data in bytes, aka header size
    #[serde(default = "default_header_offset")]
    pub header_offset: usize,
    /// Poll every N sweeps, 0 disables the packet
    #[serde(default = "default_frequency")]
    pub frequency: u32,
}

fn default_header_offset() -> usize {
    3
}

fn default_frequency() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Master communication definition for an ECM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommDef {
    /// Address byte of the ECM
    pub address: u8,
    /// Verify reply checksums
    #[serde(default = "default_true")]
    pub checksum_enable: bool,
    #[serde(default)]
    pub handshake: HandshakeDef,
    pub packets: Vec<PacketDefinition>,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

impl CommDef {
    /// Validate packet layout and handshake settings
    pub fn validate(&self) -> Result<(), CommDefError> {
        if self.packets.is_empty() {
            return Err(CommDefError::NoPackets);
        }
        for (index, packet) in self.packets.iter().enumerate() {
            if packet.length < frame::MODE_FRAME_LEN || packet.length > 255 {
                return Err(CommDefError::PacketLength {
                    index,
                    length: packet.length,
                });
            }
            if packet.header_offset >= packet.length {
                return Err(CommDefError::HeaderOffset {
                    index,
                    offset: packet.header_offset,
                    length: packet.length,
                });
            }
        }
        if self.packets.iter().all(|p| p.frequency == 0) {
            return Err(CommDefError::AllDisabled);
        }
        if self.handshake.shutup_repeat > 0 {
            if self.handshake.shutup_mode.is_none() {
                return Err(CommDefError::MissingMode("shutup_mode"));
            }
            if self.handshake.return_mode.is_none() {
                return Err(CommDefError::MissingMode("return_mode"));
            }
        }
        Ok(())
    }

    /// Request frame used to poll `packet`
    pub fn packet_request(&self, packet: &PacketDefinition) -> Vec<u8> {
        frame::request_frame(self.address, mode::DATA_REQUEST, packet.id)
    }

    /// Shutup command frame, if shutup is configured
    pub fn shutup_command(&self) -> Option<Vec<u8>> {
        self.handshake
            .shutup_mode
            .map(|m| frame::mode_frame(self.address, m))
    }

    /// Return-to-normal command frame, if configured
    pub fn return_command(&self) -> Option<Vec<u8>> {
        self.handshake
            .return_mode
            .map(|m| frame::mode_frame(self.address, m))
    }

    /// Lag budget derived from the shutup duration, `None` when disabled
    pub fn lag_budget(&self) -> Option<Duration> {
        match self.handshake.shutup_time_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
