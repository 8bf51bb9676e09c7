//! ALDL Protocol Implementation
//!
//! This crate provides blocking serial communication with an ECM speaking the
//! ALDL diagnostic protocol: frame checksums, echo-aware request/response
//! over a half-duplex line, and the handshake that silences idle chatter.

mod commdef;
mod error;
pub mod frame;
mod handshake;
mod link;
pub mod sim;
mod state;
mod transport;
pub mod tty;

pub use commdef::{ByteOrder, CommDef, HandshakeDef, PacketDefinition};
pub use error::{CommDefError, LinkError, TransportError};
pub use handshake::connect;
pub use link::{Link, Timing};
pub use sim::{SimControl, SimulatedEcm};
pub use state::{ConnectionState, StateCell, STATE_HISTORY_LEN};
pub use transport::SerialTransport;
pub use tty::TtyTransport;

/// ALDL mode constants
pub mod mode {
    /// Transmit data packet
    pub const DATA_REQUEST: u8 = 0x01;
    /// Transmit ROM bytes
    pub const ROM_READ: u8 = 0x02;
    /// Function control (actuator tests)
    pub const FUNCTION_CONTROL: u8 = 0x04;
    /// Disable normal chatter
    pub const SHUTUP: u8 = 0x08;
    /// Return to normal mode
    pub const NORMAL: u8 = 0x09;
}
