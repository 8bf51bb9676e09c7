//! Serial Transport Interface
//!
//! The link layer only needs a handful of primitives from a serial backend.
//! Reads never block beyond the data that is immediately available; all
//! timing discipline lives in [`crate::Link`].

use crate::error::TransportError;

/// A half-duplex serial backend
pub trait SerialTransport: Send {
    /// Write all of `bytes` to the line
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to `buf.len()` immediately available bytes, returning the count
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Discard pending input
    fn purge_rx(&mut self) -> Result<(), TransportError>;

    /// Discard pending output
    fn purge_tx(&mut self) -> Result<(), TransportError>;

    /// Discard pending input and output
    fn purge(&mut self) -> Result<(), TransportError> {
        self.purge_rx()?;
        self.purge_tx()
    }

    /// Whether the device is present and usable
    fn is_ready(&mut self) -> bool;

    /// Release the device
    fn close(&mut self) {}
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn purge_rx(&mut self) -> Result<(), TransportError> {
        (**self).purge_rx()
    }

    fn purge_tx(&mut self) -> Result<(), TransportError> {
        (**self).purge_tx()
    }

    fn purge(&mut self) -> Result<(), TransportError> {
        (**self).purge()
    }

    fn is_ready(&mut self) -> bool {
        (**self).is_ready()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
