//! Serial Device Transport
//!
//! Blocking backend over a tty or USB-serial adapter, using the `serialport`
//! API re-exported by `tokio-serial`. A device that fails an I/O operation is
//! dropped and re-opened on the next readiness check, so an unplugged cable
//! surfaces as a not-ready transport rather than a fatal error.

use crate::error::TransportError;
use crate::transport::SerialTransport;
use std::io::{Read, Write};
use std::time::Duration;
use tokio_serial::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

/// ALDL line speed
pub const ALDL_BAUD_RATE: u32 = 8192;

/// Serial device transport
pub struct TtyTransport {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3")
    device: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl TtyTransport {
    /// Open `device` at `baud_rate`
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = Self::open_port(device, baud_rate)?;
        info!("Opened serial device {} at {} baud", device, baud_rate);
        Ok(Self {
            device: device.to_string(),
            baud_rate,
            port: Some(port),
        })
    }

    fn open_port(device: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, TransportError> {
        tokio_serial::new(device, baud_rate)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| TransportError::Open {
                device: device.to_string(),
                reason: e.to_string(),
            })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotReady)
    }

    /// Drop the device after an I/O failure
    fn fail(&mut self, err: impl ToString) -> TransportError {
        let reason = err.to_string();
        warn!("Serial device {} failed: {}", self.device, reason);
        self.port = None;
        TransportError::Io(reason)
    }
}

impl SerialTransport for TtyTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let result = self.port()?.write_all(bytes);
        result.map_err(|e| self.fail(e))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let pending = self.port()?.bytes_to_read();
        let available = match pending {
            Ok(n) => n as usize,
            Err(e) => return Err(self.fail(e)),
        };
        if available == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = available.min(buf.len());
        let result = self.port()?.read(&mut buf[..want]);
        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn purge_rx(&mut self) -> Result<(), TransportError> {
        let result = self.port()?.clear(ClearBuffer::Input);
        result.map_err(|e| self.fail(e))
    }

    fn purge_tx(&mut self) -> Result<(), TransportError> {
        let result = self.port()?.clear(ClearBuffer::Output);
        result.map_err(|e| self.fail(e))
    }

    fn purge(&mut self) -> Result<(), TransportError> {
        let result = self.port()?.clear(ClearBuffer::All);
        result.map_err(|e| self.fail(e))
    }

    fn is_ready(&mut self) -> bool {
        if self.port.is_some() {
            return true;
        }
        match Self::open_port(&self.device, self.baud_rate) {
            Ok(port) => {
                info!("Serial device {} recovered", self.device);
                self.port = Some(port);
                true
            }
            Err(e) => {
                debug!("Serial device still unavailable: {}", e);
                false
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial device {}", self.device);
        }
    }
}

/// Names of serial devices present on this system
pub fn list_devices() -> Result<Vec<String>, TransportError> {
    let ports = tokio_serial::available_ports().map_err(|e| TransportError::Io(e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
