//! ALDL Link Layer
//!
//! Timeout-bounded reads, echo listening and packet requests on top of a
//! [`SerialTransport`]. The ALDL line is half-duplex: every byte we send is
//! echoed back, so a request is only considered delivered once its own echo
//! has been seen in the input stream.

use crate::error::LinkError;
use crate::frame;
use crate::transport::SerialTransport;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Initial size of the listen/skip scratch buffer
const SCRATCH_CAPACITY: usize = 2048;

/// Link timing constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Base polling granularity in microseconds
    pub granularity_us: u64,
    /// Milliseconds per byte at the line rate
    pub bytes_per_ms: f64,
    /// Worst-case extra milliseconds per byte the ECM may take
    pub ecm_lag_factor: f64,
    /// Skip throttling sleeps for a higher packet rate at more risk of drops
    pub aggressive: bool,
    /// Linearly back off while waiting for idle chatter
    pub reconnect_backoff: bool,
    /// Upper bound for the chatter wait backoff (ms)
    pub reconnect_max_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            granularity_us: 200,
            bytes_per_ms: 0.98,
            ecm_lag_factor: 0.35,
            aggressive: false,
            reconnect_backoff: true,
            reconnect_max_delay_ms: 1000,
        }
    }
}

impl Timing {
    /// Base polling granularity
    pub fn granularity(&self) -> Duration {
        Duration::from_micros(self.granularity_us)
    }

    /// Time allowed for `len` bytes to cross the wire
    pub fn timeout(&self, len: usize) -> Duration {
        let ms = len as f64 * self.bytes_per_ms + len as f64 * self.ecm_lag_factor;
        let timeout = Duration::from_millis(ms as u64);
        timeout.max(self.granularity() * 2)
    }

    fn throttle(&self) {
        if !self.aggressive {
            thread::sleep(self.granularity());
        }
    }
}

/// Sleep for `ms` milliseconds
pub(crate) fn msleep(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Link-level access to an ECM over a serial transport
pub struct Link<T: SerialTransport> {
    transport: T,
    timing: Timing,
    /// Growable scratch buffer for listen/skip
    scratch: Vec<u8>,
}

impl<T: SerialTransport> Link<T> {
    pub fn new(transport: T, timing: Timing) -> Self {
        Self {
            transport,
            timing,
            scratch: vec![0; SCRATCH_CAPACITY],
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Whether the transport is usable
    pub fn is_ready(&mut self) -> bool {
        self.transport.is_ready()
    }

    /// Write raw bytes
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        trace!("WRITE: {}", frame::hex(bytes));
        self.transport.write(bytes)?;
        Ok(())
    }

    /// Discard all pending input and output
    pub fn purge(&mut self) -> Result<(), LinkError> {
        self.transport.purge()?;
        Ok(())
    }

    /// Close the transport
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Read exactly `buf.len()` bytes or fail after `timeout`
    pub fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), LinkError> {
        let wanted = buf.len();
        let mut got = 0;
        let start = Instant::now();
        loop {
            got += self.transport.read(&mut buf[got..])?;
            if got >= wanted {
                trace!("READ: {}", frame::hex(buf));
                return Ok(());
            }
            self.timing.throttle();
            if start.elapsed() > timeout {
                break;
            }
        }
        trace!("Timeout reading {} bytes, got {}", wanted, got);
        Err(LinkError::Timeout {
            wanted,
            got,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    /// Read and discard `count` bytes; true if all of them arrived in time
    pub fn skip_bytes(&mut self, count: usize, timeout: Duration) -> Result<bool, LinkError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        if scratch.len() < count {
            debug!("Growing scratch buffer to {} bytes", count);
            scratch.resize(count, 0);
        }
        let result = self.read_bytes(&mut scratch[..count], timeout);
        self.scratch = scratch;
        match result {
            Ok(()) => Ok(true),
            Err(LinkError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read until `needle` shows up, `max` bytes have been collected, or the
    /// timeout elapses. `None` waits for `max` bytes without a deadline.
    pub fn listen_bytes(
        &mut self,
        needle: &[u8],
        max: usize,
        timeout: Option<Duration>,
    ) -> Result<(), LinkError> {
        if self.scratch.len() < max {
            debug!("Growing scratch buffer to {} bytes", max);
            self.scratch.resize(max, 0);
        }
        let start = Instant::now();
        let mut read = 0;
        while read < max {
            let n = self.transport.read(&mut self.scratch[read..max])?;
            if n > 0 {
                read += n;
                if frame::contains(&self.scratch[..read], needle) {
                    return Ok(());
                }
            }
            self.timing.throttle();
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    trace!("Listen timeout, got: {}", frame::hex(&self.scratch[..read]));
                    return Err(LinkError::Timeout {
                        wanted: needle.len(),
                        got: read,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
        trace!("Echo not found, got: {}", frame::hex(&self.scratch[..read]));
        Err(LinkError::NoEcho { scanned: read })
    }

    /// Send a frame and wait for its echo
    pub fn request(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let timeout = self.timing.timeout(frame.len());
        self.purge()?;
        self.write(frame)?;
        if !self.timing.aggressive {
            thread::sleep(timeout);
        }
        self.listen_bytes(frame, frame.len(), Some(timeout))
    }

    /// Request a data packet and read its reply into `data`.
    ///
    /// On any failure `data` is zeroed.
    pub fn get_packet(&mut self, request: &[u8], data: &mut [u8]) -> Result<(), LinkError> {
        let timeout = self.timing.timeout(data.len());
        let result = self
            .request(request)
            .and_then(|_| self.read_bytes(data, timeout));
        if result.is_err() {
            data.fill(0);
        }
        result
    }
}
