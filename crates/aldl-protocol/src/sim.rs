//! Simulated ECM Transport
//!
//! Pretends to be an ECM on the far end of an ALDL line. The simulation
//! echoes every write like the shared half-duplex wire does, broadcasts idle
//! chatter until a shutup command arrives, and answers data requests with
//! well-formed packets. Faults can be injected through [`SimControl`].

use crate::commdef::CommDef;
use crate::error::TransportError;
use crate::frame;
use crate::mode;
use crate::transport::SerialTransport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Byte broadcast while the ECM is chattering
pub const IDLE_BYTE: u8 = 0x33;

/// Handle for observing and disturbing a running simulation
#[derive(Debug)]
pub struct SimControl {
    ready: AtomicBool,
    drop_replies: AtomicU32,
    /// Extra latency before each data reply (ms)
    reply_delay_ms: AtomicU64,
    shutups: AtomicU64,
    requests: Mutex<HashMap<u8, u64>>,
    commands: Mutex<Vec<Vec<u8>>>,
}

impl SimControl {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            drop_replies: AtomicU32::new(0),
            reply_delay_ms: AtomicU64::new(0),
            shutups: AtomicU64::new(0),
            requests: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Simulate unplugging (false) or re-plugging (true) the device
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Swallow the next `count` data requests without replying
    pub fn drop_replies(&self, count: u32) {
        self.drop_replies.store(count, Ordering::SeqCst);
    }

    /// Make the ECM take `delay` to answer each data request
    pub fn set_reply_delay(&self, delay: Duration) {
        self.reply_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of shutup commands received, i.e. handshakes attempted
    pub fn shutups(&self) -> u64 {
        self.shutups.load(Ordering::SeqCst)
    }

    /// Number of data requests received for packet `id`
    pub fn requests(&self, id: u8) -> u64 {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Frames written that were neither data requests nor handshake commands
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_drop(&self) -> bool {
        self.drop_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Configuration for one simulated packet
#[derive(Debug, Clone)]
struct SimPacket {
    length: usize,
    payload: Option<Vec<u8>>,
}

/// A fake ECM behind a [`SerialTransport`]
pub struct SimulatedEcm {
    address: u8,
    shutup_mode: Option<u8>,
    return_mode: Option<u8>,
    packets: HashMap<u8, SimPacket>,
    /// Broadcast idle traffic while not silenced
    chatter: bool,
    silenced: bool,
    rx: VecDeque<u8>,
    rng: StdRng,
    /// 0-100, rough percentage of corrupted replies
    corruption_percent: u8,
    control: Arc<SimControl>,
}

impl SimulatedEcm {
    /// Build a simulation answering every packet in `comm`
    pub fn from_commdef(comm: &CommDef, seed: u64) -> Self {
        let packets = comm
            .packets
            .iter()
            .map(|p| {
                (
                    p.id,
                    SimPacket {
                        length: p.length,
                        payload: None,
                    },
                )
            })
            .collect();

        Self {
            address: comm.address,
            shutup_mode: comm.handshake.shutup_mode,
            return_mode: comm.handshake.return_mode,
            packets,
            chatter: true,
            silenced: comm.handshake.shutup_repeat == 0,
            rx: VecDeque::new(),
            rng: StdRng::seed_from_u64(seed),
            corruption_percent: 0,
            control: Arc::new(SimControl::new()),
        }
    }

    /// Fix the data bytes (after the 3-byte header) of packet `id`
    pub fn with_payload(mut self, id: u8, payload: Vec<u8>) -> Self {
        if let Some(packet) = self.packets.get_mut(&id) {
            packet.payload = Some(payload);
        }
        self
    }

    /// Corrupt roughly `percent` of replies
    pub fn with_corruption(mut self, percent: u8) -> Self {
        self.corruption_percent = percent.min(100);
        self
    }

    /// Disable idle chatter, as if the ignition were off
    pub fn without_chatter(mut self) -> Self {
        self.chatter = false;
        self
    }

    pub fn control(&self) -> Arc<SimControl> {
        Arc::clone(&self.control)
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        let addressed = bytes.first() == Some(&self.address) && frame::verify(bytes);

        if addressed && bytes.len() == frame::MODE_FRAME_LEN {
            let m = Some(bytes[2]);
            if m == self.shutup_mode {
                debug!("Simulated ECM: silenced");
                self.control.shutups.fetch_add(1, Ordering::SeqCst);
                self.silenced = true;
                return;
            }
            if m == self.return_mode {
                debug!("Simulated ECM: returning to normal mode");
                self.silenced = false;
                return;
            }
        }

        if addressed
            && bytes.len() == frame::REQUEST_FRAME_LEN
            && bytes[2] == mode::DATA_REQUEST
        {
            let id = bytes[3];
            *self
                .control
                .requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(id)
                .or_insert(0) += 1;

            if self.control.take_drop() {
                trace!("Simulated ECM: dropping reply to packet {}", id);
                return;
            }
            let delay = self.control.reply_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay));
            }
            if let Some(reply) = self.reply(id) {
                self.rx.extend(reply);
            }
            return;
        }

        self.control
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes.to_vec());
    }

    fn reply(&mut self, id: u8) -> Option<Vec<u8>> {
        let packet = self.packets.get(&id)?.clone();
        let length = packet.length;
        if length < frame::MODE_FRAME_LEN {
            return None;
        }

        let mut reply = vec![0u8; length];
        reply[0] = self.address;
        reply[1] = frame::msg_length(length);
        reply[2] = mode::DATA_REQUEST;
        let data = &mut reply[3..length - 1];
        match &packet.payload {
            Some(payload) => {
                let n = payload.len().min(data.len());
                data[..n].copy_from_slice(&payload[..n]);
            }
            None => self.rng.fill(data),
        }
        reply[length - 1] = frame::checksum(&reply[..length - 1]);

        if self.corruption_percent > 0 && self.rng.gen_range(0..100) < self.corruption_percent {
            debug!("Simulated ECM: corrupting reply to packet {}", id);
            for _ in 0..self.rng.gen_range(1..=3) {
                let at = self.rng.gen_range(0..length);
                reply[at] ^= self.rng.gen_range(1..=u8::MAX);
            }
        }
        Some(reply)
    }
}

impl SerialTransport for SimulatedEcm {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.control.is_ready() {
            return Err(TransportError::NotReady);
        }
        trace!("Simulated ECM <- {}", frame::hex(bytes));
        // The line is shared, so everything we send comes straight back
        self.rx.extend(bytes.iter().copied());
        self.handle_frame(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.control.is_ready() {
            return Err(TransportError::NotReady);
        }
        if self.rx.is_empty() && self.chatter && !self.silenced {
            self.rx.push_back(IDLE_BYTE);
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn purge_rx(&mut self) -> Result<(), TransportError> {
        self.rx.clear();
        Ok(())
    }

    fn purge_tx(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_ready(&mut self) -> bool {
        self.control.is_ready()
    }
}
