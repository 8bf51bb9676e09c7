//! Acquisition Loop
//!
//! Sweeps over every configured packet until quit is requested, keeping the
//! ECM connection alive, interleaving queued auxiliary commands and turning
//! each complete sweep into one record.

use crate::context::Aldl;
use crate::queue::AuxCommand;
use crate::stats::{FailureKind, PacketRate};
use aldl_protocol::{
    connect, frame, ConnectionState, Link, LinkError, PacketDefinition, SerialTransport, Timing,
};
use metrics::{counter, gauge};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Polling interval while paused or while the serial device is missing
const SPIN_DELAY: Duration = Duration::from_millis(250);

/// Sends per auxiliary command when repeating is enabled
const AUX_COMMAND_SENDS: usize = 3;

/// Decides on which sweeps a packet is polled
#[derive(Debug, Clone)]
pub struct FrequencyGate {
    frequency: u32,
    counter: u32,
}

impl FrequencyGate {
    /// Starts primed so the first sweep polls every enabled packet
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency,
            counter: frequency,
        }
    }

    /// Advance one sweep; true if the packet is due
    pub fn tick(&mut self) -> bool {
        if self.frequency == 0 {
            return false;
        }
        if self.counter < self.frequency {
            self.counter += 1;
            false
        } else {
            self.counter = 1;
            true
        }
    }
}

/// Runtime state of one polled packet
struct PacketSlot {
    def: PacketDefinition,
    request: Vec<u8>,
    gate: FrequencyGate,
}

/// Outcome of one packet slot
enum SlotOutcome {
    Polled,
    /// An auxiliary command replaced the poll; the sweep ends early
    Command,
    Quit,
}

/// The acquisition loop, owner of the serial link
pub struct Acquisition<T: SerialTransport> {
    aldl: Arc<Aldl>,
    link: Link<T>,
    slots: Vec<PacketSlot>,
    /// Raw reply of each packet, by packet index
    buffers: Vec<Vec<u8>>,
    rate: PacketRate,
    buffered: usize,
}

impl<T: SerialTransport> Acquisition<T> {
    pub fn new(aldl: Arc<Aldl>, transport: T, timing: Timing) -> Self {
        let comm = aldl.comm();
        let slots: Vec<PacketSlot> = comm
            .packets
            .iter()
            .map(|def| PacketSlot {
                request: comm.packet_request(def),
                gate: FrequencyGate::new(def.frequency),
                def: def.clone(),
            })
            .collect();
        let buffers = slots.iter().map(|s| vec![0; s.def.length]).collect();
        let rate = PacketRate::new(Duration::from_secs(aldl.config().pktrate_window_s));

        Self {
            link: Link::new(transport, timing),
            slots,
            buffers,
            rate,
            buffered: 0,
            aldl,
        }
    }

    /// Run until quit is requested, then release the transport
    pub fn run(mut self) {
        if let Some(nice) = self.aldl.config().acq_priority {
            apply_priority(nice);
        }
        info!("Acquisition started, {} packets", self.slots.len());
        self.aldl.state_cell().transition(ConnectionState::Connecting);

        while !self.aldl.state_cell().quit_requested() {
            match self.sweep() {
                SlotOutcome::Polled => self.materialize(),
                SlotOutcome::Command => {}
                SlotOutcome::Quit => break,
            }
            self.latch_ready();
        }

        self.link.close();
        let stats = self.aldl.stats();
        info!(
            "Acquisition stopped ({} timeouts, {} header, {} checksum failures)",
            stats.timeouts, stats.header_failures, stats.checksum_failures
        );
    }

    fn sweep(&mut self) -> SlotOutcome {
        for index in 0..self.slots.len() {
            if !self.slots[index].gate.tick() {
                continue;
            }
            match self.acquire(index) {
                SlotOutcome::Polled => {}
                other => return other,
            }
        }
        SlotOutcome::Polled
    }

    /// Poll packet `index`, retrying in place until it succeeds
    fn acquire(&mut self, index: usize) -> SlotOutcome {
        let aldl = Arc::clone(&self.aldl);
        let state = aldl.state_cell();
        loop {
            while state.get() == ConnectionState::Pause {
                thread::sleep(SPIN_DELAY);
            }
            if state.quit_requested() || !self.wait_for_serial() {
                return SlotOutcome::Quit;
            }

            if state.get().is_disconnected() {
                match connect(&mut self.link, aldl.comm(), state) {
                    Ok(()) => {}
                    Err(LinkError::Quit) => return SlotOutcome::Quit,
                    Err(e) => {
                        warn!("Reconnect interrupted: {}", e);
                        continue;
                    }
                }
            } else if !self.link.timing().aggressive && aldl.config().rate_us > 0 {
                thread::sleep(Duration::from_micros(aldl.config().rate_us));
            }

            let started = Instant::now();
            if let Some(rate) = self.rate.poll() {
                aldl.set_packet_rate(rate);
                gauge!("aldl_packets_per_second").set(rate as f64);
            }

            if let Some(command) = aldl.commands().pop() {
                self.send_command(command);
                return SlotOutcome::Command;
            }

            if let Err(kind) = self.fetch(index) {
                counter!("aldl_packet_failures_total", "kind" => kind.as_str()).increment(1);
                debug!("Packet {} failed: {}", self.slots[index].def.id, kind.as_str());
                aldl.record_failure(kind);
                continue;
            }
            aldl.record_success();
            self.rate.tick();
            counter!("aldl_packets_total").increment(1);

            if let Some(budget) = aldl.comm().lag_budget() {
                let elapsed = started.elapsed();
                if elapsed >= budget {
                    warn!("Packet retrieval took {:?}, link is lagging", elapsed);
                    state.transition(ConnectionState::Laggy);
                }
            }
            return SlotOutcome::Polled;
        }
    }

    /// Block while the serial device is missing; false if quit meanwhile
    fn wait_for_serial(&mut self) -> bool {
        if self.link.is_ready() {
            return true;
        }
        let state = self.aldl.state_cell();
        let was_connected = !state.get().is_disconnected();
        state.transition(ConnectionState::SerialError);
        warn!("Serial device not ready");

        let mut downtime = Duration::ZERO;
        while !self.link.is_ready() {
            if state.quit_requested() {
                return false;
            }
            thread::sleep(SPIN_DELAY);
            downtime += SPIN_DELAY;
        }
        info!("Serial device back after {:?}", downtime);

        // A short outage leaves the ECM in diagnostic mode
        if let Some(budget) = self.aldl.comm().lag_budget() {
            if was_connected && downtime < budget {
                state.transition(ConnectionState::Connected);
            }
        }
        true
    }

    /// Request packet `index` and validate the reply
    fn fetch(&mut self, index: usize) -> Result<(), FailureKind> {
        let comm = self.aldl.comm();
        let slot = &self.slots[index];
        let buf = &mut self.buffers[index];

        if let Err(e) = self.link.get_packet(&slot.request, buf) {
            trace!("Packet {} retrieval: {}", slot.def.id, e);
            return Err(FailureKind::Timeout);
        }
        if self.aldl.config().header_check {
            let expected = [comm.address, frame::msg_length(slot.def.length)];
            match buf.get(..2) {
                Some(header) if header == expected => {}
                _ => {
                    trace!("Bad header: {}", frame::hex(&buf[..buf.len().min(2)]));
                    return Err(FailureKind::Header);
                }
            }
        }
        if comm.checksum_enable && !frame::verify(buf) {
            trace!("Checksum failed, sum {:02X}", frame::frame_sum(buf));
            return Err(FailureKind::Checksum);
        }
        Ok(())
    }

    fn send_command(&mut self, command: AuxCommand) {
        let sends = if self.aldl.config().aux_command_repeat {
            AUX_COMMAND_SENDS
        } else {
            1
        };
        debug!("Sending aux command {}", frame::hex(&command.bytes));
        for _ in 0..sends {
            if let Err(e) = self.link.write(&command.bytes) {
                warn!("Aux command write failed: {}", e);
                break;
            }
        }
        thread::sleep(Duration::from_millis(command.delay_ms));
        if let Err(e) = self.link.purge() {
            debug!("Purge after aux command failed: {}", e);
        }
        counter!("aldl_aux_commands_total").increment(1);
    }

    /// Convert the current packet buffers into a new record
    fn materialize(&mut self) {
        let store = self.aldl.store();
        let mut pending = store.create();
        trace!("Converting record {} at {}ms", pending.id().seq(), pending.t_ms());
        self.aldl
            .converter()
            .convert(&self.buffers, pending.values_mut());
        store.link(pending);
        counter!("aldl_records_total").increment(1);
    }

    fn latch_ready(&mut self) {
        if self.aldl.is_ready() {
            return;
        }
        if self.buffered >= self.aldl.config().bufstart() {
            self.aldl.set_ready();
        } else {
            self.buffered += 1;
        }
    }
}

/// Best-effort nice value for the calling thread
#[cfg(target_os = "linux")]
pub fn apply_priority(nice: i32) {
    // PRIO_PROCESS with who = 0 targets the calling thread on Linux
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if rc == 0 {
        info!("Acquisition thread priority set to {}", nice);
    } else {
        warn!(
            "Could not set acquisition priority {}: {}",
            nice,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply_priority(nice: i32) {
    warn!("Acquisition priority {} not supported on this platform", nice);
}
