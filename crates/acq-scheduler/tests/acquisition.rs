//! End-to-end acquisition against the simulated ECM

use acq_scheduler::{AcqConfig, AcqError, Acquisition, Aldl, AuxCommand};
use aldl_protocol::{
    ByteOrder, CommDef, ConnectionState, HandshakeDef, PacketDefinition, SimControl,
    SimulatedEcm, Timing,
};
use data_convert::{BitSize, SignalDefinition, SignalKind, Value};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn comm() -> CommDef {
    CommDef {
        address: 0xF4,
        checksum_enable: true,
        handshake: HandshakeDef {
            shutup_mode: Some(0x08),
            return_mode: Some(0x09),
            idle_delay_ms: 1,
            shutup_repeat: 3,
            shutup_repeat_delay_ms: 5,
            ..Default::default()
        },
        packets: vec![
            PacketDefinition {
                id: 0,
                length: 16,
                header_offset: 3,
                frequency: 1,
            },
            PacketDefinition {
                id: 1,
                length: 8,
                header_offset: 3,
                frequency: 2,
            },
        ],
        byte_order: ByteOrder::Msb,
    }
}

fn signal(name: &str, offset: usize, kind: SignalKind) -> SignalDefinition {
    SignalDefinition {
        name: name.to_string(),
        description: String::new(),
        uom: None,
        precision: 1,
        packet: 0,
        offset,
        log: true,
        display: true,
        alarm_low: None,
        alarm_high: None,
        kind,
    }
}

fn signals() -> Vec<SignalDefinition> {
    vec![
        signal(
            "RPM",
            0,
            SignalKind::Int {
                multiplier: 25,
                adder: 0,
                min: 0,
                max: 65535,
                size: BitSize::Eight,
            },
        ),
        signal(
            "MAP",
            1,
            SignalKind::Float {
                multiplier: 0.5,
                adder: 0.0,
                min: 0.0,
                max: 255.0,
                size: BitSize::Eight,
            },
        ),
        signal(
            "CLOSEDLOOP",
            2,
            SignalKind::Bool {
                bit: 2,
                invert: false,
                error_code: false,
            },
        ),
    ]
}

struct Harness {
    aldl: Arc<Aldl>,
    control: Arc<SimControl>,
    thread: JoinHandle<()>,
}

impl Harness {
    fn start(config: AcqConfig) -> Self {
        Self::start_with(comm(), config)
    }

    fn start_with(comm: CommDef, config: AcqConfig) -> Self {
        let ecm = SimulatedEcm::from_commdef(&comm, 0xA1D1)
            .with_payload(0, vec![0x10, 0x20, 0b0000_0100]);
        let control = ecm.control();
        let aldl = Arc::new(Aldl::new(comm, signals(), config).unwrap());

        let acquisition = Acquisition::new(Arc::clone(&aldl), ecm, Timing::default());
        let thread = thread::spawn(move || acquisition.run());
        Self {
            aldl,
            control,
            thread,
        }
    }

    fn wait_connected(&self) {
        assert!(wait_for(Duration::from_secs(10), || {
            self.aldl.state() == ConnectionState::Connected
        }));
    }

    fn entered(&self, state: ConnectionState) -> bool {
        self.aldl.state_history().contains(&state)
    }

    fn stop(self) {
        self.aldl.quit();
        self.thread.join().unwrap();
    }
}

fn config() -> AcqConfig {
    AcqConfig {
        bufsize: 20,
        bufstart: Some(3),
        maxfail: 3,
        ..Default::default()
    }
}

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_produces_decoded_records() {
    let h = Harness::start(config());
    assert!(wait_for(Duration::from_secs(10), || h.aldl.is_ready()));
    assert_eq!(h.aldl.state(), ConnectionState::Connected);

    let newest = h.aldl.newest();
    assert!(newest.seq() >= 4);
    let record = h.aldl.record(newest).unwrap();
    assert_eq!(
        record.values,
        vec![Value::Int(400), Value::Float(16.0), Value::Bool(true)]
    );

    // Packet 1 runs at half rate
    let fast = h.control.requests(0);
    let slow = h.control.requests(1);
    assert!(slow >= 1 && slow < fast, "fast {} slow {}", fast, slow);

    let stats = h.aldl.stats();
    assert_eq!(stats.consecutive_failures, 0);
    h.stop();
}

#[test]
fn test_consumer_follows_records_in_order() {
    let h = Harness::start(config());
    let mut rec = h.aldl.newest();
    let mut seen = Vec::new();
    while seen.len() < 5 {
        rec = h.aldl.next_waitf(rec).unwrap();
        seen.push(rec.seq());
    }
    assert!(seen.windows(2).all(|w| w[1] == w[0] + 1), "{:?}", seen);
    h.stop();
}

#[test]
fn test_aux_command_is_sent() {
    let h = Harness::start(config());
    assert!(wait_for(Duration::from_secs(10), || {
        h.aldl.state() == ConnectionState::Connected
    }));

    let command = AuxCommand::request(h.aldl.comm(), 0x04, 0x10, 1);
    h.aldl.push_command(command.clone());
    assert!(wait_for(Duration::from_secs(5), || {
        h.control.commands().len() >= 3
    }));
    assert!(h.control.commands().iter().all(|c| *c == command.bytes));
    h.stop();
}

#[test]
fn test_desync_then_recover() {
    let h = Harness::start(config());
    h.wait_connected();
    let shutups = h.control.shutups();

    h.control.drop_replies(5);
    assert!(wait_for(Duration::from_secs(10), || h.entered(ConnectionState::Desync)));
    assert!(wait_for(Duration::from_secs(10), || {
        h.aldl.state() == ConnectionState::Connected && h.aldl.stats().consecutive_failures == 0
    }));
    assert!(h.aldl.stats().timeouts >= 4);
    // Lost sync forces a full handshake
    assert!(h.control.shutups() > shutups);
    h.stop();
}

#[test]
fn test_short_serial_outage_skips_handshake() {
    let h = Harness::start(config());
    h.wait_connected();
    let shutups = h.control.shutups();

    h.control.set_ready(false);
    assert!(wait_for(Duration::from_secs(5), || {
        h.aldl.state() == ConnectionState::SerialError
    }));
    thread::sleep(Duration::from_millis(300));
    h.control.set_ready(true);
    h.wait_connected();
    let before = h.control.requests(0);
    assert!(wait_for(Duration::from_secs(5), || h.control.requests(0) > before + 2));

    assert_eq!(h.control.shutups(), shutups);
    let history = h.aldl.state_history();
    let outage = history
        .iter()
        .rposition(|s| *s == ConnectionState::SerialError)
        .unwrap();
    assert_eq!(history.get(outage + 1), Some(&ConnectionState::Connected));
    h.stop();
}

#[test]
fn test_long_serial_outage_reconnects() {
    let mut comm = comm();
    comm.handshake.shutup_time_ms = 300;
    let h = Harness::start_with(comm, config());
    h.wait_connected();
    let shutups = h.control.shutups();

    h.control.set_ready(false);
    assert!(wait_for(Duration::from_secs(5), || {
        h.aldl.state() == ConnectionState::SerialError
    }));
    thread::sleep(Duration::from_millis(1000));
    h.control.set_ready(true);
    h.wait_connected();

    assert!(h.control.shutups() > shutups);
    let history = h.aldl.state_history();
    let outage = history
        .iter()
        .rposition(|s| *s == ConnectionState::SerialError)
        .unwrap();
    assert_eq!(history.get(outage + 1), Some(&ConnectionState::Connecting));
    h.stop();
}

#[test]
fn test_slow_replies_mark_link_laggy() {
    let mut comm = comm();
    comm.handshake.shutup_time_ms = 100;
    let h = Harness::start_with(comm, config());
    h.wait_connected();
    assert!(!h.entered(ConnectionState::Laggy));
    let shutups = h.control.shutups();

    h.control.set_reply_delay(Duration::from_millis(150));
    assert!(wait_for(Duration::from_secs(10), || h.entered(ConnectionState::Laggy)));
    assert!(wait_for(Duration::from_secs(10), || h.control.shutups() > shutups));
    h.stop();
}

#[test]
fn test_rejects_packet_too_short() {
    let mut comm = comm();
    comm.packets[0].length = 1;
    comm.packets[0].header_offset = 0;
    assert!(matches!(
        Aldl::new(comm, vec![], config()),
        Err(AcqError::CommDef(_))
    ));
}

#[test]
fn test_quit_while_paused() {
    let h = Harness::start(config());
    assert!(wait_for(Duration::from_secs(10), || {
        h.aldl.state() == ConnectionState::Connected
    }));
    h.aldl.set_state(ConnectionState::Pause);
    thread::sleep(Duration::from_millis(300));
    let before = h.control.requests(0);
    thread::sleep(Duration::from_millis(300));
    assert_eq!(h.control.requests(0), before);
    h.stop();
}
