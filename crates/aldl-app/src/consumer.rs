//! Record Consumers
//!
//! Consumers follow the record store from a starting record, one record at
//! a time, and hand each record to a [`RecordSink`]. A consumer that falls
//! a full buffer behind skips ahead to the newest record.

use acq_scheduler::Aldl;
use aldl_protocol::ConnectionState;
use data_convert::Value;
use record_store::{Record, RecordId, StoreError};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Sleep between polls while the link is down
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

/// Something that takes records in order
pub trait RecordSink {
    fn name(&self) -> &str;

    fn accept(&mut self, aldl: &Aldl, record: &Record) -> Result<(), SinkError>;

    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Block until the record buffer is primed; false if quit first
pub fn wait_until_buffered(aldl: &Aldl) -> bool {
    while !aldl.is_ready() {
        if aldl.state() == ConnectionState::Quit {
            return false;
        }
        thread::sleep(IDLE_POLL);
    }
    true
}

/// Feed every record after `start` into `sink` until quit.
///
/// Returns the number of records accepted.
pub fn follow<S: RecordSink + ?Sized>(
    aldl: &Aldl,
    start: RecordId,
    sink: &mut S,
) -> Result<u64, SinkError> {
    info!("Consumer {} following from record {}", sink.name(), start.seq());
    let mut rec = start;
    let mut accepted: u64 = 0;

    loop {
        match aldl.next_wait(rec) {
            Ok(Some(next)) => match aldl.record(next) {
                Ok(record) => {
                    sink.accept(aldl, &record)?;
                    accepted += 1;
                    rec = next;
                }
                Err(StoreError::Overrun { seq, current }) => {
                    warn!("{}: record {} lost to {}, skipping ahead", sink.name(), seq, current);
                    rec = aldl.newest();
                }
                Err(e) => return Err(e.into()),
            },
            Ok(None) => {
                if aldl.state() == ConnectionState::Quit {
                    break;
                }
                thread::sleep(IDLE_POLL);
            }
            Err(StoreError::Overrun { seq, current }) => {
                warn!("{}: record {} lost to {}, skipping ahead", sink.name(), seq, current);
                rec = aldl.newest();
            }
            Err(e) => return Err(e.into()),
        }
    }

    sink.finish()?;
    info!("Consumer {} done after {} records", sink.name(), accepted);
    Ok(accepted)
}

/// Logs the `log` signals of every Nth record and raises alarms as they change
pub struct LogSink {
    every: u64,
    seen: u64,
    active: HashSet<String>,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self {
            every,
            seen: 0,
            active: HashSet::new(),
        }
    }

    /// Names of signals currently in alarm
    pub fn active_alarms(&self) -> &HashSet<String> {
        &self.active
    }

    fn summary(aldl: &Aldl, record: &Record) -> String {
        aldl.signals()
            .iter()
            .zip(&record.values)
            .filter(|(def, _)| def.log)
            .map(|(def, value)| format!("{}={}", def.name, def.format(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl RecordSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn accept(&mut self, aldl: &Aldl, record: &Record) -> Result<(), SinkError> {
        self.seen += 1;
        if self.every > 0 && self.seen % self.every == 0 {
            info!("[{} @ {}ms] {}", record.id.seq(), record.t_ms, Self::summary(aldl, record));
        }

        let alarms = aldl.converter().alarms(&record.values);
        let now: HashSet<String> = alarms.iter().map(|a| a.signal().to_string()).collect();
        for alarm in &alarms {
            if !self.active.contains(alarm.signal()) {
                warn!("Alarm: {}", alarm);
            }
        }
        for cleared in self.active.difference(&now) {
            info!("Alarm cleared: {}", cleared);
        }
        self.active = now;
        Ok(())
    }
}

#[derive(Serialize)]
struct Row<'a> {
    seq: u64,
    t_ms: u32,
    values: BTreeMap<&'a str, Value>,
}

/// Writes each record as one JSON object per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn accept(&mut self, aldl: &Aldl, record: &Record) -> Result<(), SinkError> {
        let values = aldl
            .signals()
            .iter()
            .zip(&record.values)
            .filter(|(def, _)| def.log)
            .map(|(def, value)| (def.name.as_str(), *value))
            .collect();
        let row = Row {
            seq: record.id.seq(),
            t_ms: record.t_ms,
            values,
        };
        serde_json::to_writer(&mut self.writer, &row)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        debug!("Flushing JSON lines output");
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_scheduler::AcqConfig;
    use aldl_protocol::{ByteOrder, CommDef, HandshakeDef, PacketDefinition};
    use data_convert::{BitSize, SignalDefinition, SignalKind};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn aldl() -> Aldl {
        let comm = CommDef {
            address: 0xF4,
            checksum_enable: true,
            handshake: HandshakeDef {
                shutup_mode: Some(0x08),
                return_mode: Some(0x09),
                ..Default::default()
            },
            packets: vec![PacketDefinition {
                id: 0,
                length: 16,
                header_offset: 3,
                frequency: 1,
            }],
            byte_order: ByteOrder::Msb,
        };
        let signal = |name: &str, log: bool, alarm_high: Option<f64>| SignalDefinition {
            name: name.to_string(),
            description: String::new(),
            uom: Some("C".to_string()),
            precision: 0,
            packet: 0,
            offset: 0,
            log,
            display: true,
            alarm_low: None,
            alarm_high,
            kind: SignalKind::Int {
                multiplier: 1,
                adder: 0,
                min: 0,
                max: 255,
                size: BitSize::Eight,
            },
        };
        let signals = vec![signal("CTS", true, Some(100.0)), signal("HIDDEN", false, None)];
        let config = AcqConfig {
            bufsize: 10,
            ..Default::default()
        };
        Aldl::new(comm, signals, config).unwrap()
    }

    fn push(aldl: &Aldl, value: i32) -> RecordId {
        let mut pending = aldl.store().create();
        pending.values_mut()[0] = Value::Int(value);
        pending.values_mut()[1] = Value::Int(value);
        aldl.store().link(pending)
    }

    struct Collect(Arc<Mutex<Vec<u64>>>);

    impl RecordSink for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn accept(&mut self, _aldl: &Aldl, record: &Record) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(record.id.seq());
            Ok(())
        }
    }

    #[test]
    fn test_json_lines_output() {
        let aldl = aldl();
        let id = push(&aldl, 42);
        let record = aldl.record(id).unwrap();

        let mut sink = JsonLinesSink::new(Vec::new());
        sink.accept(&aldl, &record).unwrap();
        sink.finish().unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.ends_with('\n'));
        let row: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(row["seq"], 1);
        assert_eq!(row["values"]["CTS"], 42);
        assert!(row["values"].get("HIDDEN").is_none());
    }

    #[test]
    fn test_log_summary_formats_units_once() {
        let aldl = aldl();
        let record = aldl.record(push(&aldl, 42)).unwrap();
        assert_eq!(LogSink::summary(&aldl, &record), "CTS=42 C");
    }

    #[test]
    fn test_log_sink_tracks_alarms() {
        let aldl = aldl();
        let mut sink = LogSink::new(1);

        let hot = aldl.record(push(&aldl, 120)).unwrap();
        sink.accept(&aldl, &hot).unwrap();
        assert!(sink.active_alarms().contains("CTS"));

        let cool = aldl.record(push(&aldl, 80)).unwrap();
        sink.accept(&aldl, &cool).unwrap();
        assert!(sink.active_alarms().is_empty());
    }

    #[test]
    fn test_follow_until_quit() {
        let aldl = Arc::new(aldl());
        aldl.set_state(ConnectionState::Connected);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let start = aldl.newest();
        let follower = {
            let aldl = Arc::clone(&aldl);
            let mut sink = Collect(Arc::clone(&seen));
            thread::spawn(move || follow(&aldl, start, &mut sink))
        };

        for v in 0..3 {
            push(&aldl, v);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        aldl.quit();

        assert_eq!(follower.join().unwrap().unwrap(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_follow_skips_overrun() {
        let aldl = Arc::new(aldl());
        aldl.set_state(ConnectionState::Connected);
        let start = aldl.newest();
        // Lap the ring so the start record is gone
        for v in 0..15 {
            push(&aldl, v);
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let follower = {
            let aldl = Arc::clone(&aldl);
            let mut sink = Collect(Arc::clone(&seen));
            thread::spawn(move || follow(&aldl, start, &mut sink))
        };

        thread::sleep(Duration::from_millis(50));
        push(&aldl, 99);
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        aldl.quit();
        follower.join().unwrap().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![16]);
    }
}
