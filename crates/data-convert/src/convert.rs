//! Raw Packet Conversion
//!
//! Maps bytes from the most recent packet buffers to typed signal values.
//! Every offset is checked against the comm definition when the converter is
//! built, so conversion itself never reads out of bounds.

use crate::alarm::Alarm;
use crate::error::DefinitionError;
use crate::signal::{SignalDefinition, SignalKind, Value, FORBIDDEN_CHARS};
use aldl_protocol::{ByteOrder, CommDef};
use std::collections::HashMap;
use tracing::debug;

/// Converts raw packet buffers into records of signal values
#[derive(Debug, Clone)]
pub struct Converter {
    signals: Vec<SignalDefinition>,
    /// Header offset of each packet, by packet index
    header_offsets: Vec<usize>,
    byte_order: ByteOrder,
    /// Clamp INT/FLOAT results to [min, max]
    clamp: bool,
    names: HashMap<String, usize>,
}

impl Converter {
    /// Validate `signals` against `comm` and build a converter
    pub fn new(
        comm: &CommDef,
        signals: Vec<SignalDefinition>,
        clamp: bool,
    ) -> Result<Self, DefinitionError> {
        let mut names = HashMap::with_capacity(signals.len());
        for (index, signal) in signals.iter().enumerate() {
            check_signal(comm, index, signal)?;
            if let Some(first) = names.insert(signal.name.clone(), index) {
                return Err(DefinitionError::Duplicate {
                    name: signal.name.clone(),
                    first,
                    second: index,
                });
            }
        }
        debug!("Loaded {} signal definitions", signals.len());

        Ok(Self {
            header_offsets: comm.packets.iter().map(|p| p.header_offset).collect(),
            byte_order: comm.byte_order,
            signals,
            clamp,
            names,
        })
    }

    pub fn signals(&self) -> &[SignalDefinition] {
        &self.signals
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Index of the signal called `name`
    pub fn index_by_name(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// A record's worth of zero values
    pub fn template(&self) -> Vec<Value> {
        self.signals.iter().map(|s| s.kind.zero()).collect()
    }

    /// Convert every signal from `buffers` (raw packet data, by packet index)
    pub fn convert(&self, buffers: &[Vec<u8>], out: &mut [Value]) {
        for (index, slot) in out.iter_mut().enumerate().take(self.signals.len()) {
            *slot = self.convert_one(index, buffers);
        }
    }

    /// Convert signal `index` from `buffers`
    pub fn convert_one(&self, index: usize, buffers: &[Vec<u8>]) -> Value {
        let Some(signal) = self.signals.get(index) else {
            return Value::default();
        };
        let start = self.header_offsets.get(signal.packet).copied().unwrap_or(0) + signal.offset;
        let data = buffers
            .get(signal.packet)
            .and_then(|b| b.get(start..start + signal.kind.width()))
            .unwrap_or(&[]);
        let raw = assemble(data);

        match signal.kind {
            SignalKind::Int {
                multiplier,
                adder,
                min,
                max,
                ..
            } => {
                let v = (raw as i32).wrapping_mul(multiplier).wrapping_add(adder);
                Value::Int(if self.clamp { v.clamp(min, max) } else { v })
            }
            SignalKind::Float {
                multiplier,
                adder,
                min,
                max,
                ..
            } => {
                let v = raw as f32 * multiplier + adder;
                Value::Float(if self.clamp { v.clamp(min, max) } else { v })
            }
            SignalKind::Bool { bit, invert, .. } => {
                let pos = match self.byte_order {
                    ByteOrder::Msb => bit,
                    ByteOrder::Lsb => 7 - bit,
                };
                Value::Bool(((raw >> pos) & 1 == 1) ^ invert)
            }
        }
    }

    /// Check a converted value of signal `index` against its alarm settings
    pub fn check_alarm(&self, index: usize, value: &Value) -> Option<Alarm> {
        let signal = self.signals.get(index)?;
        let error_flag = matches!(signal.kind, SignalKind::Bool { error_code: true, .. });
        if error_flag && *value == Value::Bool(true) {
            return Some(Alarm::ErrorCode {
                signal: signal.name.clone(),
            });
        }
        let v = value.as_f64();
        if let Some(threshold) = signal.alarm_low.filter(|t| v < *t) {
            return Some(Alarm::Low {
                signal: signal.name.clone(),
                value: v,
                threshold,
            });
        }
        if let Some(threshold) = signal.alarm_high.filter(|t| v > *t) {
            return Some(Alarm::High {
                signal: signal.name.clone(),
                value: v,
                threshold,
            });
        }
        None
    }

    /// Every alarm raised by a full record of values
    pub fn alarms(&self, values: &[Value]) -> Vec<Alarm> {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| self.check_alarm(i, v))
            .collect()
    }
}

/// Unsigned integer from one byte, or two bytes most significant first
fn assemble(data: &[u8]) -> u32 {
    match data {
        [hi, lo] => (u32::from(*hi) << 8) | u32::from(*lo),
        [b] => u32::from(*b),
        _ => 0,
    }
}

fn check_chars(
    signal: &SignalDefinition,
    field: &'static str,
    text: &str,
) -> Result<(), DefinitionError> {
    match text.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        Some(ch) => Err(DefinitionError::BadChar {
            signal: signal.name.clone(),
            field,
            ch,
        }),
        None => Ok(()),
    }
}

fn check_signal(
    comm: &CommDef,
    index: usize,
    signal: &SignalDefinition,
) -> Result<(), DefinitionError> {
    if signal.name.is_empty() {
        return Err(DefinitionError::EmptyName(index));
    }
    check_chars(signal, "name", &signal.name)?;
    if let Some(uom) = &signal.uom {
        check_chars(signal, "uom", uom)?;
    }

    let packet = comm
        .packets
        .get(signal.packet)
        .ok_or_else(|| DefinitionError::PacketIndex {
            signal: signal.name.clone(),
            packet: signal.packet,
            count: comm.packets.len(),
        })?;
    let end = packet.header_offset + signal.offset + signal.kind.width();
    if end > packet.length {
        return Err(DefinitionError::OutOfBounds {
            signal: signal.name.clone(),
            end,
            length: packet.length,
        });
    }

    let range = match signal.kind {
        SignalKind::Int { min, max, .. } => Some((min as f64, max as f64)),
        SignalKind::Float { min, max, .. } => Some((min as f64, max as f64)),
        SignalKind::Bool { bit, .. } if bit > 7 => {
            return Err(DefinitionError::BitPosition {
                signal: signal.name.clone(),
                bit,
            })
        }
        SignalKind::Bool { .. } => None,
    };
    let bad_range = |(min, max): &(f64, f64)| min.is_nan() || max.is_nan() || min > max;
    if let Some((min, max)) = range.filter(bad_range) {
        return Err(DefinitionError::Range {
            signal: signal.name.clone(),
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::BitSize;
    use aldl_protocol::{HandshakeDef, PacketDefinition};
    use proptest::prelude::*;

    fn comm(byte_order: ByteOrder) -> CommDef {
        CommDef {
            address: 0xF4,
            checksum_enable: true,
            handshake: HandshakeDef::default(),
            packets: vec![PacketDefinition {
                id: 0,
                length: 16,
                header_offset: 3,
                frequency: 1,
            }],
            byte_order,
        }
    }

    fn signal(name: &str, offset: usize, kind: SignalKind) -> SignalDefinition {
        SignalDefinition {
            name: name.to_string(),
            description: String::new(),
            uom: None,
            precision: 0,
            packet: 0,
            offset,
            log: true,
            display: true,
            alarm_low: None,
            alarm_high: None,
            kind,
        }
    }

    fn int(multiplier: i32, adder: i32, max: i32, size: BitSize) -> SignalKind {
        SignalKind::Int {
            multiplier,
            adder,
            min: 0,
            max,
            size,
        }
    }

    fn float(multiplier: f32, adder: f32) -> SignalKind {
        SignalKind::Float {
            multiplier,
            adder,
            min: 0.0,
            max: 9_999_999.0,
            size: BitSize::Eight,
        }
    }

    fn flag(bit: u8, invert: bool) -> SignalKind {
        SignalKind::Bool {
            bit,
            invert,
            error_code: false,
        }
    }

    /// Packet buffer with `data` placed right after the header
    fn packet(data: &[u8]) -> Vec<Vec<u8>> {
        let mut buf = vec![0u8; 16];
        buf[3..3 + data.len()].copy_from_slice(data);
        vec![buf]
    }

    #[test]
    fn test_linear_transform() {
        let conv = Converter::new(
            &comm(ByteOrder::Msb),
            vec![
                signal("I", 0, int(2, 1, 65535, BitSize::Eight)),
                signal("F", 0, float(2.0, 1.0)),
            ],
            true,
        )
        .unwrap();
        let buffers = packet(&[0x01]);
        assert_eq!(conv.convert_one(0, &buffers), Value::Int(3));
        assert_eq!(conv.convert_one(1, &buffers), Value::Float(3.0));
    }

    #[test]
    fn test_sixteen_bit_big_endian() {
        let conv = Converter::new(
            &comm(ByteOrder::Msb),
            vec![signal("RPM", 1, int(1, 0, 65535, BitSize::Sixteen))],
            true,
        )
        .unwrap();
        assert_eq!(conv.convert_one(0, &packet(&[0x00, 0x12, 0x34])), Value::Int(0x1234));
    }

    #[test]
    fn test_bool_extraction() {
        let buffers = packet(&[0b0000_0100]);
        let conv = Converter::new(
            &comm(ByteOrder::Msb),
            vec![signal("A", 0, flag(2, false)), signal("B", 0, flag(2, true))],
            true,
        )
        .unwrap();
        assert_eq!(conv.convert_one(0, &buffers), Value::Bool(true));
        assert_eq!(conv.convert_one(1, &buffers), Value::Bool(false));

        // Mirrored bit numbering
        let conv = Converter::new(&comm(ByteOrder::Lsb), vec![signal("C", 0, flag(5, false))], true)
            .unwrap();
        assert_eq!(conv.convert_one(0, &buffers), Value::Bool(true));
    }

    #[test]
    fn test_clamping() {
        let defs = vec![signal("I", 0, int(1, 0, 100, BitSize::Eight))];
        let buffers = packet(&[200]);

        let clamped = Converter::new(&comm(ByteOrder::Msb), defs.clone(), true).unwrap();
        assert_eq!(clamped.convert_one(0, &buffers), Value::Int(100));

        let raw = Converter::new(&comm(ByteOrder::Msb), defs, false).unwrap();
        assert_eq!(raw.convert_one(0, &buffers), Value::Int(200));
    }

    #[test]
    fn test_convert_fills_record() {
        let conv = Converter::new(
            &comm(ByteOrder::Msb),
            vec![signal("A", 0, float(0.5, 0.0)), signal("B", 1, flag(0, false))],
            true,
        )
        .unwrap();
        let mut out = conv.template();
        assert_eq!(out, vec![Value::Float(0.0), Value::Bool(false)]);
        conv.convert(&packet(&[10, 1]), &mut out);
        assert_eq!(out, vec![Value::Float(5.0), Value::Bool(true)]);
        assert_eq!(conv.index_by_name("B"), Some(1));
        assert_eq!(conv.index_by_name("Z"), None);
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        // 3 header + 12 offset + 2 bytes = 17 > 16
        let err = Converter::new(
            &comm(ByteOrder::Msb),
            vec![signal("X", 12, int(1, 0, 65535, BitSize::Sixteen))],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::OutOfBounds { end: 17, .. }));
    }

    #[test]
    fn test_rejects_bad_definitions() {
        let c = comm(ByteOrder::Msb);
        let dup = vec![signal("A", 0, flag(0, false)), signal("A", 1, flag(0, false))];
        assert!(matches!(
            Converter::new(&c, dup, true),
            Err(DefinitionError::Duplicate { first: 0, second: 1, .. })
        ));

        let bad_name = vec![signal("A(1)", 0, flag(0, false))];
        assert!(matches!(
            Converter::new(&c, bad_name, true),
            Err(DefinitionError::BadChar { ch: '(', .. })
        ));

        let bad_bit = vec![signal("A", 0, flag(8, false))];
        assert!(matches!(
            Converter::new(&c, bad_bit, true),
            Err(DefinitionError::BitPosition { bit: 8, .. })
        ));

        let mut bad_packet = signal("A", 0, flag(0, false));
        bad_packet.packet = 1;
        assert!(matches!(
            Converter::new(&c, vec![bad_packet], true),
            Err(DefinitionError::PacketIndex { packet: 1, .. })
        ));

        let inverted = vec![signal("A", 0, int(1, 0, -1, BitSize::Eight))];
        assert!(matches!(
            Converter::new(&c, inverted, true),
            Err(DefinitionError::Range { .. })
        ));
    }

    #[test]
    fn test_rejects_nan_range() {
        let c = comm(ByteOrder::Msb);
        for (min, max) in [(f32::NAN, 10.0), (0.0, f32::NAN)] {
            let kind = SignalKind::Float {
                multiplier: 1.0,
                adder: 0.0,
                min,
                max,
                size: BitSize::Eight,
            };
            assert!(matches!(
                Converter::new(&c, vec![signal("A", 0, kind)], true),
                Err(DefinitionError::Range { .. })
            ));
        }
    }

    #[test]
    fn test_alarms() {
        let mut low = signal("TEMP", 0, int(1, 0, 65535, BitSize::Eight));
        low.alarm_high = Some(100.0);
        let mut err = signal("ERR", 1, flag(0, false));
        err.kind = SignalKind::Bool {
            bit: 0,
            invert: false,
            error_code: true,
        };
        let conv = Converter::new(&comm(ByteOrder::Msb), vec![low, err], true).unwrap();

        let mut out = conv.template();
        conv.convert(&packet(&[120, 1]), &mut out);
        let alarms = conv.alarms(&out);
        assert_eq!(alarms.len(), 2);
        assert!(matches!(alarms[0], Alarm::High { threshold, .. } if threshold == 100.0));
        assert!(matches!(alarms[1], Alarm::ErrorCode { .. }));

        conv.convert(&packet(&[50, 0]), &mut out);
        assert!(conv.alarms(&out).is_empty());
    }

    proptest! {
        #[test]
        fn prop_unclamped_int_is_linear(raw in any::<u8>(), m in -100i32..100, a in -1000i32..1000) {
            let conv = Converter::new(
                &comm(ByteOrder::Msb),
                vec![signal("X", 0, int(m, a, 65535, BitSize::Eight))],
                false,
            ).unwrap();
            prop_assert_eq!(conv.convert_one(0, &packet(&[raw])), Value::Int(raw as i32 * m + a));
        }
    }
}
