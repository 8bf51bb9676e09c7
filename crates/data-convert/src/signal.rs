//! Signal Definitions and Values

use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters that may not appear in names or unit strings
pub const FORBIDDEN_CHARS: &[char] = &['(', ')', ',', '"', '\''];

/// One decoded signal value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl Value {
    /// Numeric view of the value, booleans map to 0/1
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v as f64,
            Value::Bool(v) => u8::from(v) as f64,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", u8::from(*v)),
        }
    }
}

/// Width of the raw input field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BitSize {
    #[default]
    Eight,
    /// Two bytes, most significant first
    Sixteen,
}

impl BitSize {
    pub fn bytes(&self) -> usize {
        match self {
            BitSize::Eight => 1,
            BitSize::Sixteen => 2,
        }
    }
}

impl TryFrom<u8> for BitSize {
    type Error = DefinitionError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(BitSize::Eight),
            16 => Ok(BitSize::Sixteen),
            other => Err(DefinitionError::BitSize(other)),
        }
    }
}

impl From<BitSize> for u8 {
    fn from(size: BitSize) -> Self {
        match size {
            BitSize::Eight => 8,
            BitSize::Sixteen => 16,
        }
    }
}

/// Output type and transform of a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalKind {
    Int {
        #[serde(default = "one_i32")]
        multiplier: i32,
        #[serde(default)]
        adder: i32,
        #[serde(default)]
        min: i32,
        #[serde(default = "int_max")]
        max: i32,
        #[serde(default)]
        size: BitSize,
    },
    Float {
        #[serde(default = "one_f32")]
        multiplier: f32,
        #[serde(default)]
        adder: f32,
        #[serde(default)]
        min: f32,
        #[serde(default = "float_max")]
        max: f32,
        #[serde(default)]
        size: BitSize,
    },
    /// Single flag bit
    #[serde(rename = "binary", alias = "bool")]
    Bool {
        /// Bit position, 0 = least significant under MSB byte order
        bit: u8,
        #[serde(default)]
        invert: bool,
        /// A set flag indicates an ECM error code
        #[serde(default)]
        error_code: bool,
    },
}

fn one_i32() -> i32 {
    1
}

fn one_f32() -> f32 {
    1.0
}

fn int_max() -> i32 {
    65535
}

fn float_max() -> f32 {
    9_999_999.0
}

impl SignalKind {
    /// Bytes consumed from the packet
    pub fn width(&self) -> usize {
        match self {
            SignalKind::Int { size, .. } | SignalKind::Float { size, .. } => size.bytes(),
            SignalKind::Bool { .. } => 1,
        }
    }

    /// Zero value of the matching output type
    pub fn zero(&self) -> Value {
        match self {
            SignalKind::Int { .. } => Value::Int(0),
            SignalKind::Float { .. } => Value::Float(0.0),
            SignalKind::Bool { .. } => Value::Bool(false),
        }
    }
}

/// Definition of one decoded signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Unique identifier
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Unit of measure
    #[serde(default)]
    pub uom: Option<String>,
    /// Display precision for floats
    #[serde(default)]
    pub precision: u8,
    /// Index of the source packet in the comm definition
    #[serde(default)]
    pub packet: usize,
    /// Byte offset after the packet header
    pub offset: usize,
    #[serde(default)]
    pub log: bool,
    #[serde(default)]
    pub display: bool,
    #[serde(default)]
    pub alarm_low: Option<f64>,
    #[serde(default)]
    pub alarm_high: Option<f64>,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl SignalDefinition {
    /// Render a value of this signal for display
    pub fn format(&self, value: &Value) -> String {
        let text = match value {
            Value::Float(v) => format!("{:.*}", self.precision as usize, v),
            other => other.to_string(),
        };
        match &self.uom {
            Some(uom) => format!("{} {}", text, uom),
            None => text,
        }
    }
}
