//! Signal Conversion
//!
//! Signal definitions and the engine that turns raw ALDL packet bytes into
//! scaled, clamped engineering values.

mod alarm;
mod convert;
mod error;
mod signal;

pub use alarm::Alarm;
pub use convert::Converter;
pub use error::DefinitionError;
pub use signal::{BitSize, SignalDefinition, SignalKind, Value, FORBIDDEN_CHARS};
