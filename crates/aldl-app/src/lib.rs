//! ALDL Acquisition Daemon
//!
//! Glue between the settings file, the serial backend, the acquisition
//! loop and the record consumers.

pub mod consumer;
pub mod settings;

use acq_scheduler::Aldl;
use aldl_protocol::{SerialTransport, SimulatedEcm, TtyTransport};
use anyhow::{Context, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub use consumer::{follow, wait_until_buffered, JsonLinesSink, LogSink, RecordSink, SinkError};
pub use settings::{Definition, Settings, SettingsError};

/// Boxed serial backend chosen at runtime
pub type BoxedTransport = Box<dyn SerialTransport>;

/// Initialize logging at `level` ("trace" to "error"), as text or JSON
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("Invalid log level '{}'", level))?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_names(true);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.context("Failed to set tracing subscriber")
}

/// Build the shared acquisition context from settings
pub fn build_context(settings: &Settings) -> Result<Aldl> {
    let definition = settings.definition()?;
    let aldl = Aldl::new(
        definition.comm,
        definition.signals,
        settings.acquisition.clone(),
    )
    .context("Invalid ECM definition or acquisition settings")?;
    Ok(aldl)
}

/// Open the simulated ECM or the configured serial device
pub fn open_transport(settings: &Settings, aldl: &Aldl) -> Result<BoxedTransport> {
    if settings.serial.simulate {
        info!(
            "Using simulated ECM (seed {}, {}% corruption)",
            settings.simulation.seed, settings.simulation.corruption_percent
        );
        let ecm = SimulatedEcm::from_commdef(aldl.comm(), settings.simulation.seed)
            .with_corruption(settings.simulation.corruption_percent);
        return Ok(Box::new(ecm));
    }

    let device = settings
        .serial
        .device
        .as_deref()
        .ok_or(SettingsError::MissingDevice)?;
    let tty = TtyTransport::open(device, settings.serial.baud_rate)?;
    Ok(Box::new(tty))
}
