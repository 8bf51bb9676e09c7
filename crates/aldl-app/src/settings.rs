//! Layered Settings
//!
//! The root settings file (TOML, YAML or JSON, picked by extension) is
//! layered with `ALDL__`-prefixed environment variables, e.g.
//! `ALDL__SERIAL__DEVICE=/dev/ttyUSB1`. The ECM definition (`comm` and
//! `signals`) may live inline or in a separate file named by `definition`,
//! resolved relative to the root file.

use acq_scheduler::AcqConfig;
use aldl_protocol::{CommDef, Timing};
use config::{Config, Environment, File};
use data_convert::SignalDefinition;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Settings loading errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// Neither the root file nor a definition file provides `comm`
    #[error("No comm definition found (set `comm` or `definition`)")]
    MissingComm,

    /// Not simulating and no serial device configured
    #[error("No serial device configured (set serial.device or use --simulate)")]
    MissingDevice,
}

/// Serial device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path, e.g. /dev/ttyUSB0
    pub device: Option<String>,
    pub baud_rate: u32,
    /// Use the simulated ECM instead of a device
    pub simulate: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: aldl_protocol::tty::ALDL_BAUD_RATE,
            simulate: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Simulated ECM settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    pub seed: u64,
    /// Rough percentage of corrupted replies
    pub corruption_percent: u8,
}

/// Record consumers to start with the acquisition loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Log every Nth record's `log` signals, 0 disables
    pub log_every: u64,
    /// Append records as JSON lines to this file
    pub dump_path: Option<PathBuf>,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            log_every: 50,
            dump_path: None,
        }
    }
}

/// ECM definition, inline or from its own file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub comm: CommDef,
    #[serde(default)]
    pub signals: Vec<SignalDefinition>,
}

/// Root settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub serial: SerialSettings,
    pub logging: LogSettings,
    pub acquisition: AcqConfig,
    pub timing: Timing,
    pub simulation: SimSettings,
    pub consumers: ConsumerSettings,
    /// Separate file holding `comm` and `signals`
    pub definition: Option<PathBuf>,
    pub comm: Option<CommDef>,
    pub signals: Vec<SignalDefinition>,
    /// Directory of the root file, for resolving relative paths
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Settings {
    /// Load the root file layered with the environment
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let mut settings: Settings = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("ALDL").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|source| SettingsError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        settings.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Resolve the ECM definition, loading the definition file if named
    pub fn definition(&self) -> Result<Definition, SettingsError> {
        if let Some(file) = &self.definition {
            let path = self.base_dir.join(file);
            let definition = Config::builder()
                .add_source(File::from(path.as_path()))
                .build()
                .and_then(|c| c.try_deserialize::<Definition>())
                .map_err(|source| SettingsError::Load {
                    path: path.clone(),
                    source,
                })?;
            debug!(
                "Loaded {} signals from {}",
                definition.signals.len(),
                path.display()
            );
            return Ok(definition);
        }

        let comm = self.comm.clone().ok_or(SettingsError::MissingComm)?;
        Ok(Definition {
            comm,
            signals: self.signals.clone(),
        })
    }

    /// Path of the JSON-lines dump, relative to the root file
    pub fn dump_path(&self) -> Option<PathBuf> {
        self.consumers
            .dump_path
            .as_ref()
            .map(|p| self.base_dir.join(p))
    }
}
