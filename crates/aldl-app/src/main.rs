//! ALDL Acquisition Daemon - Main Entry Point

use acq_scheduler::{Acquisition, Aldl};
use aldl_app::{
    build_context, follow, init_logging, open_transport, wait_until_buffered, JsonLinesSink,
    LogSink, RecordSink, Settings,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "aldl-io", version, about = "ALDL ECM data acquisition")]
struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long, default_value = "/etc/aldl/aldl.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Talk to the simulated ECM instead of a serial device
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire until interrupted (default)
    Run,
    /// Load and validate the settings, then exit
    Configtest,
    /// List serial devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Devices) = cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("info"), false)?;
        for device in aldl_protocol::tty::list_devices()? {
            println!("{}", device);
        }
        return Ok(());
    }

    let mut settings = Settings::load(&cli.config)?;
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    settings.serial.simulate |= cli.simulate;
    init_logging(&settings.logging.level, settings.logging.json)?;

    info!("=== ALDL Acquisition v{} ===", env!("CARGO_PKG_VERSION"));

    let aldl = match build_context(&settings) {
        Ok(aldl) => Arc::new(aldl),
        Err(e) => {
            error!("Configuration rejected: {:#}", e);
            return Err(e);
        }
    };

    match cli.command {
        Some(Command::Configtest) => {
            println!(
                "{}: OK ({} packets, {} signals, buffer {})",
                cli.config.display(),
                aldl.comm().packets.len(),
                aldl.signals().len(),
                aldl.store().capacity()
            );
            Ok(())
        }
        _ => run(settings, aldl).await,
    }
}

async fn run(settings: Settings, aldl: Arc<Aldl>) -> Result<()> {
    let transport = open_transport(&settings, &aldl)?;
    let acquisition = Acquisition::new(Arc::clone(&aldl), transport, settings.timing.clone());
    let acq_thread = thread::Builder::new()
        .name("aldl-acq".to_string())
        .spawn(move || acquisition.run())
        .context("Failed to spawn acquisition thread")?;

    let mut consumers = Vec::new();
    if settings.consumers.log_every > 0 {
        consumers.push(spawn_consumer(&aldl, LogSink::new(settings.consumers.log_every)));
    }
    if let Some(path) = settings.dump_path() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        info!("Dumping records to {}", path.display());
        consumers.push(spawn_consumer(&aldl, JsonLinesSink::new(BufWriter::new(file))));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down...");
    aldl.quit();

    for consumer in consumers {
        match consumer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Consumer failed: {:#}", e),
            Err(e) => warn!("Consumer task panicked: {}", e),
        }
    }
    tokio::task::spawn_blocking(move || acq_thread.join())
        .await?
        .map_err(|_| anyhow!("Acquisition thread panicked"))?;

    let stats = aldl.stats();
    info!(
        "Final: {} timeouts, {} header, {} checksum failures, {:.1} pkt/s",
        stats.timeouts, stats.header_failures, stats.checksum_failures, stats.packets_per_second
    );
    Ok(())
}

fn spawn_consumer<S>(aldl: &Arc<Aldl>, mut sink: S) -> JoinHandle<Result<()>>
where
    S: RecordSink + Send + 'static,
{
    let aldl = Arc::clone(aldl);
    tokio::task::spawn_blocking(move || {
        if !wait_until_buffered(&aldl) {
            return Ok(());
        }
        let start = aldl.newest();
        follow(&aldl, start, &mut sink)?;
        Ok(())
    })
}
