//! gmc-monitor - GMC radiation detector to MQTT daemon.
//!
//! Run with: `cargo run -p gmc-service -- --config gmc_config.json`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gmc_core::SerialConnector;
use gmc_service::{Config, Monitor, PublishGateway, default_config_path, logging};
use gmc_store::DataLogger;

/// How long the MQTT gateway gets to publish `offline` and disconnect.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// gmc-monitor - publish GMC-300E+ readings to MQTT and Home Assistant.
#[derive(Parser, Debug)]
#[command(name = "gmc-monitor")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor in the foreground (default behavior).
    Run,

    /// Export the data log, archives included, into one CSV file.
    Export {
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,

        /// Only rows at or after this time (RFC 3339).
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<OffsetDateTime>,

        /// Only rows at or before this time (RFC 3339).
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<OffsetDateTime>,
    },

    /// Validate the configuration file and print warnings.
    CheckConfig,

    /// Write an example configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| format!("expected RFC 3339 time: {e}"))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(default_config_path);

    // Must be read while the process is still single-threaded.
    let local_offset = UtcOffset::current_local_offset();

    match args.command {
        Some(Command::Export { output, from, to }) => export(&config_path, &output, from, to),
        Some(Command::CheckConfig) => check_config(&config_path),
        Some(Command::InitConfig { force }) => init_config(&config_path, force),
        Some(Command::Run) | None => {
            let config = Config::load_validated(&config_path)?;
            logging::init(&config.logging)?;

            let local_offset = local_offset.unwrap_or_else(|e| {
                warn!("Could not determine local UTC offset ({}); using UTC", e);
                UtcOffset::UTC
            });

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(run(config, local_offset))
        }
    }
}

async fn run(config: Config, local_offset: UtcOffset) -> anyhow::Result<()> {
    info!("gmc-monitor {} starting", env!("CARGO_PKG_VERSION"));
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            cancel.cancel();
        }
    });

    let (handle, channels) = PublishGateway::channel();
    let gateway = PublishGateway::start(&config, channels, cancel.clone())?;

    let connector = SerialConnector::new(
        config.device.port.clone(),
        config.device.baud_rate,
        config.device.timeout(),
    );
    let monitor = Monitor::new(connector, &config, handle, local_offset);
    monitor.run(cancel.clone()).await;

    gateway.join(DRAIN_TIMEOUT).await;
    info!("gmc-monitor stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn export(
    config_path: &Path,
    output: &Path,
    from: Option<OffsetDateTime>,
    to: Option<OffsetDateTime>,
) -> anyhow::Result<()> {
    let config = Config::load_validated(config_path)?;
    let logger = DataLogger::new(config.log_config());

    let summary = logger
        .export(output, from, to)
        .with_context(|| format!("Failed to export {}", logger.path().display()))?;

    println!(
        "Exported {} rows from {} files to {}",
        summary.rows,
        summary.files,
        output.display()
    );
    if summary.skipped > 0 {
        eprintln!("Skipped {} unreadable rows", summary.skipped);
    }
    Ok(())
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load_validated(config_path)?;
    for warning in config.warnings() {
        eprintln!("warning: {}", warning);
    }
    println!("{} is valid", config_path.display());
    Ok(())
}

fn init_config(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists; use --force to overwrite",
            config_path.display()
        );
    }
    Config::example().save(config_path)?;
    println!("Wrote example configuration to {}", config_path.display());
    Ok(())
}
