//! CLI Entry Point for the Canon EDSDK trigger driver
//!
//! Provides a command-line interface for:
//! - Running the driver against the simulated camera (`simulate`)
//! - Validating a driver configuration (`check-config`)
//!
//! # Usage
//!
//! ```bash
//! edsdk-driver simulate --config edsdk.toml --instrument-id rig1 --sensor-id cam --duration 30
//! edsdk-driver simulate --instrument-id rig1 --sensor-id cam \
//!     --settings-json '{"out_directory": "/data/cam", "trigger_period": "4", "serial_number": "123"}'
//! edsdk-driver check-config --config edsdk.toml
//! ```
//!
//! Logging follows `RUST_LOG` when set, otherwise the configured `log_level`.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod sink;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use daq_core::{run_polling_loop, SensorDriver};
use daq_driver_edsdk::config::{EdsdkConfig, MAX_CLOSING_TIME, READ_PERIOD};
use daq_driver_edsdk::mock::{MockBody, MockCamera};
use daq_driver_edsdk::EdsdkDriver;
use sink::CsvImageSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edsdk-driver")]
#[command(about = "Periodic-trigger Canon camera driver", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the driver against a simulated camera
    Simulate(SimulateArgs),

    /// Load and validate a configuration, then print it
    CheckConfig {
        /// Driver configuration file (TOML format)
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct SimulateArgs {
    /// Driver configuration file (TOML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instrument identifier, used as the image file name prefix
    #[arg(long)]
    instrument_id: String,

    /// Sensor identifier
    #[arg(long)]
    sensor_id: String,

    /// Settings dictionary as JSON, applied on top of --config
    #[arg(long)]
    settings_json: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration: Option<f64>,

    /// Simulated camera reports busy on every Nth shot
    #[arg(long, default_value_t = 0)]
    busy_every: u64,

    /// Simulated camera delivers every Nth image late
    #[arg(long, default_value_t = 0)]
    reorder_every: u64,

    /// Simulated camera loses every Nth image
    #[arg(long, default_value_t = 0)]
    drop_every: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => {
            let config = resolve_config(args.config.as_ref(), args.settings_json.as_deref())?;
            init_tracing(&config.log_level, cli.log_json);
            simulate(config, args).await
        }
        Commands::CheckConfig { config } => {
            let config = resolve_config(Some(&config), None)?;
            init_tracing(&config.log_level, cli.log_json);
            println!("{}", serde_json::to_string_pretty(&config)?);
            info!("Configuration is valid");
            Ok(())
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn resolve_config(path: Option<&PathBuf>, settings_json: Option<&str>) -> Result<EdsdkConfig> {
    let settings = settings_json
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("parsing --settings-json")?;

    let config = match (path, settings) {
        (Some(path), None) => EdsdkConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (Some(path), Some(settings)) => EdsdkConfig::load_from(path)
            .and_then(|base| base.merge_settings_json(&settings))
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(settings)) => EdsdkConfig::from_settings_json(&settings)?,
        (None, None) => bail!("either --config or --settings-json is required"),
    };
    config.validate()?;
    Ok(config)
}

async fn simulate(config: EdsdkConfig, args: SimulateArgs) -> Result<()> {
    let camera = MockCamera::builder()
        .body(MockBody::new(config.serial_number.clone()))
        .busy_every(args.busy_every)
        .reorder_every(args.reorder_every)
        .drop_every(args.drop_every)
        .build();

    let duration = args.duration;
    let sink = Arc::new(CsvImageSink::create(&config.out_directory, &args.sensor_id)?);
    let driver = Arc::new(EdsdkDriver::new(
        args.sensor_id,
        args.instrument_id,
        config,
        camera.connector(),
        sink.clone(),
    )?);
    info!(
        sensor = driver.sensor_id(),
        output = %driver.output_directory().display(),
        "Starting simulated acquisition"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_driver = driver.clone();
    let mut polling = tokio::spawn(async move {
        run_polling_loop(loop_driver.as_ref(), READ_PERIOD, shutdown_rx).await
    });

    let deadline = async {
        match duration {
            Some(secs) if secs > 0.0 && secs.is_finite() => {
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            }
            _ => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("installing Ctrl+C handler")?;
            info!("Shutdown signal received, cleaning up...");
        }
        _ = deadline => info!("Simulation time elapsed"),
        joined = &mut polling => {
            // The loop only ends on its own after a failed setup.
            let summary = joined.context("polling task panicked")??;
            warn!(ticks = summary.ticks, "Polling loop stopped unexpectedly");
            sink.flush()?;
            return Ok(());
        }
    }

    // Receiver may already be gone if the loop stopped.
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(MAX_CLOSING_TIME, &mut polling).await {
        Ok(joined) => {
            let summary = joined.context("polling task panicked")??;
            info!(
                ticks = summary.ticks,
                session_resets = summary.session_resets,
                last_health = ?summary.last_health,
                "Polling loop finished"
            );
        }
        Err(_) => {
            warn!("Driver did not close within {:?}", MAX_CLOSING_TIME);
            polling.abort();
        }
    }

    if !driver.is_closed() {
        driver.close()?;
    }
    sink.flush()?;
    info!(
        "Data log written to '{}' ({} shutter releases)",
        sink.path().display(),
        camera.shutter_releases()
    );
    Ok(())
}
