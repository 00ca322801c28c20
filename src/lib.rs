pub mod bridge;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod io;
pub mod logging;
pub mod rvc;
pub mod settings;

use clap::Parser;
use std::path::PathBuf;

use settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "rvc2mqtt")]
#[command(about = "RV-C CAN bus to MQTT bridge")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "rvc2mqtt.toml")]
    config: PathBuf,

    /// Log level or filter directive (overrides RUST_LOG and [logging].level)
    #[arg(short, long)]
    log_level: Option<String>,

    /// DGN catalog to use instead of the built-in one
    #[arg(long)]
    catalog: Option<PathBuf>,
}

/// Parse arguments, load configuration and run the bridge until Ctrl-C.
pub fn run() -> Result<(), String> {
    let args = Args::parse();

    let mut settings = Settings::load(&args.config).map_err(|e| e.to_string())?;
    if let Some(catalog) = args.catalog {
        settings.catalog = Some(catalog);
    }

    logging::init(
        args.log_level.as_deref(),
        &settings.logging.level,
        settings.logging.log_dir.as_deref(),
    )?;
    tracing::info!(config = %args.config.display(), "rvc2mqtt v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;

    runtime.block_on(bridge::run(settings))
}
