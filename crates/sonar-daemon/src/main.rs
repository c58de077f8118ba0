//! Sonar Daemon - Main entry point
//!
//! Runs a simulated sonar behind a forwarding proxy and serves the
//! REST and WebSocket API.

mod api;
mod config;
mod server;
mod sim;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "sonard")]
#[command(about = "Sonar control and telemetry daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sonard.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    write_config: bool,

    /// Print the re-exported schema as JSON and exit
    #[arg(long)]
    dump_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Sonar daemon v{}", env!("CARGO_PKG_VERSION"));

    if args.write_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Default configuration written");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        model = %config.device.description.model,
        mode = ?config.proxy.mode,
        range_scale = config.proxy.range_scale,
        track_scale = config.proxy.track_scale,
        "Configuration loaded"
    );

    // Create application state
    let state = state::AppState::new(config.clone()).await?;

    if args.dump_schema {
        println!("{}", serde_json::to_string_pretty(&*state.proxy.schema())?);
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
