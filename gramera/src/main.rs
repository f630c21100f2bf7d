mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use gramera_core::{bootstrap::{load_config, CONFIG_PATH_ENV}, logging};
use gramera_presence::PresenceHub;

use server::GrameraServer;

/// Real-time presence and direct-message relay
#[derive(Debug, Parser)]
#[command(name = "gramera", version, about)]
struct Args {
    /// Path to a YAML or TOML config file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration (fail fast on misconfigurations)
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Gramera server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Presence state lives for the whole process
    let hub = Arc::new(PresenceHub::new(&config.presence));
    info!(
        outbound_buffer = config.presence.outbound_buffer,
        max_sessions = config.presence.max_sessions,
        idle_timeout_seconds = config.presence.idle_timeout_seconds,
        "Presence hub initialized"
    );

    // 4. Serve until a shutdown signal arrives
    GrameraServer::new(config, hub).start().await
}
