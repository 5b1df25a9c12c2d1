//! Camera relay (v1)
//!
//! Relays a live MJPEG camera feed and JSON sensor/control data between
//! embedded devices and browser clients.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────┐
//!                    │                 CAMERA RELAY                   │
//!                    │                                                │
//!   Browser (ws) ◀───┼── stream relay ◀── mjpeg decoder ◀── upstream ◀┼──── Camera
//!                    │   (per client)                      fetch     │   (HTTP MJPEG)
//!                    │                                                │
//!   Peer A (ws) ────▶┼── data hub ──▶ every other peer ──────────────┼───▶ Peer B, C ...
//!                    │   (shared broadcast set)                       │
//!                    └───────────────────────────────────────────────┘
//! ```

use camera_relay::config::{self, RelayConfig};
use camera_relay::lifecycle::{self, signals};
use camera_relay::observability::logging;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "camera-relay")]
#[command(about = "Relay an MJPEG camera and JSON device data over WebSockets", long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MJPEG source URL.
    #[arg(long)]
    upstream_url: Option<String>,

    /// Bind address for the stream endpoint.
    #[arg(long)]
    stream_bind: Option<String>,

    /// Bind address for the data endpoint.
    #[arg(long)]
    data_bind: Option<String>,
}

impl Args {
    fn load(&self) -> Result<RelayConfig, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)?,
            None => RelayConfig::default(),
        };

        if let Some(url) = &self.upstream_url {
            config.stream.upstream_url = url.clone();
        }
        if let Some(addr) = &self.stream_bind {
            config.stream.bind_address = addr.clone();
        }
        if let Some(addr) = &self.data_bind {
            config.data.bind_address = addr.clone();
        }

        config::validation::validate_config(&config).map_err(config::ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.load()?;

    logging::init_logging(&config.observability)?;

    tracing::info!("camera-relay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        upstream_url = %config.stream.upstream_url,
        stream_bind = %config.stream.bind_address,
        data_bind = %config.data.bind_address,
        connect_timeout_ms = config.stream.connect_timeout_ms,
        "Configuration loaded"
    );

    let running = lifecycle::start(config).await?;
    running.serve_until(signals::shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
