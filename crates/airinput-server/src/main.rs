//! AirInput relay: entry point.
//!
//! Phones on the same network push what they type to this process; every
//! desktop page connected to it sees the text live and as cards.
//!
//! # Usage
//!
//! ```text
//! airinput [OPTIONS]
//!
//! Options:
//!   --port <PORT>          First port to try [default: 5000]
//!   --bind <ADDR>          Bind address [default: 0.0.0.0]
//!   --mode <MODE>          Initial segmentation mode: single | continuous
//!   --config <PATH>        TOML config file
//!   --debug                Verbose logging
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.  Either one overrides the
//! config file, which overrides the built-in defaults.
//!
//! | Variable          | Description                         |
//! |-------------------|-------------------------------------|
//! | `AIRINPUT_PORT`   | First port to try                   |
//! | `AIRINPUT_BIND`   | Bind address                        |
//! | `AIRINPUT_MODE`   | Initial segmentation mode           |
//! | `AIRINPUT_CONFIG` | Path to the TOML config file        |
//! | `RUST_LOG`        | `tracing` filter; wins over `--debug` |

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use airinput_core::SegmentationMode;
use airinput_server::application::LoggingListener;
use airinput_server::domain::ServerConfig;
use airinput_server::infrastructure::{load_config, FileConfig, RelayServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// AirInput LAN text relay.
#[derive(Debug, Parser)]
#[command(
    name = "airinput",
    about = "Relay text typed on a phone to desktop pages on the same network",
    version
)]
struct Cli {
    /// First port to try.  The next free port is used if it is taken.
    #[arg(long, env = "AIRINPUT_PORT")]
    port: Option<u16>,

    /// IP address to bind to.  `127.0.0.1` hides the relay from the LAN.
    #[arg(long, env = "AIRINPUT_BIND")]
    bind: Option<String>,

    /// Initial segmentation mode (`single` or `continuous`).
    #[arg(long, env = "AIRINPUT_MODE")]
    mode: Option<String>,

    /// TOML config file.  A missing file means built-in defaults.
    #[arg(long, env = "AIRINPUT_CONFIG")]
    config: Option<PathBuf>,

    /// Log every message flowing through the relay.
    #[arg(long)]
    debug: bool,
}

/// Everything `main` needs after resolving CLI, environment, and file.
#[derive(Debug)]
struct Resolved {
    config: ServerConfig,
    log_level: String,
}

impl Cli {
    /// Layers CLI/env values over the config file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or holds invalid
    /// values, or if `--bind` or `--mode` cannot be parsed.
    fn resolve(self) -> anyhow::Result<Resolved> {
        let file = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => FileConfig::default(),
        };

        let log_level = if self.debug {
            "debug".to_string()
        } else {
            file.server.log_level.clone()
        };

        let mut config = file
            .into_server_config()
            .context("invalid configuration")?;

        if let Some(port) = self.port {
            config.port_start = port;
        }
        if let Some(bind) = &self.bind {
            config.bind_addr = bind
                .parse::<IpAddr>()
                .with_context(|| format!("invalid bind address: '{bind}'"))?;
        }
        if let Some(mode) = &self.mode {
            config.initial_mode = mode.parse::<SegmentationMode>()?;
        }

        Ok(Resolved { config, log_level })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments, environment, and the optional config file are resolved
///    into a [`ServerConfig`].
/// 2. `tracing_subscriber` is initialised; `RUST_LOG` wins over the
///    configured level.
/// 3. The relay binds the first free port and starts the hub.
/// 4. It serves until Ctrl+C, then closes every stream and drains HTTP.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Resolved { config, log_level } = Cli::parse().resolve()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    info!(
        "AirInput starting, bind={}, port={}, mode={}",
        config.bind_addr, config.port_start, config.initial_mode
    );

    let server = RelayServer::bind(config, Arc::new(LoggingListener))
        .await
        .context("failed to start relay")?;
    let port = server.local_addr().port();
    info!("desktop page: http://127.0.0.1:{port}/ , phones: http://<this-machine-ip>:{port}/");

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, initiating graceful shutdown"),
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    };

    server.run(shutdown).await?;

    info!("AirInput stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
