//! Lanpair Signal Server
//!
//! Discovery and signaling relay for devices on the same network.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (port 3000, or $PORT)
//! lanpair-signal
//!
//! # Explicit config file and a faster heartbeat
//! lanpair-signal --config ./lanpair.toml --heartbeat-secs 10
//!
//! # Persist the effective settings to the platform config file
//! lanpair-signal --port 4000 --write-config
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lanpair_core::Config;
use lanpair_signal::{RoomRegistry, ServerOptions, SignalServer};

#[derive(Parser, Debug)]
#[command(name = "lanpair-signal")]
#[command(about = "Same-network peer discovery and signaling relay")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Config file path (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between heartbeat pings
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Issue identity cookies without the Secure attribute (plain-HTTP deployments)
    #[arg(long)]
    insecure_cookie: bool,

    /// Print a sample config file and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective config (file plus flags) to --config or the default path, then exit
    #[arg(long)]
    write_config: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::load(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(secs) = self.heartbeat_secs {
            config.heartbeat.interval_secs = secs;
        }
        if self.insecure_cookie {
            config.server.secure_cookie = false;
        }
        Ok(config)
    }
}

/// Persist `config` at `path`, or at the platform default when none is given
fn write_config(config: &Config, path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let written = match path {
        Some(path) => config.save_to(path).map(|()| path.to_path_buf()),
        None => config.save(),
    };
    written.context("writing config")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    let config_path = args.config.clone();
    let write = args.write_config;
    let config = args.into_config()?;

    if write {
        let path = write_config(&config, config_path.as_deref())?;
        info!("Wrote config to {}", path.display());
        return Ok(());
    }

    let addr = config.server.listen_addr();

    info!("Starting Lanpair Signal Server");
    info!(
        "Heartbeat every {:?}, eviction after {:?}",
        config.heartbeat.interval(),
        config.heartbeat.window()
    );

    let registry = Arc::new(RoomRegistry::new());
    let server = SignalServer::new(registry, ServerOptions::from_config(&config));

    tokio::select! {
        result = server.serve(addr) => {
            result.with_context(|| format!("serving on {}", addr))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(
                "Shutting down, dropping {} peers in {} rooms",
                server.peer_count(),
                server.room_count()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_and_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lanpair.toml");
        let path_arg = path.to_str().unwrap();

        let args = Args::try_parse_from([
            "lanpair-signal",
            "--config",
            path_arg,
            "--port",
            "4100",
            "--heartbeat-secs",
            "5",
            "--write-config",
        ])
        .unwrap();
        assert!(args.write_config);

        let config = args.into_config().unwrap();
        assert_eq!(write_config(&config, Some(&path)).unwrap(), path);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.server.port, 4100);
        assert_eq!(reloaded.heartbeat.interval_secs, 5);
    }
}
