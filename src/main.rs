//! ironveil - dedicated world server
//!
//! Headless tick-loop binary hosting the synchronization substrate.

mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use ironveil_server::GameServer;
use std::{env, path::PathBuf};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with INFO level by default (can be overridden via RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting ironveil v{}", env!("CARGO_PKG_VERSION"));

    let cli = CliOptions::parse(env::args().skip(1));
    let mut cfg = match &cli.config_path {
        Some(path) => ServerConfig::load_from_path(path),
        None => ServerConfig::load(),
    };
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(shard) = cli.shard {
        cfg.shard_id = shard;
    }
    if let Some(max_ticks) = cli.max_ticks {
        cfg.max_ticks = max_ticks;
    }

    let addr = cfg.bind_addr()?;
    let server = GameServer::bind(addr, cfg.shard_id)
        .await
        .context("Failed to start game server")?;

    let max_ticks = (cfg.max_ticks > 0).then_some(cfg.max_ticks);
    ironveil_server::runtime::run(server, max_ticks).await
}

#[derive(Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    port: Option<u16>,
    shard: Option<u16>,
    max_ticks: Option<u64>,
}

impl CliOptions {
    fn parse<I>(mut args: I) -> Self
    where
        I: Iterator<Item = String>,
    {
        let mut options = CliOptions::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => options.config_path = args.next().map(PathBuf::from),
                "--port" => options.port = args.next().and_then(|v| v.parse().ok()),
                "--shard" => options.shard = args.next().and_then(|v| v.parse().ok()),
                "--max-ticks" => options.max_ticks = args.next().and_then(|v| v.parse().ok()),
                other => {
                    tracing::warn!("Ignoring unknown argument {other}");
                }
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_in_order() {
        let args = [
            "--port", "8123", "--shard", "7", "--max-ticks", "25", "--config", "custom.toml",
        ];
        let options = CliOptions::parse(args.iter().map(|s| s.to_string()));
        assert_eq!(options.port, Some(8123));
        assert_eq!(options.shard, Some(7));
        assert_eq!(options.max_ticks, Some(25));
        assert_eq!(options.config_path, Some(PathBuf::from("custom.toml")));
    }

    #[test]
    fn malformed_numeric_flags_are_ignored() {
        let args = ["--port", "not-a-port"];
        let options = CliOptions::parse(args.iter().map(|s| s.to_string()));
        assert_eq!(options.port, None);
    }
}
