use anyhow::{Context, Result};
use clap::Parser;

/// Runtime configuration (spec.md §6 "Configuration"). Loaded from
/// environment variables the way `mqtt-broker` loads its own config (via the
/// `config` crate), with an optional `clap` CLI overlay for local multi-node
/// runs (spec.md SPEC_FULL §9).
#[derive(Debug, Clone)]
pub struct Config {
    pub server_id: String,
    pub addr: String,
    pub broker: String,
    pub peers: Vec<String>,
    pub shared_secret: String,
    pub election_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
}

#[derive(Parser, Debug)]
#[command(name = "duel-server", about = "Card duel cluster node")]
struct Cli {
    /// Overrides ADDR
    #[arg(long)]
    addr: Option<String>,

    /// Overrides PEERS (comma-separated)
    #[arg(long)]
    peers: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables per spec.md §6,
    /// overlaid with CLI flags. `SERVER_ID`, `BROKER` are always required
    /// from the environment; `ADDR`/`PEERS` may come from `--addr`/`--peers`.
    pub fn load() -> Result<Config> {
        let cli = Cli::parse();

        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to read environment configuration")?;

        let server_id: String = settings
            .get_string("server_id")
            .context("SERVER_ID is required")?;
        let broker: String = settings
            .get_string("broker")
            .context("BROKER is required")?;
        let shared_secret: String = settings
            .get_string("shared_secret")
            .context("SHARED_SECRET is required")?;

        let addr = cli
            .addr
            .or_else(|| settings.get_string("addr").ok())
            .context("ADDR is required (env var or --addr)")?;

        let peers_raw = cli
            .peers
            .or_else(|| settings.get_string("peers").ok())
            .unwrap_or_default();
        let peers = peers_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let election_timeout_ms = settings
            .get_int("election_timeout_ms")
            .unwrap_or(30_000) as u64;
        let heartbeat_interval_ms = settings
            .get_int("heartbeat_interval_ms")
            .unwrap_or(5_000) as u64;

        Ok(Config {
            server_id,
            addr,
            broker,
            peers,
            shared_secret,
            election_timeout_ms,
            heartbeat_interval_ms,
        })
    }
}
