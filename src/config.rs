//! Configuration for Postedor
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Postedor - reconciliation service for ledger-mirrored pole assets
#[derive(Parser, Debug, Clone)]
#[command(name = "postedor")]
#[command(about = "Reconciles pole asset records between a ledger and a local dataset")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8084")]
    pub listen: SocketAddr,

    /// Ledger JSON-RPC endpoint
    /// When unset, an in-process ledger is used (requires --dev-mode)
    #[arg(long, env = "LEDGER_RPC_URL")]
    pub ledger_rpc_url: Option<String>,

    /// Directory holding the local dataset (postes.json, events-*.json)
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Directory for the durable cache layer
    #[arg(long, env = "CACHE_DIR", default_value = "./cache")]
    pub cache_dir: PathBuf,

    /// Cache TTL in seconds for resolved postes and timelines
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "300")]
    pub cache_ttl_secs: u64,

    /// Serve stale durable hits while re-fetching in the background
    #[arg(long, env = "STALE_WHILE_REVALIDATE", default_value = "true")]
    pub stale_while_revalidate: bool,

    /// Enable development mode (in-process ledger with seeded records)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.ledger_rpc_url.is_none() && !self.dev_mode {
            return Err("LEDGER_RPC_URL is required outside dev mode".to_string());
        }

        if let Some(url) = &self.ledger_rpc_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("LEDGER_RPC_URL must be an http(s) URL".to_string());
            }
        }

        if self.cache_ttl_secs == 0 {
            return Err("CACHE_TTL_SECS must be greater than zero".to_string());
        }

        Ok(())
    }
}
