//! Server configuration from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const ADDR_VAR: &str = "ASYNCPLACE_ADDR";
pub const SNAPSHOT_VAR: &str = "ASYNCPLACE_SNAPSHOT";
pub const INTERVAL_VAR: &str = "ASYNCPLACE_SNAPSHOT_INTERVAL_SECS";

const DEFAULT_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3030);
const DEFAULT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Canvas snapshot file; persistence is off when unset.
    pub snapshot: Option<PathBuf>,
    pub snapshot_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(DEFAULT_ADDR),
            snapshot: None,
            snapshot_interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a variable lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup(ADDR_VAR) {
            match addr.parse() {
                Ok(addr) => config.addr = addr,
                Err(e) => warn!("Ignoring {}={:?}: {}", ADDR_VAR, addr, e),
            }
        }

        config.snapshot = lookup(SNAPSHOT_VAR)
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        if let Some(secs) = lookup(INTERVAL_VAR) {
            match secs.parse::<u64>() {
                Ok(secs) if secs > 0 => config.snapshot_interval = Duration::from_secs(secs),
                _ => warn!("Ignoring {}={:?}: expected a positive number", INTERVAL_VAR, secs),
            }
        }

        config
    }
}
