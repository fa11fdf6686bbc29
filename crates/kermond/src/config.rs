//! Configuration file support for kermond
//!
//! Loads and validates configuration from TOML.
//! Default location: /etc/kermond/kermond.toml
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-6: Configuration Settings - Validated daemon settings

use crate::error::{KermondError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/kermond/kermond.toml";

/// Configuration store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database holding the `/routing` tree
    #[serde(default = "default_db")]
    pub db: i64,
}

/// Kernel channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetlinkConfig {
    /// Bounded wait of the poll thread in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// SO_RCVBUF for the monitor socket
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

/// Route reconciliation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RibConfig {
    /// Replace routes in one request when their kernel identity is unchanged,
    /// instead of delete followed by add
    #[serde(default = "default_atomic_replace")]
    pub atomic_replace: bool,

    /// Resolve interface names through the OS when the link cache lacks them
    #[serde(default = "default_ifname_fallback")]
    pub ifname_os_fallback: bool,
}

/// Complete kermond configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KermondConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub netlink: NetlinkConfig,

    #[serde(default)]
    pub rib: RibConfig,
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_db() -> i64 {
    0
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_recv_buffer_size() -> usize {
    4 * 1024 * 1024
}

fn default_atomic_replace() -> bool {
    true
}

fn default_ifname_fallback() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            db: default_db(),
        }
    }
}

impl Default for NetlinkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

impl Default for RibConfig {
    fn default() -> Self {
        Self {
            atomic_replace: default_atomic_replace(),
            ifname_os_fallback: default_ifname_fallback(),
        }
    }
}

impl KermondConfig {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    KermondError::Config(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(KermondError::Io(e)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.netlink.poll_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.redis_host.is_empty() {
            return Err(KermondError::Config("redis_host must not be empty".to_string()));
        }
        if self.store.redis_port == 0 {
            return Err(KermondError::Config("redis_port must be > 0".to_string()));
        }
        if self.store.db < 0 {
            return Err(KermondError::Config("db must be >= 0".to_string()));
        }
        if self.netlink.poll_interval_ms == 0 || self.netlink.poll_interval_ms > 60_000 {
            return Err(KermondError::Config(
                "poll_interval_ms must be 1-60000".to_string(),
            ));
        }
        if self.netlink.recv_buffer_size < 64 * 1024 {
            return Err(KermondError::Config(
                "recv_buffer_size must be at least 65536".to_string(),
            ));
        }
        Ok(())
    }
}
