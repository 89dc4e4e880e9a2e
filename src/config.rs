//! Server configuration parameters
//!
//! All tunable parameters for a mux server. Defaults are usable as-is;
//! any subset can be overridden from a JSON file.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Core server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // --- Identity ---
    /// Service name, used as the log prefix for the listener
    pub service: String,

    // --- Socket ---
    /// Address the listener binds to
    pub bind_addr: SocketAddr,
    /// Accept backlog requested at `listen()`
    pub backlog: u32,
    /// Per-read buffer size for connection sockets (bytes)
    pub read_buffer_size: usize,

    // --- Protocol ---
    /// Largest accepted `size` field, i.e. type + tag + body (bytes)
    pub max_frame_size: usize,

    // --- Accept loop ---
    /// Pause after a failed `accept()` before trying again (ms, 0 = none)
    pub accept_backoff_ms: u64,

    // --- Logging ---
    /// Maximum log level: off, error, warn, info, debug, trace
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service: "tagmux".to_owned(),

            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            backlog: 1000,
            read_buffer_size: 4096,

            max_frame_size: 16 * 1024 * 1024, // 16 MiB

            accept_backoff_ms: 10,

            log_level: "info".to_owned(),
        }
    }
}

impl ServerConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backlog == 0 {
            return Err(Error::Config("backlog must be positive".to_owned()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be positive".to_owned()));
        }
        // size field counts the 4-byte type+tag header
        if self.max_frame_size < 4 {
            return Err(Error::Config("max_frame_size must be at least 4".to_owned()));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(Error::Config(format!("unknown log level '{}'", self.log_level)));
        }
        Ok(())
    }

    /// Log level as a `log` filter (falls back to `Info`).
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
