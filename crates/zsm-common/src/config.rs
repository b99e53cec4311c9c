//! JSON configuration for the client and the gatekeeper.
//!
//! Every field has a default, so an empty object `{}` is a valid file.
//! Command-line flags override whatever the file sets.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zsm_core::DEFAULT_PORT;

use crate::error::{Error, Result};

const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CLIENTS: usize = 1024;

fn default_server_addr() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_listen() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

fn default_max_clients() -> usize {
    DEFAULT_MAX_CLIENTS
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gatekeeper address, `host:port`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Upper bound on the whole handshake (challenge and status wait).
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_addr.trim().is_empty() {
            return Err(Error::config("server_addr must not be empty"));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(Error::config("handshake_timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// Gatekeeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of simultaneously authenticated clients.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Time a connection gets to answer the challenge.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_clients: default_max_clients(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen.trim().is_empty() {
            return Err(Error::config("listen must not be empty"));
        }
        if self.max_clients == 0 {
            return Err(Error::config("max_clients must be positive"));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(Error::config("handshake_timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// Read a JSON configuration file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
