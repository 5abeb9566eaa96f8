//! # Configuration Utilities
//!
//! TOML configuration for the deploy client, plus the generic loader shared with
//! the development control plane.
//!
//! ## Example TOML
//!
//! ```toml
//! [control_plane]
//! base_url = "https://api.example.test"
//! org_id = "acme"
//! request_timeout_secs = 90
//!
//! [wait]
//! default_timeout_secs = 600
//! min_poll_interval_ms = 1000
//! ```

use std::fmt;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Overall wait deadline used when the caller does not supply one.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: ClientConfig = load_config("config/client.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read config file {path}"))?;
    let config: T =
        toml::from_str(&content).with_context(|| format!("failed to parse config file {path}"))?;
    Ok(config)
}

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How to reach the control plane
    pub control_plane: ControlPlaneConfig,
    /// Completion waiting behaviour
    #[serde(default)]
    pub wait: WaitConfig,
}

/// Control plane endpoint and transport settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL, e.g. "https://api.example.test"
    pub base_url: String,
    /// Organisation all job endpoints are scoped to
    pub org_id: String,
    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Per-request timeout. Must exceed the server's long-poll window.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Time allowed to establish a connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Completion waiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Overall deadline when the caller does not pass one (seconds)
    #[serde(default = "default_wait_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Minimum time between the starts of consecutive poll requests (milliseconds)
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_wait_timeout_secs(),
            min_poll_interval_ms: default_min_poll_interval_ms(),
        }
    }
}

impl WaitConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }
}

impl ControlPlaneConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Never longer than the request timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs).min(self.request_timeout())
    }
}

impl fmt::Debug for ControlPlaneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneConfig")
            .field("base_url", &self.base_url)
            .field("org_id", &self.org_id)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ClientConfig {
    /// Loads client configuration from a TOML file.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let config = ClientConfig::from_file("config/client.toml")?;
    /// println!("Org: {}", config.control_plane.org_id);
    /// ```
    pub fn from_file(path: &str) -> Result<Self> {
        load_config(path)
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    90
}

fn default_wait_timeout_secs() -> u64 {
    DEFAULT_WAIT_TIMEOUT.as_secs()
}

fn default_min_poll_interval_ms() -> u64 {
    1000
}
