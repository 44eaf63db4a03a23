//! Configuration loading
//!
//! TOML configuration with serde defaults. Every field has a working
//! default so the binary runs without a config file. Configuration is
//! immutable after load.

pub mod file;

pub use file::{load_from_path, load_or_default};

use serde::Deserialize;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub tor: TorConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Tor daemon connection
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TorConfig {
    #[serde(default = "default_control_host")]
    pub control_host: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Password for HashedControlPassword auth. When absent, cookie
    /// auth is tried against `cookie_path` and the well-known paths.
    pub control_password: Option<String>,
    /// Explicit control auth cookie location
    pub cookie_path: Option<String>,
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,
    /// Tor binary for the process-backed worker
    #[serde(default = "default_tor_binary")]
    pub binary: String,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            control_host: default_control_host(),
            control_port: default_control_port(),
            control_password: None,
            cookie_path: None,
            socks_port: default_socks_port(),
            binary: default_tor_binary(),
        }
    }
}

fn default_control_host() -> String {
    "127.0.0.1".to_string()
}
fn default_control_port() -> u16 {
    9151
}
fn default_socks_port() -> u16 {
    9150
}
fn default_tor_binary() -> String {
    "tor".to_string()
}

/// Pluggable transport client (domain-fronted bridge)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// When false, Tor connects directly and no bridge is configured
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Transport name used in ClientTransportPlugin/Bridge lines
    #[serde(default = "default_transport_name")]
    pub name: String,
    /// Client binary to launch
    #[serde(default = "default_transport_command")]
    pub command: String,
    /// Extra arguments for the client binary
    #[serde(default)]
    pub args: Vec<String>,
    /// Local SOCKS port the client listens on, wired into SETCONF
    #[serde(default = "default_transport_port")]
    pub local_port: u16,
    /// Bridge address:port field (a placeholder for meek)
    #[serde(default = "default_bridge_addr")]
    pub bridge_addr: String,
    /// Bridge fingerprint
    #[serde(default = "default_bridge_fingerprint")]
    pub bridge_fingerprint: String,
    /// Real endpoint behind the front
    #[serde(default = "default_bridge_url")]
    pub url: String,
    /// Permitted front domain the traffic is disguised as
    #[serde(default = "default_front_domain")]
    pub front: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_transport_name(),
            command: default_transport_command(),
            args: Vec::new(),
            local_port: default_transport_port(),
            bridge_addr: default_bridge_addr(),
            bridge_fingerprint: default_bridge_fingerprint(),
            url: default_bridge_url(),
            front: default_front_domain(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_transport_name() -> String {
    "meek_lite".to_string()
}
fn default_transport_command() -> String {
    "meek-client".to_string()
}
fn default_transport_port() -> u16 {
    4058
}
fn default_bridge_addr() -> String {
    // Placeholder address; meek routes through the fronted URL
    "0.0.2.0:3".to_string()
}
fn default_bridge_fingerprint() -> String {
    "97700DFE9F483596DDA6264C4D7DF7641E1E39CE".to_string()
}
fn default_bridge_url() -> String {
    "https://moat.torproject.org.global.prod.fastly.net/".to_string()
}
fn default_front_domain() -> String {
    "cdn.sstatic.net".to_string()
}

/// Embedded web server
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebConfig {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Fixed local port the onion service maps to. Port 0 binds an
    /// ephemeral port (used by tests).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
        }
    }
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}
fn default_listen_port() -> u16 {
    17621
}

/// Startup and shutdown bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Bound on waiting for the tor worker readiness signal
    #[serde(default = "default_worker_startup_secs")]
    pub worker_startup_secs: u64,
    /// Bound on waiting for the tor worker stopped confirmation
    #[serde(default = "default_worker_stop_secs")]
    pub worker_stop_secs: u64,
    /// Web server grace period for a plain stop, in milliseconds
    #[serde(default = "default_short_grace_ms")]
    pub web_stop_grace_ms: u64,
    /// Web server grace period when a download is finishing, in
    /// seconds. Generous but finite upper bound on transfer duration.
    #[serde(default = "default_long_grace_secs")]
    pub web_download_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            worker_startup_secs: default_worker_startup_secs(),
            worker_stop_secs: default_worker_stop_secs(),
            web_stop_grace_ms: default_short_grace_ms(),
            web_download_grace_secs: default_long_grace_secs(),
        }
    }
}

fn default_worker_startup_secs() -> u64 {
    120
}
fn default_worker_stop_secs() -> u64 {
    30
}
fn default_short_grace_ms() -> u64 {
    500
}
fn default_long_grace_secs() -> u64 {
    120
}

impl TimeoutConfig {
    pub fn worker_startup(&self) -> Duration {
        Duration::from_secs(self.worker_startup_secs)
    }

    pub fn worker_stop(&self) -> Duration {
        Duration::from_secs(self.worker_stop_secs)
    }

    pub fn web_stop_grace(&self) -> Duration {
        Duration::from_millis(self.web_stop_grace_ms)
    }

    pub fn web_download_grace(&self) -> Duration {
        Duration::from_secs(self.web_download_grace_secs)
    }
}
