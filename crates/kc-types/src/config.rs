//! Configuration structs for the CLI and the SSH runtime.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Management API endpoint used when neither the config file nor the
/// environment names one.
pub const DEFAULT_API_URL: &str = "https://api.kcast.dev";

/// Identity name used for the generated keypair and its comment.
pub const DEFAULT_IDENTITY: &str = "kcast";

/// Connection settings for the management API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the REST API.
    pub api_url: String,
    /// API key sent as `X-API-Key`.
    pub access_token: Option<String>,
    /// Log HTTP traffic and lower the default log level to `debug`.
    pub debug: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            debug: false,
        }
    }
}

/// Knobs for `node ssh`. Paths left unset resolve under the user's home.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Directory holding the generated keypair (defaults to `~/.ssh`).
    pub key_dir: Option<PathBuf>,
    /// Base name of the keypair files and comment of the public key.
    pub identity_name: String,
    /// Known-hosts file (defaults to `~/.ssh/known_hosts`).
    pub known_hosts: Option<PathBuf>,
    /// Remote SSH port.
    pub port: u16,
    /// Timeout of a single TCP + SSH handshake attempt.
    pub connect_timeout_secs: u64,
    /// Wall-clock budget for all dial attempts together.
    pub dial_budget_secs: u64,
    /// Pause between failed dial attempts.
    pub retry_backoff_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            key_dir: None,
            identity_name: DEFAULT_IDENTITY.to_string(),
            known_hosts: None,
            port: 22,
            connect_timeout_secs: 15,
            dial_budget_secs: 120,
            retry_backoff_secs: 2,
        }
    }
}

/// On-disk layout of `~/.kcast/config.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ssh: SshSettings,
}
