//! CLI configuration: `~/.kcast/config.toml` overlaid with environment variables.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use kc_types::{ConfigFile, SshSettings};
use secrecy::SecretString;
use ssh_core::{keys::default_key_dir, known_hosts::KnownHostsFile};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

pub const CONFIG_PATH_ENV: &str = "KCAST_CONFIG";
pub const API_URL_ENV: &str = "KCAST_API_URL";
pub const API_TOKEN_ENV: &str = "KCAST_API_TOKEN";
pub const DEBUG_ENV: &str = "KCAST_DEBUG";

/// Effective settings for one invocation.
#[derive(Debug)]
pub struct Settings {
    pub api_url: String,
    pub access_token: Option<SecretString>,
    pub debug: bool,
    pub ssh: SshSettings,
}

impl Settings {
    /// Load from `KCAST_CONFIG` (or the default path) and apply environment overrides.
    pub fn load() -> ClientResult<Self> {
        let path = env::var_os(CONFIG_PATH_ENV).map(PathBuf::from).or_else(default_config_path);
        let file = match path {
            Some(path) => read_config_file(&path)?,
            None => ConfigFile::default(),
        };
        Ok(Self::from_file(file).with_env_overrides())
    }

    pub fn from_file(file: ConfigFile) -> Self {
        Self {
            api_url: file.api.api_url,
            access_token: file.api.access_token.filter(|t| !t.is_empty()).map(SecretString::from),
            debug: file.api.debug,
            ssh: file.ssh,
        }
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(url) = non_empty_env(API_URL_ENV) {
            self.api_url = url;
        }
        if let Some(token) = non_empty_env(API_TOKEN_ENV) {
            self.access_token = Some(SecretString::from(token));
        }
        if let Some(flag) = non_empty_env(DEBUG_ENV) {
            self.debug = parse_flag(&flag);
        }
        self
    }

    /// API key, or a configuration error telling the operator where to put one.
    pub fn require_token(&self) -> ClientResult<SecretString> {
        self.access_token.clone().ok_or_else(|| {
            ClientError::Config(format!(
                "no API access token; set {API_TOKEN_ENV} or access_token in {}",
                default_config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "the config file".into())
            ))
        })
    }

    pub fn key_dir(&self) -> ClientResult<PathBuf> {
        self.ssh
            .key_dir
            .clone()
            .or_else(default_key_dir)
            .ok_or_else(|| ClientError::Config("cannot determine home directory for SSH keys".into()))
    }

    pub fn known_hosts(&self) -> ClientResult<KnownHostsFile> {
        self.ssh
            .known_hosts
            .clone()
            .or_else(KnownHostsFile::default_path)
            .map(KnownHostsFile::new)
            .ok_or_else(|| ClientError::Config("cannot determine home directory for known_hosts".into()))
    }
}

/// `~/.kcast/config.toml`, when a home directory can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kcast").join("config.toml"))
}

/// Parse a config file; a missing file yields the defaults.
pub fn read_config_file(path: &Path) -> ClientResult<ConfigFile> {
    match fs::read_to_string(path) {
        Ok(content) => {
            debug!(path = %path.display(), "loaded configuration file");
            toml::from_str(&content).map_err(|e| ClientError::Config(format!("invalid TOML in {}: {e}", path.display())))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(err) => Err(ClientError::Config(format!("cannot read {}: {err}", path.display()))),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for name in [CONFIG_PATH_ENV, API_URL_ENV, API_TOKEN_ENV, DEBUG_ENV] {
            unsafe { env::remove_var(name) };
        }
    }

    #[test]
    #[serial]
    fn missing_file_gives_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        unsafe { env::set_var(CONFIG_PATH_ENV, dir.path().join("absent.toml")) };

        let settings = Settings::load().unwrap();
        assert_eq!(settings.api_url, kc_types::config::DEFAULT_API_URL);
        assert!(settings.access_token.is_none());
        assert!(!settings.debug);
        assert!(matches!(settings.require_token(), Err(ClientError::Config(_))));
        clear_env();
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "api_url = \"https://file.example\"\naccess_token = \"from-file\"\n\n[ssh]\nidentity_name = \"ops\"\n",
        )
        .unwrap();
        unsafe {
            env::set_var(CONFIG_PATH_ENV, &path);
            env::set_var(API_TOKEN_ENV, "from-env");
            env::set_var(DEBUG_ENV, "true");
        }

        let settings = Settings::load().unwrap();
        assert_eq!(settings.api_url, "https://file.example");
        assert_eq!(settings.require_token().unwrap().expose_secret(), "from-env");
        assert!(settings.debug);
        assert_eq!(settings.ssh.identity_name, "ops");
        clear_env();
    }

    #[test]
    #[serial]
    fn malformed_file_is_config_error() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "api_url = [").unwrap();
        unsafe { env::set_var(CONFIG_PATH_ENV, &path) };

        assert!(matches!(Settings::load(), Err(ClientError::Config(_))));
        clear_env();
    }

    #[test]
    fn explicit_paths_win_over_home() {
        let settings = Settings::from_file(ConfigFile {
            ssh: SshSettings {
                key_dir: Some("/tmp/keys".into()),
                known_hosts: Some("/tmp/keys/hosts".into()),
                ..SshSettings::default()
            },
            ..ConfigFile::default()
        });
        assert_eq!(settings.key_dir().unwrap(), PathBuf::from("/tmp/keys"));
        assert_eq!(settings.known_hosts().unwrap().path(), Path::new("/tmp/keys/hosts"));
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
    }
}
