//! Trust-on-first-use store for remote host keys.
//!
//! Entries are only ever appended; an existing entry is never rewritten. The
//! on-disk form is the OpenSSH `known_hosts` line `<host> <key-type> <base64>`,
//! so the file is shared with the system `ssh` client. Hashed hostnames
//! (`|1|salt|hmac`, written when `HashKnownHosts` is on) match by HMAC-SHA1;
//! negated patterns and `@cert-authority` / `@revoked` lines never match.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use russh::keys::PublicKey;
use sha1::Sha1;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::error::{SshCoreError, SshResult};

/// One pinned host key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustedHost {
    /// Host pattern as written to the file (`host`, `[host]:port` or a
    /// hashed `|1|salt|hmac`).
    pub host: String,
    pub key_type: String,
    /// Base64 wire encoding of the public key.
    pub key: String,
}

impl TrustedHost {
    /// Build the entry a server presenting `key` at `host:port` would get.
    pub fn from_key(host: &str, port: u16, key: &PublicKey) -> SshResult<Self> {
        let encoded = key
            .to_openssh()
            .map_err(|e| SshCoreError::Other(format!("unable to encode host key: {e}")))?;
        let mut parts = encoded.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(key_type), Some(key)) => Ok(Self {
                host: host_pattern(host, port),
                key_type: key_type.to_string(),
                key: key.to_string(),
            }),
            _ => Err(SshCoreError::Other(format!("unexpected host key encoding: {encoded}"))),
        }
    }

    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.host, self.key_type, self.key)
    }

    /// Whether this entry applies to `pattern` (as built by [`host_pattern`]).
    pub fn matches_host(&self, pattern: &str) -> bool {
        match self.host.strip_prefix(HASHED_HOST_MAGIC) {
            Some(hashed) => hashed_host_matches(hashed, pattern),
            None => self.host == pattern,
        }
    }

    /// Parse a `known_hosts` line; returns one entry per host in the
    /// comma-separated host list.
    pub fn parse_line(line: &str) -> Vec<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            return Vec::new();
        }
        let mut fields = line.split_whitespace();
        let (Some(hosts), Some(key_type), Some(key)) = (fields.next(), fields.next(), fields.next()) else {
            return Vec::new();
        };
        hosts
            .split(',')
            .filter(|host| !host.is_empty() && !host.starts_with('!'))
            .map(|host| Self {
                host: host.to_string(),
                key_type: key_type.to_string(),
                key: key.to_string(),
            })
            .collect()
    }
}

const HASHED_HOST_MAGIC: &str = "|1|";

/// `salt|hmac` after the magic; the hmac is HMAC-SHA1 keyed by the salt.
fn hashed_host_matches(hashed: &str, pattern: &str) -> bool {
    let Some((salt, digest)) = hashed.split_once('|') else {
        return false;
    };
    let (Ok(salt), Ok(digest)) = (STANDARD.decode(salt), STANDARD.decode(digest)) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(&salt) else {
        return false;
    };
    mac.update(pattern.as_bytes());
    mac.verify_slice(&digest).is_ok()
}

/// `known_hosts` spelling of an address: bare host on 22, `[host]:port` otherwise.
pub fn host_pattern(host: &str, port: u16) -> String {
    if port == 22 { host.to_string() } else { format!("[{host}]:{port}") }
}

/// Outcome of checking a presented key against the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKeyStatus {
    Trusted,
    Unknown,
    /// The host is pinned to different key(s) of the same type.
    Mismatch { expected: Vec<String> },
}

/// Lookup-then-append store of trusted host keys.
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Make the backing storage usable before the first lookup.
    async fn prepare(&self) -> SshResult<()> {
        Ok(())
    }

    /// Base64 keys pinned for `(host, key_type)`.
    async fn lookup(&self, host: &str, key_type: &str) -> SshResult<Vec<String>>;

    /// Append `entry` unless an identical one is already present. Returns
    /// whether anything was written.
    async fn append(&self, entry: &TrustedHost) -> SshResult<bool>;
}

/// Compare a presented key with what the store has pinned.
pub async fn check_host(store: &dyn TrustStore, presented: &TrustedHost) -> SshResult<HostKeyStatus> {
    let known = store.lookup(&presented.host, &presented.key_type).await?;
    if known.is_empty() {
        return Ok(HostKeyStatus::Unknown);
    }
    if known.iter().any(|key| *key == presented.key) {
        return Ok(HostKeyStatus::Trusted);
    }
    Ok(HostKeyStatus::Mismatch { expected: known })
}

/// `known_hosts` file backed store.
#[derive(Clone, Debug)]
pub struct KnownHostsFile {
    path: PathBuf,
}

impl KnownHostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.ssh/known_hosts`, when a home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty file (and its directory) when missing.
    pub async fn ensure_exists(&self) -> SshResult<()> {
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SshCoreError::trust_store(&self.path, e))?;
        }
        let mut options = fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o644);
        options.open(&self.path).await.map_err(|e| SshCoreError::trust_store(&self.path, e))?;
        debug!(path = %self.path.display(), "created empty known hosts file");
        Ok(())
    }

    async fn read_entries(&self) -> SshResult<(Vec<TrustedHost>, bool)> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => {
                let entries = content.lines().flat_map(TrustedHost::parse_line).collect();
                let needs_newline = !content.is_empty() && !content.ends_with('\n');
                Ok((entries, needs_newline))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok((Vec::new(), false)),
            Err(err) => Err(SshCoreError::trust_store(&self.path, err)),
        }
    }
}

#[async_trait]
impl TrustStore for KnownHostsFile {
    async fn prepare(&self) -> SshResult<()> {
        self.ensure_exists().await
    }

    async fn lookup(&self, host: &str, key_type: &str) -> SshResult<Vec<String>> {
        let (entries, _) = self.read_entries().await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.key_type == key_type && e.matches_host(host))
            .map(|e| e.key)
            .collect())
    }

    async fn append(&self, entry: &TrustedHost) -> SshResult<bool> {
        let (entries, needs_newline) = self.read_entries().await?;
        if entries.iter().any(|e| e == entry) {
            return Ok(false);
        }
        let mut line = String::new();
        if needs_newline {
            line.push('\n');
        }
        line.push_str(&entry.to_line());
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SshCoreError::trust_store(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SshCoreError::trust_store(&self.path, e))?;
        file.flush().await.map_err(|e| SshCoreError::trust_store(&self.path, e))?;
        Ok(true)
    }
}

/// In-memory store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    entries: Mutex<Vec<TrustedHost>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = TrustedHost>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }

    pub fn entries(&self) -> Vec<TrustedHost> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    async fn lookup(&self, host: &str, key_type: &str) -> SshResult<Vec<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SshCoreError::Other("trust store lock poisoned".into()))?;
        Ok(entries
            .iter()
            .filter(|e| e.key_type == key_type && e.matches_host(host))
            .map(|e| e.key.clone())
            .collect())
    }

    async fn append(&self, entry: &TrustedHost) -> SshResult<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SshCoreError::Other("trust store lock poisoned".into()))?;
        if entries.iter().any(|e| e == entry) {
            return Ok(false);
        }
        entries.push(entry.clone());
        Ok(true)
    }
}
