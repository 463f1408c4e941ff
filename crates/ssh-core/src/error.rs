use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in SSH core operations
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Key directory could not be created or read
    #[error("key directory {path} is not usable: {source}")]
    KeyDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Private key present but its public half is missing or does not match
    #[error("keypair at {path} is corrupted: {reason}; remove both key files to regenerate")]
    KeyPairCorrupted { path: PathBuf, reason: String },

    /// Private key bytes could not be parsed
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Key generation or encoding failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Known-hosts file could not be read or appended
    #[error("known hosts file {path}: {source}")]
    TrustStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Remote shell ended abnormally
    #[error("remote shell {0}")]
    RemoteExit(RemoteExit),

    /// Session aborted by the cancellation token
    #[error("session cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// How a remote shell ended when it did not end cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteExit {
    Status(u32),
    Signal(String),
    /// Channel closed without an exit-status or exit-signal message.
    Missing,
}

impl std::fmt::Display for RemoteExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteExit::Status(code) => write!(f, "exited with status {code}"),
            RemoteExit::Signal(name) => write!(f, "killed by signal {name}"),
            RemoteExit::Missing => f.write_str("closed without reporting an exit status"),
        }
    }
}

/// Result type alias for SSH core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    /// Create a corrupted keypair error
    pub fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::KeyPairCorrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a trust store error for `path`
    pub fn trust_store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::TrustStore {
            path: path.into(),
            source,
        }
    }
}
