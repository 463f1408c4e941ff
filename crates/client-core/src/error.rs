use std::{fmt, time::Duration};

use ssh_core::SshCoreError;
use thiserror::Error;

/// Errors that can occur in client-core operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration missing or unreadable
    #[error("configuration error: {0}")]
    Config(String),

    /// No cluster matches the given name or id
    #[error("cluster {0:?} not found")]
    ClusterNotFound(String),

    /// No node in the cluster matches the given name or id
    #[error("node {node:?} not found in cluster {cluster}")]
    NodeNotFound { cluster: String, node: String },

    /// Node reference omitted and the cluster does not have exactly one node
    #[error("{0}")]
    NodeSelection(String),

    /// Node has not been assigned both a public and a private address yet
    #[error("node {node} is not ready: public and private IP must both be assigned")]
    NodeNotReady { node: String },

    /// Management API answered with a non-success status
    #[error("remote service returned {status}: {body}")]
    Remote { status: u16, body: String },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not have the expected shape
    #[error("invalid response from remote service: {0}")]
    Decode(#[from] serde_json::Error),

    /// Public address of this machine could not be determined
    #[error("unable to determine public IP: {0}")]
    PublicIp(String),

    /// Private key bytes could not be parsed
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Host presented a key different from the pinned one
    #[error(
        "host key mismatch for {host}: known hosts pins {key_type} key {expected}, server presented {presented}; \
         remove the stale entry from known_hosts if the node was rebuilt"
    )]
    HostKeyMismatch {
        host: String,
        key_type: String,
        expected: String,
        presented: String,
    },

    /// Server refused the public key
    #[error("server rejected public key authentication for user {user}")]
    AuthRejected { user: String },

    /// One connection attempt failed
    #[error("connection failed: {0}")]
    Connection(String),

    /// Dial budget exhausted
    #[error("could not connect within {}s after {attempts} attempt(s): {last}", .budget.as_secs())]
    ConnectTimeout {
        budget: Duration,
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },

    /// Interactive session failed
    #[error("{0}")]
    Session(#[source] SshCoreError),

    /// Aborted by signal or caller
    #[error("cancelled")]
    Cancelled,

    /// A workflow step failed
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ClientError>,
    },

    /// Closing the access grant failed after an earlier failure
    #[error("{primary}; additionally {cleanup}")]
    CleanupFailed {
        primary: Box<ClientError>,
        cleanup: Box<ClientError>,
    },

    /// SSH core error
    #[error(transparent)]
    Core(SshCoreError),

    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Step of the node SSH workflow an error is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    ResolveNode,
    Keypair,
    PublicIp,
    OpenGrant,
    Dial,
    Session,
    CloseGrant,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::ResolveNode => "resolving node",
            Stage::Keypair => "preparing SSH keypair",
            Stage::PublicIp => "discovering public IP",
            Stage::OpenGrant => "opening SSH access",
            Stage::Dial => "connecting to node",
            Stage::Session => "interactive session",
            Stage::CloseGrant => "closing SSH access",
        };
        f.write_str(label)
    }
}

impl ClientError {
    /// Attribute `self` to a workflow step.
    pub fn at(self, stage: Stage) -> Self {
        ClientError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Map a session driver failure; cancellation stays distinguishable.
    pub fn session(err: SshCoreError) -> Self {
        match err {
            SshCoreError::Cancelled => ClientError::Cancelled,
            other => ClientError::Session(other),
        }
    }

    /// Whether another dial attempt may succeed where this one failed.
    ///
    /// Auth rejections are retried: a freshly opened access rule can take a
    /// few seconds to reach the node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(_) | ClientError::AuthRejected { .. } | ClientError::Ssh(_) | ClientError::Io(_)
        )
    }

    /// The error with any step attribution removed.
    pub fn root(&self) -> &ClientError {
        match self {
            ClientError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Step the error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ClientError::Stage { stage, .. } => Some(*stage),
            ClientError::CleanupFailed { primary, .. } => primary.stage(),
            _ => None,
        }
    }
}

impl From<SshCoreError> for ClientError {
    fn from(err: SshCoreError) -> Self {
        match err {
            SshCoreError::Cancelled => ClientError::Cancelled,
            SshCoreError::InvalidPrivateKey(reason) => ClientError::InvalidPrivateKey(reason),
            other => ClientError::Core(other),
        }
    }
}
