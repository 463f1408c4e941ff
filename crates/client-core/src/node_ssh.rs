//! End-to-end `node ssh` workflow.
//!
//! Keypair, access grant, dial, shell, then the grant is closed again. Once a
//! grant has been opened it is closed exactly once before [`NodeSsh::run`]
//! returns, whatever happened in between.

use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use ssh_core::{
    keys::ensure_keypair,
    session::{self, ShellOptions, run_shell},
    terminal::RawTerminal,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    api::ClusterApi,
    dial::{ConnectConfig, Dialer, NodeConnection},
    error::{ClientError, ClientResult, Stage},
    public_ip::PublicIpResolver,
};

/// Where the workflow currently is. Failures leave from any state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SshPhase {
    Idle,
    KeypairReady,
    GrantOpen,
    Connected,
    SessionActive,
    GrantClosing,
    Done,
}

impl fmt::Display for SshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SshPhase::Idle => "idle",
            SshPhase::KeypairReady => "keypair-ready",
            SshPhase::GrantOpen => "grant-open",
            SshPhase::Connected => "connected",
            SshPhase::SessionActive => "session-active",
            SshPhase::GrantClosing => "grant-closing",
            SshPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Transport and terminal half of the workflow.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    type Connection: Send;

    async fn dial(&self, config: &ConnectConfig, cancel: &CancellationToken) -> ClientResult<Self::Connection>;

    /// Run the interactive shell and tear the connection down afterwards.
    async fn run_session(&self, connection: Self::Connection, cancel: &CancellationToken) -> ClientResult<()>;
}

/// `russh` transport wired to the process terminal.
pub struct RusshConnector {
    dialer: Dialer,
    terminal: Arc<dyn RawTerminal>,
}

impl RusshConnector {
    pub fn new(dialer: Dialer, terminal: Arc<dyn RawTerminal>) -> Self {
        Self { dialer, terminal }
    }
}

#[async_trait]
impl ShellConnector for RusshConnector {
    type Connection = NodeConnection;

    async fn dial(&self, config: &ConnectConfig, cancel: &CancellationToken) -> ClientResult<NodeConnection> {
        self.dialer.dial(config, cancel).await
    }

    async fn run_session(&self, connection: NodeConnection, cancel: &CancellationToken) -> ClientResult<()> {
        let outcome = run_shell(&connection, self.terminal.as_ref(), ShellOptions::default(), cancel).await;
        session::disconnect(&connection).await;
        outcome.map_err(ClientError::session)
    }
}

/// One `node ssh` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSshRequest {
    pub cluster_id: String,
    pub node_id: String,
    /// Remote login; defaults to the image user of the node's cloud.
    pub user: Option<String>,
    pub port: u16,
}

/// Sequences keypair, access grant, dial and session.
pub struct NodeSsh<C: ShellConnector> {
    api: Arc<dyn ClusterApi>,
    public_ip: Arc<dyn PublicIpResolver>,
    connector: C,
    key_dir: PathBuf,
    identity: String,
}

impl<C: ShellConnector> NodeSsh<C> {
    pub fn new(
        api: Arc<dyn ClusterApi>,
        public_ip: Arc<dyn PublicIpResolver>,
        connector: C,
        key_dir: impl Into<PathBuf>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            api,
            public_ip,
            connector,
            key_dir: key_dir.into(),
            identity: identity.into(),
        }
    }

    pub async fn run(&self, request: &NodeSshRequest, cancel: &CancellationToken) -> ClientResult<()> {
        let mut phase = SshPhase::Idle;

        let node = self
            .api
            .get_node(&request.cluster_id, &request.node_id)
            .await
            .map_err(|e| e.at(Stage::ResolveNode))?;
        let host = node
            .reachable_ip()
            .ok_or_else(|| {
                ClientError::NodeNotReady {
                    node: request.node_id.clone(),
                }
                .at(Stage::ResolveNode)
            })?
            .to_string();
        let user = request
            .user
            .clone()
            .unwrap_or_else(|| node.cloud.default_ssh_user().to_string());

        let keypair = ensure_keypair(&self.key_dir, &self.identity).map_err(|e| ClientError::from(e).at(Stage::Keypair))?;
        advance(&mut phase, SshPhase::KeypairReady);

        let source_ip = self
            .public_ip
            .public_ip(cancel)
            .await
            .map_err(|e| e.at(Stage::PublicIp))?;
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled.at(Stage::OpenGrant));
        }

        let grant = self
            .api
            .open_access_grant(&request.cluster_id, &request.node_id, &keypair.public_key_base64(), &source_ip)
            .await
            .map_err(|e| e.at(Stage::OpenGrant))?;
        advance(&mut phase, SshPhase::GrantOpen);
        info!(grant = %grant.id, %source_ip, "opened SSH access");

        let config = ConnectConfig {
            private_key: keypair.private,
            user,
            host,
            port: request.port,
        };
        let outcome = self.connect_and_run(&config, cancel, &mut phase).await;

        advance(&mut phase, SshPhase::GrantClosing);
        let closed = self
            .api
            .close_access_grant(&request.cluster_id, &request.node_id, &grant.id)
            .await
            .map_err(|e| e.at(Stage::CloseGrant));
        advance(&mut phase, SshPhase::Done);

        match (outcome, closed) {
            (Ok(()), Ok(())) => {
                info!(grant = %grant.id, "closed SSH access");
                Ok(())
            }
            (Ok(()), Err(cleanup)) => {
                warn!(grant = %grant.id, error = %cleanup, "failed to close SSH access");
                Err(cleanup)
            }
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(cleanup)) => {
                warn!(grant = %grant.id, error = %cleanup, "failed to close SSH access");
                Err(ClientError::CleanupFailed {
                    primary: Box::new(primary),
                    cleanup: Box::new(cleanup),
                })
            }
        }
    }

    async fn connect_and_run(&self, config: &ConnectConfig, cancel: &CancellationToken, phase: &mut SshPhase) -> ClientResult<()> {
        let connection = self
            .connector
            .dial(config, cancel)
            .await
            .map_err(|e| e.at(Stage::Dial))?;
        advance(phase, SshPhase::Connected);

        advance(phase, SshPhase::SessionActive);
        self.connector
            .run_session(connection, cancel)
            .await
            .map_err(|e| e.at(Stage::Session))
    }
}

fn advance(phase: &mut SshPhase, next: SshPhase) {
    info!(from = %phase, to = %next, "node ssh phase");
    *phase = next;
}
