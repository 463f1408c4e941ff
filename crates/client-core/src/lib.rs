//! Node SSH access workflow: REST client, dialer and orchestration.

pub mod api;
pub mod config;
pub mod dial;
pub mod error;
mod hostkeys;
pub mod node_ssh;
pub mod public_ip;

pub use api::{ClusterApi, HttpApi, resolve_cluster_id, resolve_node_id};
pub use config::Settings;
pub use dial::{Clock, ConnectConfig, Dialer, NodeConnection, RetryPolicy, TokioClock};
pub use error::{ClientError, ClientResult, Stage};
pub use hostkeys::{ClientHandler, HostKeyVerifier};
pub use node_ssh::{NodeSsh, NodeSshRequest, RusshConnector, ShellConnector, SshPhase};
pub use public_ip::{IpifyResolver, PublicIpResolver};
