use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use client_core::{
    ClusterApi, Dialer, HttpApi, IpifyResolver, NodeSsh, NodeSshRequest, RetryPolicy, RusshConnector, Settings, Stage,
    resolve_cluster_id, resolve_node_id,
};
use ssh_core::{known_hosts::TrustStore, terminal::ProcessTerminal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "kcast", version, about = "Manage kcast Kubernetes clusters")]
pub struct Cli {
    /// Verbose logging, including API traffic
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Work with cluster nodes
    Node {
        #[command(subcommand)]
        command: NodeCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum NodeCommand {
    /// Open an interactive SSH session on a node
    Ssh(NodeSshArgs),
}

#[derive(Clone, Debug, Args)]
pub struct NodeSshArgs {
    /// Cluster name or id
    #[arg(short = 'c', long, value_name = "CLUSTER")]
    pub cluster: String,
    /// Node name or id; may be omitted for single-node clusters
    #[arg(value_name = "NODE")]
    pub node: Option<String>,
    /// Remote user (defaults to the cloud image user)
    #[arg(short = 'u', long, value_name = "USER")]
    pub user: Option<String>,
    /// Remote SSH port (defaults to the configured port, 22)
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,
}

/// Load configuration and dispatch the parsed command.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load()?;
    if settings.debug && !cli.debug && let Some(level) = ssh_core::logging::enable_debug() {
        debug!(%level, "log level raised by configuration");
    }

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    match cli.command {
        Command::Node {
            command: NodeCommand::Ssh(args),
        } => node_ssh(args, &settings, cancel).await,
    }
}

async fn node_ssh(args: NodeSshArgs, settings: &Settings, cancel: CancellationToken) -> Result<()> {
    let token = settings.require_token()?;
    let api: Arc<dyn ClusterApi> = Arc::new(HttpApi::new(&settings.api_url, token, settings.debug)?);

    let cluster_id = resolve_cluster_id(api.as_ref(), &args.cluster)
        .await
        .map_err(|e| e.at(Stage::ResolveNode))?;
    let node_id = resolve_node_id(api.as_ref(), &cluster_id, args.node.as_deref())
        .await
        .map_err(|e| e.at(Stage::ResolveNode))?;

    let trust: Arc<dyn TrustStore> = Arc::new(settings.known_hosts()?);
    let dialer = Dialer::new(RetryPolicy::from(&settings.ssh), trust);
    let connector = RusshConnector::new(dialer, Arc::new(ProcessTerminal));
    let workflow = NodeSsh::new(
        api,
        Arc::new(IpifyResolver::new()?),
        connector,
        settings.key_dir()?,
        settings.ssh.identity_name.clone(),
    );

    let request = NodeSshRequest {
        cluster_id,
        node_id,
        user: args.user,
        port: args.port.unwrap_or(settings.ssh.port),
    };
    workflow.run(&request, &cancel).await?;
    Ok(())
}

/// Cancel `token` on Ctrl-C, SIGTERM or SIGHUP.
///
/// While the remote shell runs the terminal is raw, so Ctrl-C reaches the
/// remote side as input rather than as a signal here.
fn spawn_signal_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        debug!("shutdown signal received");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => (term, hup),
        (Err(err), _) | (_, Err(err)) => {
            warn!(?err, "failed to install signal handlers; only Ctrl-C will cancel");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
        _ = hup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
