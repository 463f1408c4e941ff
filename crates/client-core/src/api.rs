//! Typed access to the management REST API.

use std::time::Duration;

use async_trait::async_trait;
use kc_types::{AccessGrant, Cluster, ItemList, Node, OpenAccessGrantRequest};
use reqwest::{Method, header};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

const API_KEY_HEADER: &str = "X-API-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Operations of the management API used by `node ssh`.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_clusters(&self) -> ClientResult<Vec<Cluster>>;

    async fn list_nodes(&self, cluster_id: &str) -> ClientResult<Vec<Node>>;

    async fn get_node(&self, cluster_id: &str, node_id: &str) -> ClientResult<Node>;

    /// Open temporary SSH access to a node for `public_key_base64`, admitting
    /// connections from `source_ip` only.
    async fn open_access_grant(
        &self,
        cluster_id: &str,
        node_id: &str,
        public_key_base64: &str,
        source_ip: &str,
    ) -> ClientResult<AccessGrant>;

    async fn close_access_grant(&self, cluster_id: &str, node_id: &str, grant_id: &str) -> ClientResult<()>;
}

/// Cluster id for a cluster UUID or (case-insensitive) name.
pub async fn resolve_cluster_id(api: &dyn ClusterApi, name_or_id: &str) -> ClientResult<String> {
    if Uuid::parse_str(name_or_id).is_ok() {
        return Ok(name_or_id.to_string());
    }
    api.list_clusters()
        .await?
        .into_iter()
        .find(|cluster| cluster.name.eq_ignore_ascii_case(name_or_id))
        .map(|cluster| cluster.id)
        .ok_or_else(|| ClientError::ClusterNotFound(name_or_id.to_string()))
}

/// Node id for a node UUID or (case-insensitive) name.
///
/// Without a reference the cluster must contain exactly one node.
pub async fn resolve_node_id(api: &dyn ClusterApi, cluster_id: &str, name_or_id: Option<&str>) -> ClientResult<String> {
    if let Some(reference) = name_or_id
        && Uuid::parse_str(reference).is_ok()
    {
        return Ok(reference.to_string());
    }

    let mut nodes = api.list_nodes(cluster_id).await?;
    match name_or_id {
        Some(reference) => nodes
            .into_iter()
            .find(|node| node.name.eq_ignore_ascii_case(reference))
            .map(|node| node.id)
            .ok_or_else(|| ClientError::NodeNotFound {
                cluster: cluster_id.to_string(),
                node: reference.to_string(),
            }),
        None if nodes.len() == 1 => Ok(nodes.remove(0).id),
        None if nodes.is_empty() => Err(ClientError::NodeSelection(format!("cluster {cluster_id} has no nodes"))),
        None => {
            let names = nodes.iter().map(|node| node.name.as_str()).collect::<Vec<_>>().join(", ");
            Err(ClientError::NodeSelection(format!(
                "cluster has {} nodes, pick one of: {names}",
                nodes.len()
            )))
        }
    }
}

/// `reqwest` backed implementation authenticating with an API key.
pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
    api_key: SecretString,
    debug: bool,
}

impl HttpApi {
    pub fn new(api_url: &str, api_key: SecretString, debug: bool) -> ClientResult<Self> {
        let base = Url::parse(api_url).map_err(|e| ClientError::Config(format!("invalid API URL {api_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Config(format!("invalid API URL {api_url:?}")));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("kcast/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base,
            api_key,
            debug,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("invalid API URL {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(&self, method: Method, url: Url, body: Option<String>) -> ClientResult<String> {
        if self.debug {
            debug!(%method, %url, body = %logged_request_body(body.as_deref()), "api request");
        }

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header(API_KEY_HEADER, self.api_key.expose_secret());
        if let Some(body) = body {
            request = request.header(header::CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if self.debug {
            debug!(%method, %url, status = status.as_u16(), body = %text, "api response");
        }

        if !status.is_success() {
            return Err(ClientError::Remote {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> ClientResult<T> {
        let url = self.endpoint(segments)?;
        let text = self.execute(Method::GET, url, None).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ClusterApi for HttpApi {
    async fn list_clusters(&self) -> ClientResult<Vec<Cluster>> {
        let list: ItemList<Cluster> = self.get_json(&["v1", "kubernetes", "clusters"]).await?;
        Ok(list.items)
    }

    async fn list_nodes(&self, cluster_id: &str) -> ClientResult<Vec<Node>> {
        let list: ItemList<Node> = self
            .get_json(&["v1", "kubernetes", "clusters", cluster_id, "nodes"])
            .await?;
        Ok(list.items)
    }

    async fn get_node(&self, cluster_id: &str, node_id: &str) -> ClientResult<Node> {
        self.get_json(&["v1", "kubernetes", "clusters", cluster_id, "nodes", node_id])
            .await
    }

    async fn open_access_grant(
        &self,
        cluster_id: &str,
        node_id: &str,
        public_key_base64: &str,
        source_ip: &str,
    ) -> ClientResult<AccessGrant> {
        let url = self.endpoint(&["v1", "kubernetes", "clusters", cluster_id, "nodes", node_id, "ssh"])?;
        let body = serde_json::to_string(&OpenAccessGrantRequest {
            public_key: public_key_base64.to_string(),
            source_ip: source_ip.to_string(),
        })?;
        let text = self.execute(Method::POST, url, Some(body)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn close_access_grant(&self, cluster_id: &str, node_id: &str, grant_id: &str) -> ClientResult<()> {
        let url = self.endpoint(&[
            "v1",
            "kubernetes",
            "clusters",
            cluster_id,
            "nodes",
            node_id,
            "ssh",
            grant_id,
        ])?;
        self.execute(Method::DELETE, url, None).await?;
        Ok(())
    }
}

/// Request bodies carry the operator's public key and source address; only
/// a prefix is logged.
fn logged_request_body(body: Option<&str>) -> String {
    body.map(redact).unwrap_or_default()
}

/// Keep a short prefix so logs stay correlatable.
fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(10).collect();
    format!("{prefix}...<redacted>")
}
