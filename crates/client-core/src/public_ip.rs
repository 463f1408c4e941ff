use std::{net::IpAddr, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

pub const IPIFY_URL: &str = "https://api.ipify.org";

/// Source of this machine's public address, as seen by the node firewall.
#[async_trait]
pub trait PublicIpResolver: Send + Sync {
    async fn public_ip(&self, cancel: &CancellationToken) -> ClientResult<String>;
}

/// Plain-text "what is my IP" endpoint with a small constant-backoff retry.
pub struct IpifyResolver {
    client: reqwest::Client,
    url: String,
    attempts: u32,
    backoff: Duration,
}

impl IpifyResolver {
    pub fn new() -> ClientResult<Self> {
        Self::with_endpoint(IPIFY_URL, 3, Duration::from_secs(2))
    }

    pub fn with_endpoint(url: impl Into<String>, attempts: u32, backoff: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            attempts: attempts.max(1),
            backoff,
        })
    }

    async fn fetch(&self) -> ClientResult<String> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::PublicIp(format!("{} answered {status}", self.url)));
        }
        parse_ip(&body)
    }
}

#[async_trait]
impl PublicIpResolver for IpifyResolver {
    async fn public_ip(&self, cancel: &CancellationToken) -> ClientResult<String> {
        let mut attempt = 1;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                outcome = self.fetch() => outcome,
            };
            match outcome {
                Ok(ip) => return Ok(ip),
                Err(err) if attempt >= self.attempts => {
                    return Err(match err {
                        ClientError::PublicIp(_) => err,
                        other => ClientError::PublicIp(other.to_string()),
                    });
                }
                Err(err) => debug!(attempt, error = %err, "public IP lookup failed; retrying"),
            }
            attempt += 1;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}

fn parse_ip(body: &str) -> ClientResult<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ClientError::PublicIp("empty response".into()));
    }
    trimmed
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| ClientError::PublicIp(format!("unexpected response {trimmed:?}")))
}
