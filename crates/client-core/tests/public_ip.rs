mod common;

use std::time::Duration;

use client_core::{ClientError, IpifyResolver, PublicIpResolver};
use common::CannedServer;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn retries_until_an_address_is_returned() {
    let server = CannedServer::start(vec![(503, "busy"), (200, "203.0.113.9\n")]).await;
    let resolver = IpifyResolver::with_endpoint(server.url.clone(), 3, Duration::from_millis(10)).unwrap();

    let ip = resolver.public_ip(&CancellationToken::new()).await.unwrap();
    assert_eq!(ip, "203.0.113.9");
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn empty_body_on_every_attempt_fails() {
    let server = CannedServer::start(vec![(200, ""), (200, ""), (200, "")]).await;
    let resolver = IpifyResolver::with_endpoint(server.url.clone(), 3, Duration::from_millis(10)).unwrap();

    let err = resolver.public_ip(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::PublicIp(_)), "{err}");
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn cancelled_lookup_returns_cancelled() {
    let server = CannedServer::start(vec![(200, "")]).await;
    let resolver = IpifyResolver::with_endpoint(server.url.clone(), 3, Duration::from_secs(30)).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = resolver.public_ip(&cancel).await.unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
}
