//! Host-key verification for node connections.

use std::sync::{Arc, Mutex};

use russh::keys::{self, HashAlg, PublicKey};
use ssh_core::known_hosts::{HostKeyStatus, TrustStore, TrustedHost, check_host};
use tracing::{debug, info, warn};

use crate::ClientError;

type Result<T> = crate::ClientResult<T>;

/// Checks the key a node presents against the trust store.
///
/// Unknown keys are accepted for the handshake but only written to the store
/// by [`HostKeyVerifier::commit`], once the connection has authenticated.
pub struct HostKeyVerifier {
    store: Arc<dyn TrustStore>,
    host: String,
    port: u16,
    pending: Mutex<Option<TrustedHost>>,
}

impl HostKeyVerifier {
    pub fn new(store: Arc<dyn TrustStore>, host: impl Into<String>, port: u16) -> Self {
        Self {
            store,
            host: host.into(),
            port,
            pending: Mutex::new(None),
        }
    }

    pub async fn check(&self, server_key: &PublicKey) -> Result<bool> {
        let presented = TrustedHost::from_key(&self.host, self.port, server_key)?;
        match check_host(self.store.as_ref(), &presented).await? {
            HostKeyStatus::Trusted => {
                debug!(host = %presented.host, key_type = %presented.key_type, "host key verified against known hosts");
                Ok(true)
            }
            HostKeyStatus::Unknown => {
                info!(
                    host = %presented.host,
                    fingerprint = %server_key.fingerprint(HashAlg::Sha256),
                    "first contact with host; key will be trusted after authentication"
                );
                self.set_pending(Some(presented))?;
                Ok(true)
            }
            HostKeyStatus::Mismatch { expected } => {
                let expected = expected
                    .iter()
                    .map(|key| fingerprint_for_base64(key).unwrap_or_else(|| "<invalid entry>".into()))
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(ClientError::HostKeyMismatch {
                    host: presented.host,
                    key_type: presented.key_type,
                    expected,
                    presented: server_key.fingerprint(HashAlg::Sha256).to_string(),
                })
            }
        }
    }

    /// Persist a key first seen during this handshake. No-op when the host was
    /// already known.
    pub async fn commit(&self) -> Result<()> {
        let Some(entry) = self.set_pending(None)? else {
            return Ok(());
        };
        if self.store.append(&entry).await? {
            warn!(host = %entry.host, key_type = %entry.key_type, "permanently added host key to known hosts");
        }
        Ok(())
    }

    fn set_pending(&self, entry: Option<TrustedHost>) -> Result<Option<TrustedHost>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ClientError::Connection("host key state poisoned".into()))?;
        Ok(std::mem::replace(&mut *pending, entry))
    }
}

#[derive(Clone)]
pub struct ClientHandler {
    verifier: Arc<HostKeyVerifier>,
}

impl ClientHandler {
    pub fn new(verifier: Arc<HostKeyVerifier>) -> Self {
        Self { verifier }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = crate::ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let verifier = Arc::clone(&self.verifier);
        let key = server_public_key.clone();
        async move { verifier.check(&key).await }
    }
}

fn fingerprint_for_base64(blob: &str) -> Option<String> {
    let parsed = keys::parse_public_key_base64(blob).ok()?;
    Some(parsed.fingerprint(HashAlg::Sha256).to_string())
}

#[cfg(test)]
mod tests {
    use russh::keys::{
        PrivateKey,
        ssh_key::{Algorithm, rand_core::OsRng},
    };
    use ssh_core::known_hosts::MemoryTrustStore;

    use super::*;

    fn host_key() -> PublicKey {
        PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap().public_key().clone()
    }

    #[tokio::test]
    async fn unknown_host_is_recorded_only_on_commit() {
        let store = Arc::new(MemoryTrustStore::new());
        let verifier = HostKeyVerifier::new(store.clone(), "203.0.113.10", 22);
        let key = host_key();

        assert!(verifier.check(&key).await.unwrap());
        assert!(store.entries().is_empty());

        verifier.commit().await.unwrap();
        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], TrustedHost::from_key("203.0.113.10", 22, &key).unwrap());

        // A second commit has nothing pending.
        verifier.commit().await.unwrap();
        assert_eq!(store.entries().len(), 1);
    }

    #[tokio::test]
    async fn known_host_with_other_key_is_rejected() {
        let pinned = TrustedHost::from_key("203.0.113.10", 22, &host_key()).unwrap();
        let store = Arc::new(MemoryTrustStore::with_entries([pinned.clone()]));
        let verifier = HostKeyVerifier::new(store.clone(), "203.0.113.10", 22);

        let err = verifier.check(&host_key()).await.unwrap_err();
        assert!(matches!(err, ClientError::HostKeyMismatch { .. }), "{err}");
        assert!(err.to_string().contains("SHA256:"));

        verifier.commit().await.unwrap();
        assert_eq!(store.entries(), vec![pinned]);
    }

    #[tokio::test]
    async fn known_matching_host_is_not_appended_again() {
        let key = host_key();
        let pinned = TrustedHost::from_key("node.internal", 2222, &key).unwrap();
        let store = Arc::new(MemoryTrustStore::with_entries([pinned.clone()]));
        let verifier = HostKeyVerifier::new(store.clone(), "node.internal", 2222);

        assert!(verifier.check(&key).await.unwrap());
        verifier.commit().await.unwrap();
        assert_eq!(store.entries(), vec![pinned]);
    }
}
