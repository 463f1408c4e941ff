//! Bounded-retry SSH dialing.

use std::{
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use kc_types::SshSettings;
use russh::{
    client,
    keys::{PrivateKey, PrivateKeyWithHashAlg},
};
use ssh_core::{keys::parse_private_key, known_hosts::TrustStore, session::SharedSessionHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{ClientError, ClientResult},
    hostkeys::{ClientHandler, HostKeyVerifier},
};

/// An authenticated connection to a node.
pub type NodeConnection = SharedSessionHandle<ClientHandler>;

/// Timing of the dial loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound of one TCP + SSH handshake + authentication.
    pub attempt_timeout: Duration,
    /// Wall-clock budget for all attempts together.
    pub budget: Duration,
    /// Pause after a failed attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(15),
            budget: Duration::from_secs(120),
            backoff: Duration::from_secs(2),
        }
    }
}

impl From<&SshSettings> for RetryPolicy {
    fn from(settings: &SshSettings) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(settings.connect_timeout_secs),
            budget: Duration::from_secs(settings.dial_budget_secs),
            backoff: Duration::from_secs(settings.retry_backoff_secs),
        }
    }
}

/// Time source for the retry loop.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `attempt` until it succeeds, fails fatally, or the budget runs out.
///
/// Each attempt receives its number and the time it may take, which never
/// exceeds what is left of the budget. Cancellation wins over an attempt or
/// backoff in progress.
pub async fn retry_within_budget<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut attempt: F,
) -> ClientResult<T>
where
    F: FnMut(u32, Duration) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let started = clock.now();
    let mut number = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        number += 1;
        let remaining = policy.budget.saturating_sub(clock.now().saturating_duration_since(started));
        let allowed = policy.attempt_timeout.min(remaining);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            outcome = attempt(number, allowed) => outcome,
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        let elapsed = clock.now().saturating_duration_since(started);
        if elapsed + policy.backoff >= policy.budget {
            return Err(ClientError::ConnectTimeout {
                budget: policy.budget,
                attempts: number,
                last: Box::new(err),
            });
        }
        debug!(attempt = number, error = %err, "dial attempt failed; retrying");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = clock.sleep(policy.backoff) => {}
        }
    }
}

/// Everything needed for one dial. Never persisted.
#[derive(Clone)]
pub struct ConnectConfig {
    pub private_key: Vec<u8>,
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("private_key", &"<redacted>")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Opens authenticated SSH connections with host-key verification.
pub struct Dialer {
    policy: RetryPolicy,
    trust: Arc<dyn TrustStore>,
    clock: Arc<dyn Clock>,
}

impl Dialer {
    pub fn new(policy: RetryPolicy, trust: Arc<dyn TrustStore>) -> Self {
        Self::with_clock(policy, trust, Arc::new(TokioClock))
    }

    pub fn with_clock(policy: RetryPolicy, trust: Arc<dyn TrustStore>, clock: Arc<dyn Clock>) -> Self {
        Self { policy, trust, clock }
    }

    pub async fn dial(&self, config: &ConnectConfig, cancel: &CancellationToken) -> ClientResult<NodeConnection> {
        let key = Arc::new(parse_private_key(&config.private_key)?);
        self.trust.prepare().await?;

        info!(host = %config.host, port = config.port, user = %config.user, "connecting");
        retry_within_budget(&self.policy, self.clock.as_ref(), cancel, |number, allowed| {
            debug!(attempt = number, timeout_secs = allowed.as_secs(), "dial attempt");
            self.dial_once(config, Arc::clone(&key), allowed)
        })
        .await
    }

    async fn dial_once(&self, config: &ConnectConfig, key: Arc<PrivateKey>, timeout: Duration) -> ClientResult<NodeConnection> {
        let verifier = Arc::new(HostKeyVerifier::new(Arc::clone(&self.trust), config.host.clone(), config.port));
        let handler = ClientHandler::new(Arc::clone(&verifier));
        let ssh_config = Arc::new(client::Config {
            nodelay: true,
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        });

        let handshake = async {
            let mut session = client::connect(ssh_config, (config.host.as_str(), config.port), handler).await?;
            let rsa_hash_hint = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();
            let auth = session
                .authenticate_publickey(config.user.clone(), PrivateKeyWithHashAlg::new(key, rsa_hash_hint))
                .await?;
            if !auth.success() {
                return Err(ClientError::AuthRejected {
                    user: config.user.clone(),
                });
            }
            Ok::<_, ClientError>(session)
        };

        let session = match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ClientError::Connection(format!(
                    "no answer from {}:{} within {}s",
                    config.host,
                    config.port,
                    timeout.as_secs()
                )));
            }
        };

        verifier.commit().await?;
        info!(host = %config.host, "authenticated");
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    /// Clock that only moves when told to; `sleep` advances it instantly.
    struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }

        fn elapsed(&self) -> Duration {
            *self.offset.lock().unwrap()
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + self.elapsed()
        }

        async fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }
    }

    #[tokio::test]
    async fn never_answering_server_times_out_within_budget_plus_backoff() {
        let policy = RetryPolicy::default();
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let err = retry_within_budget(&policy, &clock, &cancel, |_, allowed| {
            attempts.fetch_add(1, Ordering::SeqCst);
            // Each attempt burns its whole timeout.
            clock.advance(allowed);
            async { Err::<(), _>(ClientError::Connection("timed out".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::ConnectTimeout { .. }), "{err}");
        assert!(clock.elapsed() <= policy.budget + policy.backoff, "took {:?}", clock.elapsed());
        // 15 s attempts separated by 2 s: 120 s fit seven full cycles plus a shorter last attempt.
        assert_eq!(attempts.load(Ordering::SeqCst), 8);
        if let ClientError::ConnectTimeout { attempts: n, last, .. } = err {
            assert_eq!(n, 8);
            assert!(matches!(*last, ClientError::Connection(_)));
        }
    }

    #[tokio::test]
    async fn success_after_transient_failures() {
        let policy = RetryPolicy::default();
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();

        let value = retry_within_budget(&policy, &clock, &cancel, |number, _| async move {
            if number < 3 {
                Err(ClientError::AuthRejected { user: "ubuntu".into() })
            } else {
                Ok(number)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(clock.elapsed(), policy.backoff * 2);
    }

    #[tokio::test]
    async fn host_key_mismatch_is_not_retried() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let err = retry_within_budget(&RetryPolicy::default(), &clock, &cancel, |_, _| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(ClientError::HostKeyMismatch {
                    host: "203.0.113.1".into(),
                    key_type: "ssh-ed25519".into(),
                    expected: "SHA256:old".into(),
                    presented: "SHA256:new".into(),
                })
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::HostKeyMismatch { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let err = retry_within_budget(&RetryPolicy::default(), &clock, &cancel, |_, _| {
            attempts.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
            async { Err::<(), _>(ClientError::Connection("refused".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_dialing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = retry_within_budget(&RetryPolicy::default(), &ManualClock::new(), &cancel, |_, _| async {
            Ok::<_, ClientError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }

    #[tokio::test]
    async fn invalid_private_key_fails_before_dialing() {
        let dialer = Dialer::with_clock(
            RetryPolicy::default(),
            Arc::new(ssh_core::known_hosts::MemoryTrustStore::new()),
            Arc::new(ManualClock::new()),
        );
        let config = ConnectConfig {
            private_key: b"not a key".to_vec(),
            user: "ubuntu".into(),
            host: "192.0.2.1".into(),
            port: 22,
        };
        let Err(err) = dialer.dial(&config, &CancellationToken::new()).await else { panic!("expected dial to fail") };
        assert!(matches!(err, ClientError::InvalidPrivateKey(_)), "{err}");
        assert!(!format!("{config:?}").contains("not a key"));
    }

    #[test]
    fn policy_follows_settings() {
        let settings = SshSettings {
            connect_timeout_secs: 5,
            dial_budget_secs: 30,
            retry_backoff_secs: 1,
            ..SshSettings::default()
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(5));
        assert_eq!(policy.budget, Duration::from_secs(30));
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert_eq!(RetryPolicy::from(&SshSettings::default()), RetryPolicy::default());
    }
}
