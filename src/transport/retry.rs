//! Transient-fault retries with jittered exponential backoff

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Request, Response, StatusCode};

use super::{logical_request, Transport};
use crate::error::Result;

/// Bounded retry schedule, constructed once and passed to every client that uses it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    /// Resends after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never resends
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before resend number `attempt` (0-based)
    ///
    /// Half of the capped exponential delay is fixed, the other half is uniform jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let half = capped.as_millis() as u64 / 2;
        let jitter = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis(half + jitter)
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }
}

pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Transport for RetryingTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        logical_request(self.send_with_retries(request)).await
    }
}

impl RetryingTransport {
    async fn send_with_retries(&self, request: Request) -> Result<Response> {
        let mut attempt = 0;
        let mut pending = request;

        loop {
            let next = if attempt < self.policy.max_retries {
                pending.try_clone()
            } else {
                None
            };

            let outcome = self.inner.send(pending).await;
            let retryable = match &outcome {
                Ok(response) => RetryPolicy::is_retryable_status(response.status()),
                Err(e) => e.is_transient(),
            };

            match next {
                Some(next) if retryable => {
                    let delay = self.policy.backoff(attempt);
                    match &outcome {
                        Ok(response) => tracing::debug!(
                            status = %response.status(),
                            attempt,
                            ?delay,
                            "retrying after server status"
                        ),
                        Err(e) => tracing::debug!(
                            error = %e,
                            attempt,
                            ?delay,
                            "retrying after network error"
                        ),
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    pending = next;
                }
                _ => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use reqwest::{Method, Url};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing {
        fail_times: usize,
        failure: fn() -> Result<Response>,
        sends: AtomicUsize,
    }

    impl Failing {
        fn new(fail_times: usize, failure: fn() -> Result<Response>) -> Arc<Self> {
            Arc::new(Self {
                fail_times,
                failure,
                sends: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for Failing {
        async fn send(&self, _request: Request) -> Result<Response> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                (self.failure)()
            } else {
                Ok(status(200))
            }
        }
    }

    fn status(code: u16) -> Response {
        Response::from(http::Response::builder().status(code).body("").unwrap())
    }

    fn reset() -> Result<Response> {
        Err(Error::TransientNetwork("connection reset".into()))
    }

    fn unavailable() -> Result<Response> {
        Ok(status(503))
    }

    fn throttled() -> Result<Response> {
        Ok(status(429))
    }

    fn untrusted() -> Result<Response> {
        Err(Error::TlsTrustFailure("unknown issuer".into()))
    }

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("https://peer.invalid/").unwrap())
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        for attempt in 0..40 {
            let delay = policy.backoff(attempt);
            assert!(delay <= Duration::from_millis(1000));
        }
        let first = policy.backoff(0);
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        for failure in [reset as fn() -> Result<Response>, unavailable, throttled] {
            let inner = Failing::new(2, failure);
            let transport = RetryingTransport::new(inner.clone(), fast(3));
            let response = transport.send(request()).await.unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(inner.sends.load(Ordering::SeqCst), 3);
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let inner = Failing::new(usize::MAX, reset);
        let transport = RetryingTransport::new(inner.clone(), fast(2));
        let err = transport.send(request()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(inner.sends.load(Ordering::SeqCst), 3);

        let inner = Failing::new(usize::MAX, unavailable);
        let transport = RetryingTransport::new(inner.clone(), fast(1));
        let response = transport.send(request()).await.unwrap();
        assert_eq!(response.status(), 503);
        assert_eq!(inner.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tls_failures_are_not_retried() {
        let inner = Failing::new(usize::MAX, untrusted);
        let transport = RetryingTransport::new(inner.clone(), fast(5));
        let err = transport.send(request()).await.unwrap_err();
        assert!(err.is_tls_trust_failure());
        assert_eq!(inner.sends.load(Ordering::SeqCst), 1);
    }
}
