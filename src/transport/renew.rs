//! Re-discovery and re-pinning after a peer rotates its certificate
//!
//! A request that fails the TLS trust check triggers exactly one discovery cycle for
//! the peer. If it yields a certificate, the validator's roots are swapped and the
//! request is sent one more time. Discovery failures and a second TLS failure both
//! surface the original trust error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Request, Response};

use super::{claim_renewal, Transport};
use crate::discovery::{CertificateDiscovery, DiscoveryConfig};
use crate::error::{Error, Result};
use crate::tls::{self, PinnedTlsValidator};

/// Called with the peer config and the newly pinned PEM after each renewal
pub type RenewalHook = Arc<dyn Fn(&DiscoveryConfig, &str) + Send + Sync>;

pub struct RenewingTransport {
    inner: Arc<dyn Transport>,
    discovery: Arc<dyn CertificateDiscovery>,
    config: DiscoveryConfig,
    validator: Arc<PinnedTlsValidator>,
    on_renewal: Option<RenewalHook>,
    renewals: AtomicU64,
}

impl RenewingTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        discovery: Arc<dyn CertificateDiscovery>,
        config: DiscoveryConfig,
        validator: Arc<PinnedTlsValidator>,
    ) -> Self {
        Self {
            inner,
            discovery,
            config,
            validator,
            on_renewal: None,
            renewals: AtomicU64::new(0),
        }
    }

    pub fn with_hook(mut self, hook: Option<RenewalHook>) -> Self {
        self.on_renewal = hook;
        self
    }

    /// Number of successful renewals so far
    pub fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    async fn renew(&self) -> Result<()> {
        let pem = self.discovery.discover(&self.config).await?;
        self.validator.replace(std::slice::from_ref(&pem))?;
        self.renewals.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            endpoint = %self.config.certificate_discovery_endpoint,
            fingerprint = %tls::pem_fingerprint(&pem).unwrap_or_default(),
            "pinned service certificate renewed"
        );

        if let Some(hook) = &self.on_renewal {
            hook(&self.config, &pem);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RenewingTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let retry = request.try_clone();

        let reason = match self.inner.send(request).await {
            Err(Error::TlsTrustFailure(reason)) => reason,
            other => return other,
        };

        let Some(retry) = retry else {
            tracing::debug!("request body cannot be replayed, not renewing");
            return Err(Error::TlsTrustFailure(reason));
        };

        if !claim_renewal() {
            tracing::debug!("certificate already renewed for this request");
            return Err(Error::TlsTrustFailure(reason));
        }

        tracing::warn!(
            endpoint = %self.config.certificate_discovery_endpoint,
            %reason,
            "TLS trust failure, re-discovering service certificate"
        );

        if let Err(e) = self.renew().await {
            tracing::warn!(error = %e, code = e.code(), "certificate renewal failed");
            return Err(Error::TlsTrustFailure(reason));
        }

        match self.inner.send(retry).await {
            Err(Error::TlsTrustFailure(_)) => Err(Error::TlsTrustFailure(reason)),
            other => other,
        }
    }
}
