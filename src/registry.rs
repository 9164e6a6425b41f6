//! Cache of assembled clients keyed by endpoint, trust and retry policy
//!
//! Lookups and inserts take a short lock that is never held across network I/O.
//! Two callers missing on the same key at once may both run discovery; the first
//! client inserted wins and the other is dropped.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::Url;

use crate::client::AttestedClient;
use crate::discovery::{CertificateDiscovery, DiscoveryConfig};
use crate::error::{Error, Result};
use crate::tls::{self, PinnedTlsValidator};
use crate::transport::{
    HttpTransport, RenewalHook, RenewingTransport, RetryPolicy, RetryingTransport, Transport,
};

/// Default per-request timeout for registry-built clients
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// How a client decides to trust its peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrustConfig {
    /// Known service certificates, e.g. a PEM supplied by the caller
    Static { certificates: Vec<String> },

    /// Certificates found and re-found through attested discovery
    Discovery(DiscoveryConfig),

    /// Public CAs only, for collaborators outside the attested boundary
    SystemRoots,
}

impl TrustConfig {
    pub fn static_pem(pem: impl Into<String>) -> Self {
        Self::Static {
            certificates: vec![pem.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientCacheKey {
    pub endpoint: Url,
    pub trust: TrustConfig,
    pub retry: RetryPolicy,
}

pub struct ClientRegistry {
    discovery: Arc<dyn CertificateDiscovery>,
    on_renewal: Option<RenewalHook>,
    timeout: Duration,
    clients: RwLock<HashMap<ClientCacheKey, Arc<AttestedClient>>>,
}

impl ClientRegistry {
    pub fn new(discovery: Arc<dyn CertificateDiscovery>) -> Self {
        Self {
            discovery,
            on_renewal: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Callback for every certificate renewal on discovery-trusted clients
    pub fn with_renewal_hook(mut self, hook: RenewalHook) -> Self {
        self.on_renewal = Some(hook);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-request timeout applied to every client this registry builds
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached client for this key, building it on first use
    ///
    /// For [`TrustConfig::Discovery`] the first use runs one discovery cycle; if
    /// it fails nothing is cached and the error is returned.
    pub async fn get_or_create(
        &self,
        endpoint: &Url,
        trust: &TrustConfig,
        retry: &RetryPolicy,
    ) -> Result<Arc<AttestedClient>> {
        let key = ClientCacheKey {
            endpoint: endpoint.clone(),
            trust: trust.clone(),
            retry: retry.clone(),
        };

        let cached = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let built = Arc::new(self.build(&key).await?);

        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        let client = clients.entry(key).or_insert(built).clone();
        Ok(client)
    }

    async fn build(&self, key: &ClientCacheKey) -> Result<AttestedClient> {
        let validator = match &key.trust {
            TrustConfig::Static { certificates } => {
                if certificates.is_empty() {
                    return Err(Error::Configuration(
                        "Static trust requires at least one certificate".into(),
                    ));
                }
                PinnedTlsValidator::new(certificates)?
            }
            TrustConfig::Discovery(config) => {
                let pem = self.discovery.discover(config).await?;
                tracing::info!(
                    endpoint = %key.endpoint,
                    fingerprint = %tls::pem_fingerprint(&pem).unwrap_or_default(),
                    "pinned discovered service certificate"
                );
                PinnedTlsValidator::new(&[pem])?
            }
            TrustConfig::SystemRoots => PinnedTlsValidator::new(&[])?,
        };
        let validator = Arc::new(validator);

        let http = tls::create_pinned_client(validator.clone(), self.timeout)?;
        let base: Arc<dyn Transport> = Arc::new(HttpTransport::new(http.clone()));

        let inner: Arc<dyn Transport> = match &key.trust {
            TrustConfig::Discovery(config) => Arc::new(
                RenewingTransport::new(
                    base,
                    self.discovery.clone(),
                    config.clone(),
                    validator.clone(),
                )
                .with_hook(self.on_renewal.clone()),
            ),
            _ => base,
        };
        let stack = Arc::new(RetryingTransport::new(inner, key.retry.clone()));

        tracing::debug!(endpoint = %key.endpoint, "built attested client");
        Ok(AttestedClient::new(key.endpoint.clone(), http, stack, validator))
    }
}
