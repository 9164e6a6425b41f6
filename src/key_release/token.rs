//! Access tokens for key stores

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, Url};

use super::types::TokenResponse;
use crate::client;
use crate::error::{Error, Result};
use crate::registry::{ClientRegistry, TrustConfig};
use crate::transport::RetryPolicy;

pub const VAULT_SCOPE: &str = "https://vault.azure.net/.default";
pub const MANAGED_HSM_SCOPE: &str = "https://managedhsm.azure.net/.default";

const MANAGED_HSM_DOMAIN: &str = "managedhsm.azure.net";
const TOKEN_PATH: &str = "/metadata/identity/oauth2/token";

/// OAuth scope for a vault or managed HSM endpoint
pub fn scope_for_key_store(endpoint: &str) -> &'static str {
    // bare host names do not parse as URLs; `host:port` parses with the host as scheme
    let host = Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .unwrap_or_else(|| {
            let authority = endpoint.split('/').next().unwrap_or_default();
            authority.split(':').next().unwrap_or_default().to_owned()
        });
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if host == MANAGED_HSM_DOMAIN || host.ends_with(&format!(".{}", MANAGED_HSM_DOMAIN)) {
        MANAGED_HSM_SCOPE
    } else {
        VAULT_SCOPE
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, scope: &str, tenant_id: &str, client_id: &str) -> Result<String>;
}

/// Tokens from the local managed-identity sidecar
pub struct IdentitySidecar {
    base: Url,
    registry: Arc<ClientRegistry>,
    retry: RetryPolicy,
}

impl IdentitySidecar {
    pub fn new(port: u16, registry: Arc<ClientRegistry>, retry: RetryPolicy) -> Result<Self> {
        let base = Url::parse(&format!("http://localhost:{}/", port))
            .map_err(|e| {
                Error::Configuration(format!("Invalid identity port {}: {}", port, e))
            })?;
        Ok(Self {
            base,
            registry,
            retry,
        })
    }
}

#[async_trait]
impl TokenProvider for IdentitySidecar {
    async fn access_token(&self, scope: &str, tenant_id: &str, client_id: &str) -> Result<String> {
        let client = self
            .registry
            .get_or_create(&self.base, &TrustConfig::SystemRoots, &self.retry)
            .await?;

        tracing::debug!(scope, "requesting access token");
        let request = client
            .request(Method::GET, TOKEN_PATH)?
            .query(&[("scope", scope), ("tenantId", tenant_id), ("clientId", client_id)])
            .build()?;

        let response = client.send(request).await?;
        let token: TokenResponse = client::read_json(response).await?;
        Ok(token.access_token)
    }
}
