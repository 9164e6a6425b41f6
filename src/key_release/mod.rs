//! Secure key release and secret unwrapping
//!
//! 1. Get a token for the KEK's key store
//! 2. Ask the key-release sidecar for the KEK; the sidecar attests on our behalf
//! 3. Get a token for the DEK's key store and fetch the wrapped secret
//! 4. Unwrap it locally with RSA-OAEP(SHA-256)

pub mod jwk;
pub mod token;
pub mod types;

pub use jwk::RsaJwk;
pub use token::{scope_for_key_store, IdentitySidecar, TokenProvider};
pub use types::{KekDescriptor, UnwrapSecretRequest};

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Method, Url};
use rsa::RsaPrivateKey;
use tokio::time::Instant;

use crate::client;
use crate::error::{Error, Result};
use crate::registry::{ClientRegistry, TrustConfig};
use crate::transport::{self, RetryPolicy};
use types::{KeyReleaseRequest, KeyReleaseResponse, SecretBundle};

pub const SECRETS_API_VERSION: &str = "7.4";

const KEY_RELEASE_PATH: &str = "/key/release";

/// Local sidecar ports; unset ports are a configuration error at call time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyReleaseSettings {
    pub skr_port: Option<u16>,
    pub identity_port: Option<u16>,
}

pub struct SecureKeyRelease {
    registry: Arc<ClientRegistry>,
    settings: KeyReleaseSettings,
    retry: RetryPolicy,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl SecureKeyRelease {
    pub fn new(registry: Arc<ClientRegistry>, settings: KeyReleaseSettings) -> Self {
        Self {
            registry,
            settings,
            retry: RetryPolicy::default(),
            tokens: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use `tokens` instead of the identity sidecar
    pub fn with_token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Release the KEK, fetch the wrapped secret and return its plaintext
    pub async fn unwrap_secret(&self, request: &UnwrapSecretRequest) -> Result<Vec<u8>> {
        let plan = self.plan(request)?;

        let kek = self.release_key(&plan, request).await?;

        let token = plan
            .tokens
            .access_token(
                scope_for_key_store(&request.akv_endpoint),
                &request.tenant_id,
                &request.client_id,
            )
            .await?;
        let wrapped = self.fetch_secret(&plan.vault, &request.kid, &token).await?;

        let plaintext = jwk::unwrap_oaep_sha256(&kek, &wrapped)?;
        tracing::info!(kid = %request.kid, "secret unwrapped");
        Ok(plaintext)
    }

    /// [`SecureKeyRelease::unwrap_secret`] bounded by a caller deadline
    pub async fn unwrap_secret_with_deadline(
        &self,
        request: &UnwrapSecretRequest,
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        transport::until(Some(deadline), self.unwrap_secret(request)).await
    }

    /// Check settings and endpoints before any network call
    fn plan(&self, request: &UnwrapSecretRequest) -> Result<Plan> {
        let skr_port = self
            .settings
            .skr_port
            .ok_or_else(|| Error::Configuration("Key release sidecar port is not set".into()))?;
        let skr = Url::parse(&format!("http://localhost:{}/", skr_port))
            .map_err(|e| Error::Configuration(format!("Invalid key release port: {}", e)))?;

        let tokens = match &self.tokens {
            Some(tokens) => tokens.clone(),
            None => {
                let port = self.settings.identity_port.ok_or_else(|| {
                    Error::Configuration("Identity sidecar port is not set".into())
                })?;
                Arc::new(IdentitySidecar::new(port, self.registry.clone(), self.retry.clone())?)
                    as Arc<dyn TokenProvider>
            }
        };

        for (name, value) in [
            ("kid", &request.kid),
            ("kek.kid", &request.kek.kid),
            ("kek.akvEndpoint", &request.kek.akv_endpoint),
            ("kek.maaEndpoint", &request.kek.maa_endpoint),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("{} is empty", name)));
            }
        }

        let vault = Url::parse(&request.akv_endpoint).map_err(|e| {
            Error::Configuration(format!(
                "Invalid key vault endpoint {}: {}",
                request.akv_endpoint, e
            ))
        })?;

        Ok(Plan { skr, vault, tokens })
    }

    async fn release_key(
        &self,
        plan: &Plan,
        request: &UnwrapSecretRequest,
    ) -> Result<RsaPrivateKey> {
        let kek = &request.kek;
        let token = match &kek.access_token {
            Some(token) => token.clone(),
            None => {
                plan.tokens
                    .access_token(
                        scope_for_key_store(&kek.akv_endpoint),
                        &request.tenant_id,
                        &request.client_id,
                    )
                    .await?
            }
        };

        let client = self
            .registry
            .get_or_create(&plan.skr, &TrustConfig::SystemRoots, &self.retry)
            .await?;

        tracing::debug!(kid = %kek.kid, akv = %kek.akv_endpoint, "releasing key");
        let released: KeyReleaseResponse = client
            .post_json(
                KEY_RELEASE_PATH,
                &KeyReleaseRequest {
                    maa_endpoint: &kek.maa_endpoint,
                    akv_endpoint: &kek.akv_endpoint,
                    kid: &kek.kid,
                    access_token: &token,
                },
            )
            .await?;

        RsaJwk::parse(&released.key)?.to_private_key()
    }

    async fn fetch_secret(&self, vault: &Url, kid: &str, token: &str) -> Result<Vec<u8>> {
        let client = self
            .registry
            .get_or_create(vault, &TrustConfig::SystemRoots, &self.retry)
            .await?;

        tracing::debug!(kid, vault = %vault, "fetching wrapped secret");
        let request = client
            .request(Method::GET, &format!("/secrets/{}", kid))?
            .query(&[("api-version", SECRETS_API_VERSION)])
            .bearer_auth(token)
            .build()?;

        let response = client.send(request).await?;
        let bundle: SecretBundle = client::read_json(response).await?;
        Ok(STANDARD.decode(bundle.value.trim())?)
    }
}

struct Plan {
    skr: Url,
    vault: Url,
    tokens: Arc<dyn TokenProvider>,
}
