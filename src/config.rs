//! Settings from `CLEANROOM_`-prefixed environment variables
//!
//! A `.env` file in the working directory is loaded first when present.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::discovery::{CertificateDiscovery, CertificateExtractor, DiscoveryConfig};
use crate::error::{Error, Result};
use crate::key_release::KeyReleaseSettings;
use crate::registry::{ClientRegistry, TrustConfig};
use crate::transport::RetryPolicy;

pub const ENV_PREFIX: &str = "CLEANROOM_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    #[default]
    Minimal,
    Ccf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub service_cert_discovery_endpoint: Option<String>,

    /// Comma-separated allow-list of host data
    #[serde(default)]
    pub service_cert_host_data: Vec<String>,

    #[serde(default)]
    pub service_cert_skip_digest_check: bool,

    #[serde(default)]
    pub service_cert_extractor: ExtractorKind,

    pub service_cert_constitution_digest: Option<String>,
    pub service_cert_js_app_bundle_digest: Option<String>,

    /// Static service certificate, exclusive with the discovery endpoint
    pub service_cert_pem: Option<String>,

    pub skr_port: Option<u16>,
    pub identity_port: Option<u16>,

    #[serde(default = "def_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Resends after the first attempt
    #[serde(default = "def_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "def_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "def_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        tracing::debug!("loading settings");
        let _ = dotenvy::dotenv();
        envy::prefixed(ENV_PREFIX)
            .from_env()
            .map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Settings from explicit `(name, value)` pairs, names carrying the prefix
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| Error::Configuration(e.to_string()))
    }

    /// How clients should trust the configured service
    pub fn trust_config(&self) -> Result<TrustConfig> {
        let pem = non_blank(&self.service_cert_pem);
        let endpoint = non_blank(&self.service_cert_discovery_endpoint);

        match (pem, endpoint) {
            (Some(_), Some(_)) => Err(Error::Configuration(
                "Set either a static service certificate or a discovery endpoint, not both".into(),
            )),
            (None, None) => Err(Error::Configuration(
                "Neither a static service certificate nor a discovery endpoint is set".into(),
            )),
            // PEMs passed through env files often carry escaped newlines
            (Some(pem), None) => Ok(TrustConfig::static_pem(pem.replace("\\n", "\n"))),
            (None, Some(endpoint)) => Ok(TrustConfig::Discovery(self.discovery_config(endpoint)?)),
        }
    }

    fn discovery_config(&self, endpoint: &str) -> Result<DiscoveryConfig> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            Error::Configuration(format!("Invalid discovery endpoint {}: {}", endpoint, e))
        })?;

        let host_data: Vec<String> = self
            .service_cert_host_data
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if host_data.is_empty() {
            return Err(Error::Configuration(
                "Discovery requires at least one expected host data value".into(),
            ));
        }

        let extractor = match self.service_cert_extractor {
            ExtractorKind::Minimal => CertificateExtractor::Minimal,
            ExtractorKind::Ccf => {
                let constitution = non_blank(&self.service_cert_constitution_digest);
                let bundle = non_blank(&self.service_cert_js_app_bundle_digest);
                let missing = constitution.is_none() || bundle.is_none();
                if !self.service_cert_skip_digest_check && missing {
                    return Err(Error::Configuration(
                        "CCF discovery requires constitution and JS app bundle digests".into(),
                    ));
                }
                CertificateExtractor::Ccf {
                    constitution_digest: constitution.map(str::to_string),
                    js_app_bundle_digest: bundle.map(str::to_string),
                }
            }
        };

        Ok(DiscoveryConfig::new(endpoint, host_data)
            .with_extractor(extractor)
            .skip_digest_check(self.service_cert_skip_digest_check))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Client registry using the configured per-request timeout
    pub fn client_registry(&self, discovery: Arc<dyn CertificateDiscovery>) -> ClientRegistry {
        ClientRegistry::new(discovery).with_timeout(self.http_timeout())
    }

    pub fn key_release(&self) -> KeyReleaseSettings {
        KeyReleaseSettings {
            skr_port: self.skr_port,
            identity_port: self.identity_port,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn def_http_timeout_secs() -> u64 {
    60
}

fn def_retry_max_attempts() -> u32 {
    5
}

fn def_retry_base_delay_ms() -> u64 {
    1000
}

fn def_retry_max_delay_ms() -> u64 {
    30_000
}
