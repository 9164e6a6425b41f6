//! Service certificate extraction from the attested payload

use serde::Deserialize;

use crate::error::{Error, Result};

/// How the bound payload is interpreted once its digest has been verified
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CertificateExtractor {
    /// Payload is `{"serviceCert": "<PEM>"}`
    Minimal,

    /// CCF network payload carrying the governance and application digests
    /// alongside the service certificate
    Ccf {
        constitution_digest: Option<String>,
        js_app_bundle_digest: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MinimalPayload {
    #[serde(default)]
    service_cert: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CcfPayload {
    #[serde(default)]
    service_cert: Option<String>,

    #[serde(default)]
    constitution_digest: Option<String>,

    #[serde(default)]
    js_app_bundle_digest: Option<String>,
}

impl CertificateExtractor {
    /// CCF extractor expecting the given `sha256:<hex>` digests
    pub fn ccf(
        constitution_digest: impl Into<String>,
        js_app_bundle_digest: impl Into<String>,
    ) -> Self {
        Self::Ccf {
            constitution_digest: Some(constitution_digest.into()),
            js_app_bundle_digest: Some(js_app_bundle_digest.into()),
        }
    }

    /// Parse `payload` and return the embedded PEM certificate
    pub fn extract(&self, payload: &[u8], skip_digest_check: bool) -> Result<String> {
        match self {
            Self::Minimal => {
                let parsed: MinimalPayload = serde_json::from_slice(payload)?;
                non_empty(parsed.service_cert)
            }
            Self::Ccf {
                constitution_digest,
                js_app_bundle_digest,
            } => {
                let parsed: CcfPayload = serde_json::from_slice(payload)?;

                if !skip_digest_check {
                    check_digest(
                        parsed.constitution_digest.as_deref(),
                        constitution_digest.as_deref(),
                        |observed, expected| Error::ConstitutionDigestMismatch {
                            observed,
                            expected,
                        },
                    )?;
                    check_digest(
                        parsed.js_app_bundle_digest.as_deref(),
                        js_app_bundle_digest.as_deref(),
                        |observed, expected| Error::AppBundleDigestMismatch {
                            observed,
                            expected,
                        },
                    )?;
                }

                non_empty(parsed.service_cert)
            }
        }
    }
}

fn non_empty(cert: Option<String>) -> Result<String> {
    match cert {
        Some(pem) if !pem.trim().is_empty() => Ok(pem),
        _ => Err(Error::ServiceCertMissing),
    }
}

fn check_digest(
    observed: Option<&str>,
    expected: Option<&str>,
    mismatch: impl FnOnce(String, String) -> Error,
) -> Result<()> {
    match (observed, expected) {
        (Some(observed), Some(expected)) if observed == expected => Ok(()),
        (observed, expected) => {
            let observed = observed.unwrap_or("<absent>").to_string();
            let expected = expected.unwrap_or("<unset>").to_string();
            tracing::warn!(%observed, %expected, "payload digest does not match expectation");
            Err(mismatch(observed, expected))
        }
    }
}
