//! Service certificate discovery through attestation
//!
//! One discovery cycle:
//! 1. Fetch the peer's [`AttestationReportEnvelope`] from its discovery endpoint
//! 2. Verify the hardware evidence (or accept its absence under the allow-all host data)
//! 3. Check the measured host data against the allow-list
//! 4. Check the report data equals the padded SHA-256 of the bound payload
//! 5. Extract the service certificate from the payload

pub mod extractor;

pub use extractor::CertificateExtractor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use crate::attestation::{
    report_data_digest, AttestationReportEnvelope, AttestationVerifier, ALLOW_ALL_HOST_DATA,
};
use crate::error::{Error, Result};
use crate::transport;

/// Default timeout for one discovery round trip
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of one attested peer and the expectations its certificate must meet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryConfig {
    pub certificate_discovery_endpoint: Url,

    /// Allow-list of host data (policy hashes), hex
    pub host_data: Vec<String>,

    pub skip_digest_check: bool,

    pub extractor: CertificateExtractor,
}

impl DiscoveryConfig {
    pub fn new(endpoint: Url, host_data: Vec<String>) -> Self {
        Self {
            certificate_discovery_endpoint: endpoint,
            host_data,
            skip_digest_check: false,
            extractor: CertificateExtractor::Minimal,
        }
    }

    pub fn with_extractor(mut self, extractor: CertificateExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn skip_digest_check(mut self, skip: bool) -> Self {
        self.skip_digest_check = skip;
        self
    }

    /// `<endpoint>/report`, served by application-specific report endpoints
    pub fn report_endpoint(&self) -> Result<Url> {
        let mut url = self.certificate_discovery_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Configuration(format!(
                    "discovery endpoint {} cannot carry a path",
                    self.certificate_discovery_endpoint
                ))
            })?
            .pop_if_empty()
            .push("report");
        Ok(url)
    }

    /// True when the allow-list is exactly the insecure opt-in sentinel
    pub fn allows_unattested(&self) -> bool {
        match self.host_data.as_slice() {
            [only] => only.eq_ignore_ascii_case(ALLOW_ALL_HOST_DATA),
            _ => false,
        }
    }
}

/// Source of freshly verified service certificates
#[async_trait]
pub trait CertificateDiscovery: Send + Sync {
    /// Run one discovery cycle and return the trusted certificate PEM
    async fn discover(&self, config: &DiscoveryConfig) -> Result<String>;
}

/// Discovery over HTTP against the peer's discovery endpoint
pub struct CertDiscovery {
    http: reqwest::Client,
    verifier: Arc<dyn AttestationVerifier>,
}

impl CertDiscovery {
    pub fn new(verifier: Arc<dyn AttestationVerifier>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_DISCOVERY_TIMEOUT)
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build discovery client: {}", e)))?;
        Ok(Self::with_client(http, verifier))
    }

    pub fn with_client(http: reqwest::Client, verifier: Arc<dyn AttestationVerifier>) -> Self {
        Self { http, verifier }
    }

    /// Fetch the peer's envelope without verifying it
    pub async fn fetch(&self, endpoint: &Url) -> Result<AttestationReportEnvelope> {
        tracing::debug!(endpoint = %endpoint, "fetching attestation report");

        let response = self
            .http
            .get(endpoint.clone())
            .send()
            .await
            .map_err(transport::classify)?;

        if !response.status().is_success() {
            return Err(Error::DiscoveryFetch {
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport::classify)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Steps 2 to 5 of discovery over an already fetched envelope
    pub fn verify_envelope(
        &self,
        config: &DiscoveryConfig,
        envelope: &AttestationReportEnvelope,
    ) -> Result<String> {
        let endpoint = &config.certificate_discovery_endpoint;
        let payload = envelope.payload_bytes()?;

        match &envelope.report {
            None => {
                if !config.allows_unattested() {
                    return Err(Error::AttestationMissing(format!(
                        "{} returned no attestation report (platform {:?})",
                        endpoint, envelope.platform
                    )));
                }
                tracing::warn!(
                    endpoint = %endpoint,
                    "accepting unattested peer under the allow-all host data"
                );
            }
            Some(evidence) => {
                let claims = self
                    .verifier
                    .verify(evidence)
                    .map_err(|e| Error::AttestationInvalid(format!("{}: {}", endpoint, e)))?;

                let host_data = claims.host_data();
                if !config
                    .host_data
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(host_data))
                {
                    let expected = config.host_data.join(", ");
                    tracing::warn!(
                        endpoint = %endpoint,
                        observed = %host_data,
                        %expected,
                        "host data not in allow-list"
                    );
                    return Err(Error::HostDataMismatch {
                        observed: host_data.to_string(),
                        expected,
                    });
                }

                let expected = report_data_digest(&payload);
                if !claims.report_data().eq_ignore_ascii_case(&expected) {
                    tracing::warn!(
                        endpoint = %endpoint,
                        observed = %claims.report_data(),
                        %expected,
                        "report data does not bind the payload"
                    );
                    return Err(Error::ReportDataMismatch {
                        observed: claims.report_data().to_string(),
                        expected,
                    });
                }
            }
        }

        let pem = config.extractor.extract(&payload, config.skip_digest_check)?;
        tracing::debug!(endpoint = %endpoint, "service certificate discovered");
        Ok(pem)
    }
}

#[async_trait]
impl CertificateDiscovery for CertDiscovery {
    async fn discover(&self, config: &DiscoveryConfig) -> Result<String> {
        let envelope = self.fetch(&config.certificate_discovery_endpoint).await?;
        self.verify_envelope(config, &envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{AttestationEvidence, Platform, VerifiedClaims};
    use base64::Engine;

    /// Treats the evidence attestation field as `<host data>:<report data>`
    struct ClaimsInEvidence;

    impl AttestationVerifier for ClaimsInEvidence {
        fn verify(&self, evidence: &AttestationEvidence) -> Result<VerifiedClaims> {
            let (host, report) = evidence
                .attestation
                .split_once(':')
                .ok_or_else(|| Error::AttestationInvalid("malformed evidence".into()))?;
            Ok(VerifiedClaims::new(host, report))
        }
    }

    const HOST_DATA: &str = "d3adb33fd3adb33fd3adb33fd3adb33fd3adb33fd3adb33fd3adb33fd3adb33f";
    const CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIBcert\n-----END CERTIFICATE-----\n";

    fn discovery() -> CertDiscovery {
        CertDiscovery::new(Arc::new(ClaimsInEvidence)).unwrap()
    }

    fn config(host_data: &[&str]) -> DiscoveryConfig {
        DiscoveryConfig::new(
            Url::parse("http://peer.invalid:8080/cert").unwrap(),
            host_data.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn payload() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({ "serviceCert": CERT })).unwrap()
    }

    fn attested(host: &str, report_data: &str, payload: &[u8]) -> AttestationReportEnvelope {
        AttestationReportEnvelope {
            platform: Platform::Snp,
            report: Some(AttestationEvidence {
                attestation: format!("{}:{}", host, report_data),
                platform_certificates: String::new(),
                uvm_endorsements: String::new(),
            }),
            report_data_payload: base64::engine::general_purpose::STANDARD.encode(payload),
        }
    }

    #[test]
    fn test_valid_binding_returns_cert() {
        let payload = payload();
        let envelope = attested(HOST_DATA, &report_data_digest(&payload), &payload);
        let pem = discovery().verify_envelope(&config(&[HOST_DATA]), &envelope).unwrap();
        assert_eq!(pem, CERT);
    }

    #[test]
    fn test_host_data_compared_case_insensitively() {
        let payload = payload();
        let envelope = attested(
            &HOST_DATA.to_uppercase(),
            &report_data_digest(&payload),
            &payload,
        );
        assert!(discovery().verify_envelope(&config(&["other", HOST_DATA]), &envelope).is_ok());
    }

    #[test]
    fn test_host_data_mismatch_even_with_good_binding() {
        let payload = payload();
        let envelope = attested("ffff", &report_data_digest(&payload), &payload);
        let err = discovery()
            .verify_envelope(&config(&[HOST_DATA]), &envelope)
            .unwrap_err();
        match err {
            Error::HostDataMismatch { observed, expected } => {
                assert_eq!(observed, "ffff");
                assert_eq!(expected, HOST_DATA);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_report_data_mismatch() {
        let payload = payload();
        let envelope = attested(HOST_DATA, &report_data_digest(b"replayed"), &payload);
        let err = discovery()
            .verify_envelope(&config(&[HOST_DATA]), &envelope)
            .unwrap_err();
        assert_eq!(err.code(), "ReportDataMismatch");
    }

    #[test]
    fn test_unpadded_report_data_is_rejected() {
        let payload = payload();
        let short = report_data_digest(&payload)[..64].to_string();
        let envelope = attested(HOST_DATA, &short, &payload);
        let err = discovery()
            .verify_envelope(&config(&[HOST_DATA]), &envelope)
            .unwrap_err();
        assert_eq!(err.code(), "ReportDataMismatch");
    }

    #[test]
    fn test_verifier_failure_is_attestation_invalid() {
        let payload = payload();
        let mut envelope = attested(HOST_DATA, "", &payload);
        if let Some(report) = envelope.report.as_mut() {
            report.attestation = "garbage".into();
        }
        let err = discovery()
            .verify_envelope(&config(&[HOST_DATA]), &envelope)
            .unwrap_err();
        assert_eq!(err.code(), "AttestationInvalid");
    }

    #[test]
    fn test_missing_report_requires_sentinel() {
        let (envelope, _) = AttestationReportEnvelope::publish(&payload(), None).unwrap();

        let pem = discovery()
            .verify_envelope(&config(&[ALLOW_ALL_HOST_DATA]), &envelope)
            .unwrap();
        assert_eq!(pem, CERT);

        let err = discovery()
            .verify_envelope(&config(&[HOST_DATA]), &envelope)
            .unwrap_err();
        assert_eq!(err.code(), "AttestationMissing");

        // the sentinel must be the only entry
        let err = discovery()
            .verify_envelope(&config(&[ALLOW_ALL_HOST_DATA, HOST_DATA]), &envelope)
            .unwrap_err();
        assert_eq!(err.code(), "AttestationMissing");
    }

    #[test]
    fn test_repeated_verification_is_identical() {
        let payload = payload();
        let envelope = attested(HOST_DATA, &report_data_digest(&payload), &payload);
        let discovery = discovery();
        let first = discovery.verify_envelope(&config(&[HOST_DATA]), &envelope).unwrap();
        let second = discovery.verify_envelope(&config(&[HOST_DATA]), &envelope).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_report_endpoint() {
        let cfg = config(&[HOST_DATA]);
        assert_eq!(
            cfg.report_endpoint().unwrap().as_str(),
            "http://peer.invalid:8080/cert/report"
        );

        let root = DiscoveryConfig::new(Url::parse("http://peer.invalid/").unwrap(), vec![]);
        assert_eq!(root.report_endpoint().unwrap().as_str(), "http://peer.invalid/report");
    }
}
