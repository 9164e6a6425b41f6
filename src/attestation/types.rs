//! Wire and claim types for attestation-bound certificate discovery

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Platform a peer reports it is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// AMD SEV-SNP hardware isolation
    Snp,

    /// Non-attested development deployment
    Virtual,
}

/// Opaque attestation evidence as published by the peer
///
/// All three fields are base64 strings handed through to the
/// [`AttestationVerifier`](super::AttestationVerifier) untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationEvidence {
    pub attestation: String,

    #[serde(default)]
    pub platform_certificates: String,

    #[serde(default)]
    pub uvm_endorsements: String,
}

/// Response body of the certificate discovery endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReportEnvelope {
    pub platform: Platform,

    /// Absent only on virtual deployments
    #[serde(default)]
    pub report: Option<AttestationEvidence>,

    /// Base64 of the bytes whose digest is bound into the report
    pub report_data_payload: String,
}

impl AttestationReportEnvelope {
    /// Decode the bound payload bytes
    pub fn payload_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.report_data_payload)?)
    }
}

/// Measurement claims produced by a successful attestation verification
///
/// Only verifier implementations build these; discovery compares them
/// against its expectations but never fabricates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    host_data: String,
    report_data: String,
}

impl VerifiedClaims {
    pub fn new(host_data: impl Into<String>, report_data: impl Into<String>) -> Self {
        Self {
            host_data: host_data.into(),
            report_data: report_data.into(),
        }
    }

    /// Hex digest of the measured host data (policy hash)
    pub fn host_data(&self) -> &str {
        &self.host_data
    }

    /// Hex of the 64-byte report data field
    pub fn report_data(&self) -> &str {
        &self.report_data
    }
}

/// Output of evidence generation on the attested peer
#[derive(Debug, Clone)]
pub struct GeneratedEvidence {
    pub evidence: AttestationEvidence,

    /// PEM public key generated alongside the report
    pub public_key: String,

    /// PEM private key matching `public_key`
    pub private_key: String,
}
