//! Attestation contract shared by the discovering client and the attested peer
//!
//! ## Report-data binding
//! The peer hashes the payload it wants to vouch for (its service certificate and
//! companion digests) with SHA-256 and places the digest in the 64-byte report data
//! field of its hardware report. The client recomputes the digest over the payload it
//! received and compares it with the report data returned by the verifier.
//!
//! Hardware signature verification itself is delegated to an [`AttestationVerifier`].

pub mod types;

pub use types::{
    AttestationEvidence, AttestationReportEnvelope, GeneratedEvidence, Platform, VerifiedClaims,
};

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Host data value that opts a non-attested (virtual) peer into being trusted
pub const ALLOW_ALL_HOST_DATA: &str =
    "73973b78d70cc68353426de188db5dfc57e5b766e399935fb73a61127ea26d20";

/// Width of the report data field in hex characters (64 bytes)
pub const REPORT_DATA_HEX_LEN: usize = 128;

/// Verifies hardware attestation evidence
pub trait AttestationVerifier: Send + Sync {
    /// Check the evidence against its platform certificates and endorsements
    /// and return the measured claims.
    fn verify(&self, evidence: &AttestationEvidence) -> Result<VerifiedClaims>;
}

/// Produces hardware evidence binding caller-supplied data (peer side)
pub trait EvidenceGenerator: Send + Sync {
    fn generate_evidence(&self, bound_data: &[u8]) -> Result<GeneratedEvidence>;
}

/// SHA-256 of `payload`, hex-encoded and right-padded with `'0'` to the report data width
pub fn report_data_digest(payload: &[u8]) -> String {
    let mut digest = hex::encode(Sha256::digest(payload));
    while digest.len() < REPORT_DATA_HEX_LEN {
        digest.push('0');
    }
    digest
}

impl AttestationReportEnvelope {
    /// Build the envelope a peer serves from its discovery endpoint.
    ///
    /// With a generator the payload digest is bound into fresh SNP evidence;
    /// without one the envelope is published for the virtual platform with no report.
    pub fn publish(
        payload: &[u8],
        generator: Option<&dyn EvidenceGenerator>,
    ) -> Result<(Self, Option<GeneratedEvidence>)> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);

        let Some(generator) = generator else {
            let envelope = Self {
                platform: Platform::Virtual,
                report: None,
                report_data_payload: encoded,
            };
            return Ok((envelope, None));
        };

        let bound = Sha256::digest(payload);
        let generated = generator.generate_evidence(&bound)?;
        let envelope = Self {
            platform: Platform::Snp,
            report: Some(generated.evidence.clone()),
            report_data_payload: encoded,
        };
        Ok((envelope, Some(generated)))
    }
}
