//! Run one certificate discovery against the configured peer
//!
//! ```text
//! CLEANROOM_SERVICE_CERT_DISCOVERY_ENDPOINT=http://localhost:8081/report \
//! CLEANROOM_SERVICE_CERT_HOST_DATA=73973b78d70cc68353426de188db5dfc57e5b766e399935fb73a61127ea26d20 \
//! cargo run --example discover
//! ```

use std::sync::Arc;

use cleanroom_trust::attestation::{AttestationEvidence, VerifiedClaims};
use cleanroom_trust::discovery::CertificateDiscovery;
use cleanroom_trust::{
    logging, tls, AttestationVerifier, CertDiscovery, Error, Settings, TrustConfig,
};

/// Accepts only peers running without hardware evidence (allow-all host data)
struct NoHardwareVerifier;

impl AttestationVerifier for NoHardwareVerifier {
    fn verify(&self, _evidence: &AttestationEvidence) -> cleanroom_trust::Result<VerifiedClaims> {
        Err(Error::AttestationInvalid(
            "no hardware attestation verifier is linked into this demo".into(),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let settings = Settings::from_env()?;
    let config = match settings.trust_config()? {
        TrustConfig::Discovery(config) => config,
        other => anyhow::bail!("discovery endpoint not configured (trust is {:?})", other),
    };

    let discovery = CertDiscovery::new(Arc::new(NoHardwareVerifier))?;
    let pem = discovery.discover(&config).await?;

    println!("endpoint:    {}", config.certificate_discovery_endpoint);
    println!("fingerprint: {}", tls::pem_fingerprint(&pem)?);
    println!("{}", pem);
    Ok(())
}
