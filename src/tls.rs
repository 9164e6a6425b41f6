//! Pinned TLS validation against attestation-discovered roots
//!
//! Peers present self-issued certificates that no public CA vouches for. After
//! discovery has verified a service certificate, the [`PinnedTlsValidator`] trusts
//! exactly that certificate (and anything it issued) as a root, alongside the normal
//! public-CA path for non-attested collaborators.
//!
//! The trusted set lives behind an atomic pointer. Handshakes load one immutable
//! [`TrustedRoots`] snapshot and renewal swaps in a whole new one, so no handshake ever
//! sees a partially replaced set.

use std::sync::Arc;

use arc_swap::ArcSwap;
use der::Encode;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Crypto provider used for every TLS configuration built by this crate
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Compute SHA256 fingerprint of a certificate's public key
///
/// This hashes the full SPKI (SubjectPublicKeyInfo) DER encoding, matching
/// `openssl pkey -pubin -outform DER | sha256sum`.
pub fn cert_pubkey_fingerprint(cert_der: &CertificateDer<'_>) -> Result<String> {
    use der::Decode;
    use x509_cert::Certificate;

    let cert = Certificate::from_der(cert_der.as_ref())
        .map_err(|e| Error::Tls(format!("Failed to parse certificate: {}", e)))?;

    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::Tls(format!("Failed to encode SPKI: {}", e)))?;

    Ok(hex::encode(Sha256::digest(&spki_der)))
}

/// SPKI fingerprint of the first certificate in a PEM bundle
pub fn pem_fingerprint(pem: &str) -> Result<String> {
    let certs = parse_pem_certificates(pem)?;
    cert_pubkey_fingerprint(&certs[0])
}

/// Parse every `CERTIFICATE` block of a PEM bundle
pub fn parse_pem_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let blocks = pem::parse_many(pem.as_bytes())
        .map_err(|e| Error::Tls(format!("Failed to parse PEM: {}", e)))?;

    let certs: Vec<_> = blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();

    if certs.is_empty() {
        return Err(Error::Tls("PEM contains no certificates".into()));
    }
    Ok(certs)
}

/// Immutable snapshot of the roots pinned for one peer
#[derive(Debug)]
pub struct TrustedRoots {
    certificates: Vec<String>,
    anchors: Vec<CertificateDer<'static>>,
    verifier: Option<Arc<WebPkiServerVerifier>>,
}

impl TrustedRoots {
    pub fn empty() -> Self {
        Self {
            certificates: Vec::new(),
            anchors: Vec::new(),
            verifier: None,
        }
    }

    /// Build a snapshot trusting only `pems`; the system trust store is not consulted
    pub fn from_pems(pems: &[String], provider: Arc<CryptoProvider>) -> Result<Self> {
        if pems.is_empty() {
            return Ok(Self::empty());
        }

        let mut store = RootCertStore::empty();
        let mut anchors = Vec::new();
        for pem in pems {
            for der in parse_pem_certificates(pem)? {
                store
                    .add(der.clone())
                    .map_err(|e| Error::Tls(format!("Invalid pinned root: {}", e)))?;
                anchors.push(der);
            }
        }

        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(store), provider)
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build pinned verifier: {}", e)))?;

        Ok(Self {
            certificates: pems.to_vec(),
            anchors,
            verifier: Some(verifier),
        })
    }

    /// PEM certificates in this snapshot
    pub fn certificates(&self) -> &[String] {
        &self.certificates
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Build the presented chain up to one of these roots
    ///
    /// A peer may present a pinned certificate itself as the leaf. webpki refuses a
    /// CA certificate in that position, so an exact DER match is accepted here as
    /// long as it is within its validity period.
    pub fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        if self.anchors.iter().any(|anchor| anchor.as_ref() == end_entity.as_ref()) {
            return check_validity(end_entity, now);
        }

        match &self.verifier {
            Some(verifier) => verifier
                .verify_server_cert(end_entity, intermediates, server_name, &[], now)
                .map(|_| ()),
            None => Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)),
        }
    }
}

fn check_validity(
    cert_der: &CertificateDer<'_>,
    now: UnixTime,
) -> std::result::Result<(), rustls::Error> {
    use der::Decode;
    use x509_cert::Certificate;

    let cert = Certificate::from_der(cert_der.as_ref())
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;
    let validity = &cert.tbs_certificate.validity;
    let now = now.as_secs();

    if now < validity.not_before.to_unix_duration().as_secs() {
        return Err(rustls::Error::InvalidCertificate(CertificateError::NotValidYet));
    }
    if now > validity.not_after.to_unix_duration().as_secs() {
        return Err(rustls::Error::InvalidCertificate(CertificateError::Expired));
    }
    Ok(())
}

/// Server certificate verifier pinned to the currently trusted roots
///
/// This verifier:
/// 1. Accepts chains the public web PKI already validates
/// 2. Otherwise builds the chain against the pinned roots only
#[derive(Debug)]
pub struct PinnedTlsValidator {
    roots: ArcSwap<TrustedRoots>,
    public: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    skip_verification: bool,
}

impl PinnedTlsValidator {
    /// Create a validator pinned to `initial` (may be empty: fail closed)
    pub fn new(initial: &[String]) -> Result<Self> {
        Self::build(initial, false)
    }

    /// Accept any server certificate. Test deployments only.
    pub fn insecure_skip_verify() -> Result<Self> {
        Self::build(&[], true)
    }

    fn build(initial: &[String], skip_verification: bool) -> Result<Self> {
        let provider = crypto_provider();

        let root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let public =
            WebPkiServerVerifier::builder_with_provider(Arc::new(root_store), provider.clone())
                .build()
                .map_err(|e| Error::Tls(format!("Failed to build verifier: {}", e)))?;

        let roots = TrustedRoots::from_pems(initial, provider.clone())?;

        Ok(Self {
            roots: ArcSwap::from_pointee(roots),
            public,
            provider,
            skip_verification,
        })
    }

    pub fn provider(&self) -> Arc<CryptoProvider> {
        self.provider.clone()
    }

    /// Current snapshot of the pinned roots
    pub fn snapshot(&self) -> Arc<TrustedRoots> {
        self.roots.load_full()
    }

    /// Atomically replace the pinned roots with `pems`
    ///
    /// The new snapshot is fully built before it is published; on error the
    /// previous roots stay in place.
    pub fn replace(&self, pems: &[String]) -> Result<()> {
        let next = TrustedRoots::from_pems(pems, self.provider.clone())?;
        self.roots.store(Arc::new(next));
        tracing::debug!(roots = pems.len(), "pinned roots replaced");
        Ok(())
    }
}

impl ServerCertVerifier for PinnedTlsValidator {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if self
            .public
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .is_ok()
        {
            return Ok(ServerCertVerified::assertion());
        }

        let roots = self.roots.load();
        match roots.verify(end_entity, intermediates, server_name, now) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(e) if self.skip_verification => {
                tracing::warn!(error = %e, "certificate verification skipped");
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    server = ?server_name,
                    pinned_roots = roots.certificates().len(),
                    "server certificate does not chain to pinned roots"
                );
                Err(e)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Create a reqwest client whose TLS connections are validated by `validator`
pub fn create_pinned_client(
    validator: Arc<PinnedTlsValidator>,
    timeout: std::time::Duration,
) -> Result<reqwest::Client> {
    let config = rustls::ClientConfig::builder_with_provider(validator.provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("Failed to select TLS versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(validator)
        .with_no_client_auth();

    reqwest::Client::builder()
        .use_preconfigured_tls(config)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build HTTP client: {}", e)))
}
