//! # Cleanroom Trust
//!
//! Attestation-anchored TLS trust between services running in confidential
//! environments, where peers present self-issued certificates instead of ones
//! from a public CA.
//!
//! ## Discovery
//!
//! A peer publishes an attestation report whose report data is the SHA-256 of a
//! payload carrying its service certificate. [`CertDiscovery`]:
//! - Fetches the report envelope from the peer's discovery endpoint
//! - Verifies the evidence through an [`AttestationVerifier`]
//! - Checks the measured host data against an allow-list
//! - Checks the report data binds exactly this payload
//! - Extracts the certificate (and, for CCF, checks the governance digests)
//!
//! ## Pinning and renewal
//!
//! The verified certificate becomes the only trust anchor of a
//! [`PinnedTlsValidator`]. When the peer restarts with a new certificate the next
//! handshake fails, the client re-runs discovery once, swaps the pinned roots and
//! resends the request.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cleanroom_trust::{CertDiscovery, ClientRegistry, DiscoveryConfig, RetryPolicy, TrustConfig};
//!
//! #[tokio::main]
//! async fn main() -> cleanroom_trust::Result<()> {
//!     let discovery = Arc::new(CertDiscovery::new(Arc::new(MyVerifier))?);
//!     let registry = ClientRegistry::new(discovery);
//!
//!     let endpoint = "https://ledger.internal:8080/".parse().unwrap();
//!     let trust = TrustConfig::Discovery(DiscoveryConfig::new(
//!         "http://ledger.internal:8081/report".parse().unwrap(),
//!         vec![EXPECTED_HOST_DATA.into()],
//!     ));
//!
//!     let client = registry.get_or_create(&endpoint, &trust, &RetryPolicy::default()).await?;
//!     let status = client.get("/node/network").await?.status();
//!     println!("{status}");
//!     Ok(())
//! }
//! ```

pub mod attestation;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod key_release;
pub mod logging;
pub mod registry;
pub mod tls;
pub mod transport;

pub use attestation::{AttestationVerifier, EvidenceGenerator, ALLOW_ALL_HOST_DATA};
pub use client::AttestedClient;
pub use config::Settings;
pub use discovery::{CertDiscovery, CertificateDiscovery, CertificateExtractor, DiscoveryConfig};
pub use error::{Error, Result};
pub use key_release::{KekDescriptor, KeyReleaseSettings, SecureKeyRelease, UnwrapSecretRequest};
pub use registry::{ClientRegistry, TrustConfig};
pub use tls::PinnedTlsValidator;
pub use transport::{RenewalHook, RetryPolicy};
