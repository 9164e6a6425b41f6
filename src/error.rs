//! Error types for attested trust establishment

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Certificate discovery endpoint returned HTTP {status}")]
    DiscoveryFetch { status: u16 },

    #[error("Attestation missing: {0}")]
    AttestationMissing(String),

    #[error("Attestation verification failed: {0}")]
    AttestationInvalid(String),

    #[error("Host data mismatch: observed {observed}, expected one of [{expected}]")]
    HostDataMismatch { observed: String, expected: String },

    #[error("Report data mismatch: observed {observed}, expected {expected}")]
    ReportDataMismatch { observed: String, expected: String },

    #[error("Report data payload does not carry a service certificate")]
    ServiceCertMissing,

    #[error("Constitution digest mismatch: observed {observed}, expected {expected}")]
    ConstitutionDigestMismatch { observed: String, expected: String },

    #[error("JS application bundle digest mismatch: observed {observed}, expected {expected}")]
    AppBundleDigestMismatch { observed: String, expected: String },

    #[error("TLS trust failure: {0}")]
    TlsTrustFailure(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

impl Error {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Http(_) => "HttpError",
            Error::Json(_) => "JsonError",
            Error::Base64(_) => "Base64Error",
            Error::Io(_) => "IoError",
            Error::Configuration(_) => "ConfigurationError",
            Error::DiscoveryFetch { .. } => "DiscoveryFetchFailed",
            Error::AttestationMissing(_) => "AttestationMissing",
            Error::AttestationInvalid(_) => "AttestationInvalid",
            Error::HostDataMismatch { .. } => "HostDataMismatch",
            Error::ReportDataMismatch { .. } => "ReportDataMismatch",
            Error::ServiceCertMissing => "ServiceCertMissing",
            Error::ConstitutionDigestMismatch { .. } => "ConstitutionDigestMismatch",
            Error::AppBundleDigestMismatch { .. } => "AppBundleDigestMismatch",
            Error::TlsTrustFailure(_) => "TransportTlsFailure",
            Error::TransientNetwork(_) => "TransientNetworkError",
            Error::DeadlineExceeded => "DeadlineExceeded",
            Error::Api { .. } => "ApiError",
            Error::Tls(_) => "TlsError",
            Error::Crypto(_) => "CryptoError",
        }
    }

    /// Whether the retry layer may resend after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }

    pub fn is_tls_trust_failure(&self) -> bool {
        matches!(self, Error::TlsTrustFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
