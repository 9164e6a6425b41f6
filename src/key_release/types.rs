//! Wire and request types for secure key release

use serde::{Deserialize, Serialize};

/// Identifies a wrapped secret and the key that unwraps it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnwrapSecretRequest {
    pub client_id: String,
    pub tenant_id: String,

    /// Name of the wrapped secret (DEK) in its key vault
    pub kid: String,

    /// Key vault holding the wrapped secret
    pub akv_endpoint: String,

    pub kek: KekDescriptor,
}

/// Key-encrypting key released only after attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KekDescriptor {
    pub kid: String,

    /// Vault or managed HSM holding the KEK
    pub akv_endpoint: String,

    /// Attestation service the key-release policy trusts
    pub maa_endpoint: String,

    /// Token for the KEK store, fetched on demand when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct KeyReleaseRequest<'a> {
    pub maa_endpoint: &'a str,
    pub akv_endpoint: &'a str,
    pub kid: &'a str,
    pub access_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyReleaseResponse {
    /// Released key as a JWK JSON document
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SecretBundle {
    /// Base64 of the wrapped secret
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(rename = "accessToken", alias = "access_token")]
    pub access_token: String,
}
