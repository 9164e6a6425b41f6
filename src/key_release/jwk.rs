//! RSA keys in JWK form, as returned by key release

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::{BigUint, Oaep, RsaPrivateKey};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Private RSA JWK; only the members needed to rebuild the key
#[derive(Debug, Deserialize)]
pub struct RsaJwk {
    pub kty: String,
    n: String,
    e: String,
    d: Option<String>,
    p: Option<String>,
    q: Option<String>,
}

impl RsaJwk {
    pub fn parse(json: &str) -> Result<Self> {
        let jwk: RsaJwk = serde_json::from_str(json)?;
        // "RSA-HSM" for keys released from a managed HSM
        if !jwk.kty.starts_with("RSA") {
            return Err(Error::Crypto(format!("Unsupported key type {}", jwk.kty)));
        }
        Ok(jwk)
    }

    pub fn to_private_key(&self) -> Result<RsaPrivateKey> {
        let n = decode_uint("n", &self.n)?;
        let e = decode_uint("e", &self.e)?;
        let d = decode_uint("d", required("d", &self.d)?)?;
        let p = decode_uint("p", required("p", &self.p)?)?;
        let q = decode_uint("q", required("q", &self.q)?)?;

        let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| Error::Crypto(format!("Invalid RSA key: {}", e)))?;
        key.validate()
            .map_err(|e| Error::Crypto(format!("Invalid RSA key: {}", e)))?;
        Ok(key)
    }
}

/// RSA-OAEP (SHA-256) decryption of a wrapped secret
pub fn unwrap_oaep_sha256(key: &RsaPrivateKey, wrapped: &[u8]) -> Result<Vec<u8>> {
    key.decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|e| Error::Crypto(format!("Failed to unwrap secret: {}", e)))
}

fn required<'a>(member: &str, value: &'a Option<String>) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| Error::Crypto(format!("JWK is missing private member {}", member)))
}

fn decode_uint(member: &str, value: &str) -> Result<BigUint> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| Error::Crypto(format!("Bad base64url in JWK member {}: {}", member, e)))?;
    Ok(BigUint::from_bytes_be(&bytes))
}
