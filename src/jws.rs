//! Account key handling and signed request envelopes (JWS).
//!
//! Every authenticated ACME request is a flattened JWS JSON envelope
//! (RFC 7515) signed with the account key; challenges bind to the same
//! key through its JWK thumbprint (RFC 7638).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair as _, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{AcmeError, AcmeResult};

/// The ACME account key (ES256).
///
/// Signs every authenticated request and anchors each challenge's key
/// authorization through its JWK thumbprint.
pub struct AccountKey {
    rng: SystemRandom,
    key: EcdsaKeyPair,
    pkcs8_der: Vec<u8>,
    thumbprint: String,
}

impl AccountKey {
    /// Generate a fresh P-256 account key.
    pub fn generate() -> AcmeResult<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| AcmeError::Crypto("failed to generate account key".to_string()))?;
        Self::from_pkcs8_der(pkcs8.as_ref().to_vec())
    }

    /// Load an account key from its PKCS#8 DER encoding.
    pub fn from_pkcs8_der(pkcs8_der: Vec<u8>) -> AcmeResult<Self> {
        let rng = SystemRandom::new();
        let key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8_der, &rng)
            .map_err(|err| AcmeError::Crypto(format!("unusable account key: {}", err)))?;
        let thumbprint = jwk_thumbprint(&key)?;
        Ok(Self {
            rng,
            key,
            pkcs8_der,
            thumbprint,
        })
    }

    /// PKCS#8 DER encoding of the private key, for persistence by the caller.
    pub fn to_pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    /// Base64url SHA-256 thumbprint of the canonical public JWK.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Wrap `payload` in a signed envelope carrying `nonce` and `url` in
    /// the protected header.
    pub(crate) fn signed_json(&self, payload: &Value, nonce: &str, url: &str) -> AcmeResult<Vec<u8>> {
        let protected = Protected {
            alg: "ES256",
            jwk: Jwk::new(&self.key),
            nonce,
            url,
        };
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected)?);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);

        let signing_input = format!("{}.{}", protected, payload);
        let signature = self
            .key
            .sign(&self.rng, signing_input.as_bytes())
            .map_err(|_| AcmeError::Crypto("signing the request envelope failed".to_string()))?;

        let envelope = JoseJson {
            protected,
            payload,
            signature: URL_SAFE_NO_PAD.encode(signature.as_ref()),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey")
            .field("thumbprint", &self.thumbprint)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct Protected<'a> {
    alg: &'static str,
    jwk: Jwk,
    nonce: &'a str,
    url: &'a str,
}

/// Public half of the account key as a JWK (RFC 7517).
#[derive(Serialize)]
struct Jwk {
    alg: &'static str,
    crv: &'static str,
    kty: &'static str,
    #[serde(rename = "use")]
    usage: &'static str,
    x: String,
    y: String,
}

impl Jwk {
    fn new(key: &EcdsaKeyPair) -> Self {
        // Uncompressed point: 0x04 || X (32 bytes) || Y (32 bytes).
        let (x, y) = key.public_key().as_ref()[1..].split_at(32);
        Self {
            alg: "ES256",
            crv: "P-256",
            kty: "EC",
            usage: "sig",
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
        }
    }
}

/// Thumbprint form of the JWK: required members only, in lexicographic
/// order (RFC 7638).
#[derive(Serialize)]
struct JwkThumb<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
    y: &'a str,
}

fn jwk_thumbprint(key: &EcdsaKeyPair) -> AcmeResult<String> {
    let jwk = Jwk::new(key);
    let canonical = serde_json::to_vec(&JwkThumb {
        crv: jwk.crv,
        kty: jwk.kty,
        x: &jwk.x,
        y: &jwk.y,
    })?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical)))
}

#[derive(Serialize)]
struct JoseJson {
    protected: String,
    payload: String,
    signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn is_base64url(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_generate_key() {
        let key = AccountKey::generate().unwrap();
        assert!(!key.thumbprint().is_empty());
        assert!(is_base64url(key.thumbprint()));
        assert!(!key.to_pkcs8_der().is_empty());
    }

    #[test]
    fn test_thumbprint_stable_across_reload() {
        let key = AccountKey::generate().unwrap();
        let reloaded = AccountKey::from_pkcs8_der(key.to_pkcs8_der().to_vec()).unwrap();
        assert_eq!(key.thumbprint(), reloaded.thumbprint());
    }

    #[test]
    fn test_distinct_keys_have_distinct_thumbprints() {
        let a = AccountKey::generate().unwrap();
        let b = AccountKey::generate().unwrap();
        assert_ne!(a.thumbprint(), b.thumbprint());
    }

    #[test]
    fn test_signed_envelope_shape() {
        let key = AccountKey::generate().unwrap();
        let body = key
            .signed_json(
                &json!({"resource": "new-authz"}),
                "nonce-123",
                "https://ca.example/acme/new-authz",
            )
            .unwrap();

        let envelope: Value = serde_json::from_slice(&body).unwrap();
        let protected = envelope["protected"].as_str().unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(protected).unwrap();
        let header: Value = serde_json::from_slice(&decoded).unwrap();

        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["nonce"], "nonce-123");
        assert_eq!(header["url"], "https://ca.example/acme/new-authz");
        assert_eq!(header["jwk"]["kty"], "EC");
        assert_eq!(header["jwk"]["crv"], "P-256");

        let payload = envelope["payload"].as_str().unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let payload: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(payload["resource"], "new-authz");

        assert!(!envelope["signature"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_debug_does_not_leak_key_material() {
        let key = AccountKey::generate().unwrap();
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("thumbprint"));
        assert!(!rendered.contains("pkcs8"));
    }
}
