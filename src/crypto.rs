//! Key and certificate generation for challenge proof material.

use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair,
    PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use x509_parser::extensions::GeneralName;

use crate::error::{AcmeError, AcmeResult};

/// Key algorithm used for freshly generated challenge keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeySpec {
    /// ECDSA over P-256.
    #[default]
    EcP256,
    /// ECDSA over P-384.
    EcP384,
}

/// Generate a key pair for the requested algorithm.
pub(crate) fn generate_key_pair(spec: KeySpec) -> AcmeResult<KeyPair> {
    let alg = match spec {
        KeySpec::EcP256 => &PKCS_ECDSA_P256_SHA256,
        KeySpec::EcP384 => &PKCS_ECDSA_P384_SHA384,
    };
    KeyPair::generate_for(alg)
        .map_err(|err| AcmeError::Crypto(format!("key generation failed: {}", err)))
}

/// Self-signed certificate in PEM: `subject` as common name, `sans` as
/// DNS subject alternative names, valid for `valid_days` from now.
pub(crate) fn self_signed(
    subject: &str,
    sans: &[String],
    key: &KeyPair,
    valid_days: i64,
) -> AcmeResult<String> {
    let params = base_params(subject, sans, valid_days)?;
    let cert = params
        .self_signed(key)
        .map_err(|err| AcmeError::Crypto(format!("self-signing failed: {}", err)))?;
    Ok(cert.pem())
}

/// Variant for TLS-ALPN-01: the certificate covers `domain` and carries
/// the critical `acmeIdentifier` extension, whose value is the DER octet
/// string of the SHA-256 of the key authorization.
pub(crate) fn self_signed_acme_identifier(
    domain: &str,
    key_authz: &str,
    key: &KeyPair,
    valid_days: i64,
) -> AcmeResult<String> {
    let digest = Sha256::digest(key_authz.as_bytes());
    let mut params = base_params(domain, &[domain.to_string()], valid_days)?;
    params
        .custom_extensions
        .push(CustomExtension::new_acme_identifier(digest.as_slice()));
    let cert = params
        .self_signed(key)
        .map_err(|err| AcmeError::Crypto(format!("self-signing failed: {}", err)))?;
    Ok(cert.pem())
}

fn base_params(subject: &str, sans: &[String], valid_days: i64) -> AcmeResult<CertificateParams> {
    let mut params = CertificateParams::new(sans.to_vec())
        .map_err(|err| AcmeError::Crypto(format!("bad certificate name: {}", err)))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject);
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(valid_days);
    Ok(params)
}

/// Lowercase hex SHA-256 of `data`.
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Whether the certificate covers `domain` via a SAN dNSName, falling
/// back to the subject common name when no SAN extension is present.
pub(crate) fn cert_covers_domain(cert_pem: &[u8], domain: &str) -> AcmeResult<bool> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem)
        .map_err(|err| AcmeError::Crypto(format!("unreadable certificate PEM: {:?}", err)))?;
    let cert = pem
        .parse_x509()
        .map_err(|err| AcmeError::Crypto(format!("unreadable certificate: {}", err)))?;

    let san = cert
        .subject_alternative_name()
        .map_err(|err| AcmeError::Crypto(format!("bad subjectAltName extension: {}", err)))?;
    if let Some(san) = san {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                if name_matches(dns, domain) {
                    return Ok(true);
                }
            }
        }
        return Ok(false);
    }

    for cn in cert.subject().iter_common_name() {
        if let Ok(cn) = cn.as_str() {
            if name_matches(cn, domain) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

// *.example.com matches www.example.com but not example.com or
// a.b.example.com.
fn name_matches(name: &str, domain: &str) -> bool {
    let name = name.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();

    if name == domain {
        return true;
    }
    if let Some(base) = name.strip_prefix("*.") {
        let suffix = format!(".{}", base);
        if let Some(prefix) = domain.strip_suffix(&suffix) {
            return !prefix.is_empty() && !prefix.contains('.');
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        // Reference vector for "hello".
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches("example.com", "example.com"));
        assert!(name_matches("Example.COM", "example.com"));
        assert!(!name_matches("example.com", "other.com"));
        assert!(!name_matches("example.com", "sub.example.com"));

        assert!(name_matches("*.example.com", "www.example.com"));
        assert!(name_matches("*.example.com", "api.example.com"));
        assert!(!name_matches("*.example.com", "example.com"));
        assert!(!name_matches("*.example.com", "a.b.example.com"));
    }

    #[test]
    fn test_self_signed_covers_san() {
        let key = generate_key_pair(KeySpec::EcP256).unwrap();
        let pem = self_signed(
            "example.com",
            &["alt.example.net".to_string()],
            &key,
            7,
        )
        .unwrap();

        assert!(cert_covers_domain(pem.as_bytes(), "alt.example.net").unwrap());
        // SAN is present, so the common name no longer decides.
        assert!(!cert_covers_domain(pem.as_bytes(), "example.com").unwrap());
        assert!(!cert_covers_domain(pem.as_bytes(), "other.com").unwrap());
    }

    #[test]
    fn test_p384_keys_work_too() {
        let key = generate_key_pair(KeySpec::EcP384).unwrap();
        let pem = self_signed("example.com", &["example.com".to_string()], &key, 7).unwrap();
        assert!(cert_covers_domain(pem.as_bytes(), "example.com").unwrap());
    }

    #[test]
    fn test_acme_identifier_extension() {
        let key = generate_key_pair(KeySpec::EcP256).unwrap();
        let pem = self_signed_acme_identifier("example.com", "TOK.THP", &key, 7).unwrap();

        assert!(cert_covers_domain(pem.as_bytes(), "example.com").unwrap());

        let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).unwrap();
        let cert = parsed.parse_x509().unwrap();
        let ext = cert
            .extensions()
            .iter()
            .find(|ext| ext.oid.to_id_string() == "1.3.6.1.5.5.7.1.31")
            .expect("acmeIdentifier extension present");

        assert!(ext.critical);
        // DER octet string: 0x04 0x20 followed by the 32-byte digest.
        let digest = Sha256::digest(b"TOK.THP");
        assert_eq!(ext.value[0], 0x04);
        assert_eq!(ext.value[1], 0x20);
        assert_eq!(&ext.value[2..], digest.as_slice());
    }

    #[test]
    fn test_key_spec_serde() {
        let spec: KeySpec = serde_json::from_str("\"ec-p256\"").unwrap();
        assert_eq!(spec, KeySpec::EcP256);
        let spec: KeySpec = serde_json::from_str("\"ec-p384\"").unwrap();
        assert_eq!(spec, KeySpec::EcP384);
        assert_eq!(KeySpec::default(), KeySpec::EcP256);
    }
}
