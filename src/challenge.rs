//! Challenge selection and proof-material preparation.
//!
//! Each preparer follows the same scaffold: derive the key authorization
//! from the account key, materialize and persist the artifact, then POST
//! to the challenge URL when the proof is new or changed. Persistence
//! strictly precedes the notification, so the server never probes before
//! the artifact exists.

use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::authz::Authorization;
use crate::client::AcmeClient;
use crate::crypto::{self, KeySpec};
use crate::error::{AcmeError, AcmeResult};
use crate::jws::AccountKey;
use crate::request::{Exchange, ServerReply};
use crate::store::{ChallengeStore, SaveMode, StoreGroup, ValueKind};

/// Store file names for challenge artifacts.
pub(crate) const FN_HTTP01: &str = "http-01";
pub(crate) const FN_TLSALPN01_KEY: &str = "tls-alpn-01.key";
pub(crate) const FN_TLSALPN01_CERT: &str = "tls-alpn-01.crt";
pub(crate) const FN_TLSSNI01_KEY: &str = "tls-sni-01.key";
pub(crate) const FN_TLSSNI01_CERT: &str = "tls-sni-01.crt";

/// Challenge certificates only need to outlive the verification window.
const CHALLENGE_CERT_DAYS: i64 = 7;

/// Fixed suffix of derived TLS-SNI-01 hostnames.
const TLSSNI01_DNS_SUFFIX: &str = ".acme.invalid";

/// Challenge types with a compiled-in preparer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    /// Key authorization served over plain HTTP at the well-known path.
    Http01,
    /// Self-signed certificate carrying the acmeIdentifier extension,
    /// served via TLS with ALPN protocol "acme-tls/1".
    TlsAlpn01,
    /// Self-signed certificate for a hostname derived from the key
    /// authorization, served via SNI.
    TlsSni01,
}

impl ChallengeType {
    /// Wire identifier of this challenge type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::TlsSni01 => "tls-sni-01",
        }
    }

    /// Parse a wire identifier, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        [Self::Http01, Self::TlsAlpn01, Self::TlsSni01]
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
    }

    /// Produce and persist this challenge's artifact, then tell the
    /// server the proof is ready if it is new or changed.
    pub(crate) async fn prepare(
        &self,
        cha: &mut Challenge,
        authz: &mut Authorization,
        client: &mut AcmeClient,
        store: &dyn ChallengeStore,
        key_spec: KeySpec,
    ) -> AcmeResult<()> {
        match self {
            Self::Http01 => prepare_http_01(cha, authz, client, store).await,
            Self::TlsAlpn01 => prepare_tls_alpn_01(cha, authz, client, store, key_spec).await,
            Self::TlsSni01 => prepare_tls_sni_01(cha, authz, client, store, key_spec).await,
        }
    }
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the server's challenge list, copied out of the
/// authorization snapshot for the duration of a response operation.
#[derive(Debug, Clone)]
pub(crate) struct Challenge {
    /// Position in the server's challenge array.
    #[allow(dead_code)]
    pub(crate) index: usize,
    /// Challenge type token as offered by the server.
    pub(crate) kind: String,
    /// URL the readiness POST goes to (`url` in ACMEv2, `uri` in v1).
    pub(crate) uri: String,
    /// Server-chosen token.
    pub(crate) token: String,
    /// `token.thumbprint` binding, once derived or as echoed back.
    pub(crate) key_authz: Option<String>,
}

impl Challenge {
    pub(crate) fn from_json(index: usize, json: &Value) -> Option<Self> {
        let get = |name: &str| json.get(name).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            index,
            kind: get("type")?,
            uri: get("url").or_else(|| get("uri"))?,
            token: get("token")?,
            key_authz: get("keyAuthorization"),
        })
    }

    /// Derive the key authorization for this challenge. A value carried
    /// over that no longer matches the account key is discarded. Returns
    /// the authorization and whether it changed, in which case the
    /// server must be told.
    fn setup_key_authz(&mut self, key: &AccountKey) -> (String, bool) {
        let expected = format!("{}.{}", self.token, key.thumbprint());
        match &self.key_authz {
            Some(existing) if *existing == expected => (expected, false),
            _ => {
                self.key_authz = Some(expected.clone());
                (expected, true)
            }
        }
    }
}

/// Respond to `authz` by preparing the first challenge that is both
/// offered by the server and configured by the caller. Caller preference
/// order wins over server order.
pub(crate) async fn respond(
    authz: &mut Authorization,
    client: &mut AcmeClient,
    store: &dyn ChallengeStore,
    acceptable: &[String],
    key_spec: KeySpec,
) -> AcmeResult<()> {
    let offered = authz
        .resource
        .as_ref()
        .ok_or_else(|| {
            AcmeError::Invalid(format!(
                "{}: authorization carries no server snapshot; update it first",
                authz.url
            ))
        })?
        .get("challenges")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // Look in the order the challenge types are configured.
    let mut selected = None;
    'configured: for wanted in acceptable {
        for (index, raw) in offered.iter().enumerate() {
            let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind.eq_ignore_ascii_case(wanted) {
                selected = Some((index, raw));
                break 'configured;
            }
        }
    }

    let Some((index, raw)) = selected else {
        let offered_types: Vec<&str> = offered
            .iter()
            .filter_map(|cha| cha.get("type").and_then(Value::as_str))
            .collect();
        error!(
            "{}: the server offers no challenge that is configured here; \
             offered '{}', configured '{}' (via {})",
            authz.domain,
            offered_types.join(" "),
            acceptable.join(" "),
            authz.url
        );
        return Err(AcmeError::Invalid(format!(
            "{}: no acceptable challenge; server offered '{}', configured '{}'",
            authz.domain,
            offered_types.join(" "),
            acceptable.join(" ")
        )));
    };

    let mut cha = Challenge::from_json(index, raw).ok_or_else(|| {
        AcmeError::Invalid(format!(
            "{}: offered challenge is missing its url or token",
            authz.domain
        ))
    })?;

    match ChallengeType::parse(&cha.kind) {
        Some(kind) => kind.prepare(&mut cha, authz, client, store, key_spec).await,
        None => {
            error!(
                "{}: no implementation for challenge '{}'",
                authz.domain, cha.kind
            );
            Err(AcmeError::NotImplemented(cha.kind.clone()))
        }
    }
}

async fn prepare_http_01(
    cha: &mut Challenge,
    authz: &mut Authorization,
    client: &mut AcmeClient,
    store: &dyn ChallengeStore,
) -> AcmeResult<()> {
    let (key_authz, mut notify) = cha.setup_key_authz(client.account_key());

    let existing = store.load(StoreGroup::Challenges, &authz.domain, FN_HTTP01, ValueKind::Text)?;
    let stale = match &existing {
        Some(data) => data.as_slice() != key_authz.as_bytes(),
        None => true,
    };
    if stale {
        store.save(
            StoreGroup::Challenges,
            &authz.domain,
            FN_HTTP01,
            ValueKind::Text,
            key_authz.as_bytes(),
            SaveMode::Overwrite,
        )?;
        debug!("{}: stored http-01 key authorization", authz.domain);
        notify = true;
    }
    authz.dir = authz.domain.clone();

    if notify {
        notify_server(cha, authz, client).await?;
    }
    Ok(())
}

async fn prepare_tls_alpn_01(
    cha: &mut Challenge,
    authz: &mut Authorization,
    client: &mut AcmeClient,
    store: &dyn ChallengeStore,
    key_spec: KeySpec,
) -> AcmeResult<()> {
    let (key_authz, mut notify) = cha.setup_key_authz(client.account_key());

    let existing = store.load(
        StoreGroup::Challenges,
        &authz.domain,
        FN_TLSALPN01_CERT,
        ValueKind::Cert,
    )?;
    let stale = match &existing {
        Some(pem) => !crypto::cert_covers_domain(pem, &authz.domain)?,
        None => true,
    };
    if stale {
        let key = crypto::generate_key_pair(key_spec).map_err(|err| {
            error!("{}: creating tls-alpn-01 challenge key failed", authz.domain);
            err
        })?;

        // The responder answers TLS connections with SNI == domain and
        // ALPN protocol "acme-tls/1" with this certificate.
        let cert = crypto::self_signed_acme_identifier(
            &authz.domain,
            &key_authz,
            &key,
            CHALLENGE_CERT_DAYS,
        )
        .map_err(|err| {
            error!("{}: creating tls-alpn-01 certificate failed", authz.domain);
            err
        })?;

        store.save(
            StoreGroup::Challenges,
            &authz.domain,
            FN_TLSALPN01_KEY,
            ValueKind::Key,
            key.serialize_pem().as_bytes(),
            SaveMode::Overwrite,
        )?;
        store.save(
            StoreGroup::Challenges,
            &authz.domain,
            FN_TLSALPN01_CERT,
            ValueKind::Cert,
            cert.as_bytes(),
            SaveMode::Overwrite,
        )?;
        debug!("{}: stored fresh tls-alpn-01 certificate", authz.domain);
        notify = true;
    }
    authz.dir = authz.domain.clone();

    if notify {
        notify_server(cha, authz, client).await?;
    }
    Ok(())
}

/// Build the "tls-sni-01" hostname for a key authorization: the SHA-256
/// hex split in halves, joined with a dot, under .acme.invalid.
fn sni_host(key_authz: &str) -> String {
    let hex = crypto::sha256_hex(key_authz.as_bytes());
    format!("{}.{}{}", &hex[..32], &hex[32..64], TLSSNI01_DNS_SUFFIX)
}

async fn prepare_tls_sni_01(
    cha: &mut Challenge,
    authz: &mut Authorization,
    client: &mut AcmeClient,
    store: &dyn ChallengeStore,
    key_spec: KeySpec,
) -> AcmeResult<()> {
    let (key_authz, mut notify) = cha.setup_key_authz(client.account_key());
    let dns = sni_host(&key_authz);

    let existing = store.load(StoreGroup::Challenges, &dns, FN_TLSSNI01_CERT, ValueKind::Cert)?;
    let stale = match &existing {
        Some(pem) => !crypto::cert_covers_domain(pem, &dns)?,
        None => true,
    };
    if stale {
        let key = crypto::generate_key_pair(key_spec).map_err(|err| {
            error!("{}: creating tls-sni-01 challenge key failed", authz.domain);
            err
        })?;

        // The certificate names the derived challenge host; the subject
        // stays the real domain.
        let cert = crypto::self_signed(&authz.domain, &[dns.clone()], &key, CHALLENGE_CERT_DAYS)
            .map_err(|err| {
                error!(
                    "{}: setting up self-signed certificate for {} failed",
                    authz.domain, dns
                );
                err
            })?;

        store.save(
            StoreGroup::Challenges,
            &dns,
            FN_TLSSNI01_KEY,
            ValueKind::Key,
            key.serialize_pem().as_bytes(),
            SaveMode::Overwrite,
        )?;
        store.save(
            StoreGroup::Challenges,
            &dns,
            FN_TLSSNI01_CERT,
            ValueKind::Cert,
            cert.as_bytes(),
            SaveMode::Overwrite,
        )?;
        debug!("{}: stored fresh tls-sni-01 certificate for {}", authz.domain, dns);
        notify = true;
    }
    authz.dir = dns;

    if notify {
        notify_server(cha, authz, client).await?;
    }
    Ok(())
}

/// The artifact is in place or was changed from previous data; tell the
/// server so it may (re)try verification.
async fn notify_server(
    cha: &Challenge,
    authz: &Authorization,
    client: &mut AcmeClient,
) -> AcmeResult<()> {
    let mut exchange = ChallengeReady {
        version: client.version(),
        key_authz: cha.key_authz.as_deref(),
        authz_url: &authz.url,
    };
    client.post(&cha.uri, &mut exchange).await
}

struct ChallengeReady<'a> {
    version: u32,
    key_authz: Option<&'a str>,
    authz_url: &'a str,
}

impl Exchange for ChallengeReady<'_> {
    type Output = ();

    fn build_payload(&self) -> AcmeResult<Value> {
        let mut payload = serde_json::Map::new();
        if self.version <= 1 {
            payload.insert("resource".to_string(), json!("challenge"));
        }
        if let Some(key_authz) = self.key_authz {
            payload.insert("keyAuthorization".to_string(), json!(key_authz));
        }
        Ok(Value::Object(payload))
    }

    fn consume(&mut self, _reply: ServerReply) -> AcmeResult<()> {
        info!("updated authorization at {}", self.authz_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_type_round_trip() {
        assert_eq!(ChallengeType::Http01.as_str(), "http-01");
        assert_eq!(ChallengeType::TlsAlpn01.as_str(), "tls-alpn-01");
        assert_eq!(ChallengeType::TlsSni01.as_str(), "tls-sni-01");

        assert_eq!(ChallengeType::parse("http-01"), Some(ChallengeType::Http01));
        assert_eq!(ChallengeType::parse("HTTP-01"), Some(ChallengeType::Http01));
        assert_eq!(ChallengeType::parse("dns-01"), None);
    }

    #[test]
    fn test_challenge_from_json_v2() {
        let cha = Challenge::from_json(
            1,
            &json!({
                "type": "http-01",
                "url": "https://ca.example/cha/1",
                "token": "TOK",
            }),
        )
        .unwrap();

        assert_eq!(cha.kind, "http-01");
        assert_eq!(cha.uri, "https://ca.example/cha/1");
        assert_eq!(cha.token, "TOK");
        assert!(cha.key_authz.is_none());
    }

    #[test]
    fn test_challenge_from_json_v1() {
        let cha = Challenge::from_json(
            0,
            &json!({
                "type": "tls-sni-01",
                "uri": "https://ca.example/cha/0",
                "token": "TOK",
                "keyAuthorization": "TOK.THP",
            }),
        )
        .unwrap();

        assert_eq!(cha.uri, "https://ca.example/cha/0");
        assert_eq!(cha.key_authz.as_deref(), Some("TOK.THP"));
    }

    #[test]
    fn test_challenge_from_json_missing_token() {
        assert!(Challenge::from_json(
            0,
            &json!({"type": "http-01", "url": "https://ca.example/cha/0"})
        )
        .is_none());
    }

    #[test]
    fn test_setup_key_authz() {
        let key = AccountKey::generate().unwrap();
        let expected = format!("TOK.{}", key.thumbprint());

        let mut cha = Challenge {
            index: 0,
            kind: "http-01".to_string(),
            uri: "https://ca.example/cha/0".to_string(),
            token: "TOK".to_string(),
            key_authz: None,
        };

        // Fresh derivation sets the value and requires a notification.
        let (value, changed) = cha.setup_key_authz(&key);
        assert_eq!(value, expected);
        assert!(changed);

        // Matching value carried over: nothing to tell the server.
        let (value, changed) = cha.setup_key_authz(&key);
        assert_eq!(value, expected);
        assert!(!changed);

        // A stale value (the account key changed) is discarded.
        cha.key_authz = Some("TOK.oldthumb".to_string());
        let (value, changed) = cha.setup_key_authz(&key);
        assert_eq!(value, expected);
        assert!(changed);
        assert_eq!(cha.key_authz.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_sni_host_derivation() {
        // SHA-256("hello") =
        // 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        assert_eq!(
            sni_host("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e.1b161e5c1fa7425e73043362938b9824.acme.invalid"
        );
    }

    #[test]
    fn test_sni_host_shape() {
        let dns = sni_host("some.other-key.authorization");
        let parts: Vec<&str> = dns.splitn(3, '.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 32);
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2], "acme.invalid");
        assert!(parts[0]
            .chars()
            .chain(parts[1].chars())
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_challenge_ready_payload_v1() {
        let exchange = ChallengeReady {
            version: 1,
            key_authz: Some("TOK.THP"),
            authz_url: "https://ca.example/authz/abc",
        };
        let payload = exchange.build_payload().unwrap();
        assert_eq!(payload["resource"], "challenge");
        assert_eq!(payload["keyAuthorization"], "TOK.THP");
    }

    #[test]
    fn test_challenge_ready_payload_v2() {
        let exchange = ChallengeReady {
            version: 2,
            key_authz: None,
            authz_url: "https://ca.example/authz/abc",
        };
        let payload = exchange.build_payload().unwrap();
        assert_eq!(payload, json!({}));
    }
}
