//! Authorization records and their lifecycle against the server.

use std::fmt;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::challenge;
use crate::client::AcmeClient;
use crate::crypto::KeySpec;
use crate::error::{AcmeError, AcmeResult};
use crate::request::{Exchange, ServerReply};
use crate::store::ChallengeStore;

/// Server-side lifecycle state of an authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzState {
    /// Not yet reported by the server.
    Unknown,
    /// Waiting for a challenge to be verified.
    Pending,
    /// The server has verified control of the domain.
    Valid,
    /// Verification failed.
    Invalid,
}

impl AuthzState {
    /// Stable integer ordinal used by the persisted record shape.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Pending => 1,
            Self::Valid => 2,
            Self::Invalid => 3,
        }
    }

    fn from_ordinal(ordinal: u64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Unknown),
            1 => Some(Self::Pending),
            2 => Some(Self::Valid),
            3 => Some(Self::Invalid),
            _ => None,
        }
    }

    /// Whether the server can no longer move this authorization.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

impl fmt::Display for AuthzState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// One (domain, authorization URL) pair tracked against the server.
///
/// The `url` is the record's identity from creation onward. `resource`
/// holds the last server snapshot and is never persisted; `update`
/// reacquires it.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// The domain being authorized (lowercase FQDN).
    pub domain: String,
    /// URL of the server-side authorization resource.
    pub url: String,
    /// Store directory holding this authorization's challenge artifacts.
    pub dir: String,
    /// Current lifecycle state.
    pub state: AuthzState,
    /// Last server snapshot of the authorization document.
    pub resource: Option<Value>,
}

impl Authorization {
    /// Register a new authorization for `domain`. The response's
    /// mandatory `Location` header becomes the record's identity.
    pub async fn register(client: &mut AcmeClient, domain: &str) -> AcmeResult<Self> {
        debug!(
            "[{}] registering new authorization for {}",
            client.sname(),
            domain
        );
        client.ensure_directory().await?;
        let new_authz = client
            .directory()
            .map(|directory| directory.new_authz.clone())
            .ok_or_else(|| AcmeError::General("directory not available".to_string()))?;

        let mut exchange = Register { domain };
        let result = client.post(&new_authz, &mut exchange).await;
        if let Err(err) = &result {
            error!(
                "[{}] registering authorization for {} failed: {}",
                client.sname(),
                domain,
                err
            );
        }
        result
    }

    /// Rebuild a record from a bare authorization URL and poll it.
    pub async fn retrieve(client: &mut AcmeClient, url: &str) -> AcmeResult<Self> {
        let mut authz = Self {
            domain: String::new(),
            url: url.to_string(),
            dir: String::new(),
            state: AuthzState::Unknown,
            resource: None,
        };
        authz.update(client).await?;
        Ok(authz)
    }

    /// Poll the server for the authorization's current state.
    ///
    /// The state is taken from the server's `status` field; a terminal
    /// state already reached sticks until the caller discards the record.
    pub async fn update(&mut self, client: &mut AcmeClient) -> AcmeResult<()> {
        let json = client.get_json(&self.url).await?;

        if let Some(value) = json.pointer("/identifier/value").and_then(Value::as_str) {
            self.domain = value.to_ascii_lowercase();
        }

        let next = match json.get("status").and_then(Value::as_str) {
            Some("pending") => Some(AuthzState::Pending),
            Some("valid") => Some(AuthzState::Valid),
            Some("invalid") => Some(AuthzState::Invalid),
            _ => None,
        };
        self.resource = Some(json);

        let Some(next) = next else {
            if !self.state.is_terminal() {
                self.state = AuthzState::Unknown;
            }
            error!(
                "[{}] authorization for {} at {}: unable to understand server response",
                client.sname(),
                self.domain,
                self.url
            );
            return Err(AcmeError::Invalid(format!(
                "{}: authorization status missing or unknown",
                self.url
            )));
        };

        if self.state.is_terminal() && next != self.state {
            warn!(
                "[{}] authorization for {} at {}: server reports '{}' after terminal '{}'",
                client.sname(),
                self.domain,
                self.url,
                next,
                self.state
            );
        } else {
            self.state = next;
        }

        match self.state {
            AuthzState::Invalid => error!(
                "[{}] authorization for {} at {} is 'invalid'",
                client.sname(),
                self.domain,
                self.url
            ),
            state => info!(
                "[{}] authorization for {} at {} is '{}'",
                client.sname(),
                self.domain,
                self.url,
                state
            ),
        }
        Ok(())
    }

    /// Pick the first mutually acceptable challenge from the current
    /// snapshot and prepare its proof material, notifying the server when
    /// the artifact is new or changed.
    pub async fn respond(
        &mut self,
        client: &mut AcmeClient,
        store: &dyn ChallengeStore,
        acceptable: &[String],
        key_spec: KeySpec,
    ) -> AcmeResult<()> {
        challenge::respond(self, client, store, acceptable, key_spec).await
    }

    /// Send a deactivation for this authorization. The in-memory record
    /// is left as is; callers drop it after a successful deactivation.
    pub async fn deactivate(&self, client: &mut AcmeClient) -> AcmeResult<()> {
        debug!(
            "[{}] deactivating authorization for {} at {}",
            client.sname(),
            self.domain,
            self.url
        );
        let mut exchange = Deactivate { url: &self.url };
        let result = client.post(&self.url, &mut exchange).await;
        if let Err(err) = &result {
            error!(
                "[{}] deactivating authorization for {} at {} failed: {}",
                client.sname(),
                self.domain,
                self.url,
                err
            );
        }
        result
    }

    /// Stable persisted shape: `{domain, location, dir, state}` with the
    /// state as its integer ordinal.
    pub fn to_json(&self) -> Value {
        json!({
            "domain": self.domain,
            "location": self.url,
            "dir": self.dir,
            "state": self.state.ordinal(),
        })
    }

    /// Rebuild a record from its persisted shape.
    pub fn from_json(json: &Value) -> AcmeResult<Self> {
        let field = |name: &str| {
            json.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    AcmeError::Invalid(format!("persisted authorization is missing '{}'", name))
                })
        };
        let state = json
            .get("state")
            .and_then(Value::as_u64)
            .and_then(AuthzState::from_ordinal)
            .ok_or_else(|| {
                AcmeError::Invalid("persisted authorization has no valid 'state'".to_string())
            })?;

        Ok(Self {
            domain: field("domain")?,
            url: field("location")?,
            dir: field("dir")?,
            state,
            resource: None,
        })
    }
}

struct Register<'a> {
    domain: &'a str,
}

impl Exchange for Register<'_> {
    type Output = Authorization;

    fn build_payload(&self) -> AcmeResult<Value> {
        Ok(json!({
            "resource": "new-authz",
            "identifier": { "type": "dns", "value": self.domain },
        }))
    }

    fn consume(&mut self, reply: ServerReply) -> AcmeResult<Authorization> {
        let location = match reply.res.header("Location") {
            Some(location) => location.to_string(),
            None => {
                warn!(
                    "new authorization for {}: response carried no Location header",
                    self.domain
                );
                return Err(AcmeError::Invalid(format!(
                    "new authorization for {}: no Location header",
                    self.domain
                )));
            }
        };
        debug!("new authorization at {}", location);

        Ok(Authorization {
            domain: self.domain.to_ascii_lowercase(),
            url: location,
            dir: String::new(),
            state: AuthzState::Unknown,
            resource: reply.json,
        })
    }
}

struct Deactivate<'a> {
    url: &'a str,
}

impl Exchange for Deactivate<'_> {
    type Output = ();

    fn build_payload(&self) -> AcmeResult<Value> {
        Ok(json!({ "status": "deactivated" }))
    }

    fn consume(&mut self, _reply: ServerReply) -> AcmeResult<()> {
        info!("deactivated authorization at {}", self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Authorization {
        Authorization {
            domain: "www.example.com".to_string(),
            url: "https://ca.example/authz/abc".to_string(),
            dir: "www.example.com".to_string(),
            state: AuthzState::Pending,
            resource: Some(json!({"status": "pending"})),
        }
    }

    #[test]
    fn test_state_ordinals() {
        assert_eq!(AuthzState::Unknown.ordinal(), 0);
        assert_eq!(AuthzState::Pending.ordinal(), 1);
        assert_eq!(AuthzState::Valid.ordinal(), 2);
        assert_eq!(AuthzState::Invalid.ordinal(), 3);

        for state in [
            AuthzState::Unknown,
            AuthzState::Pending,
            AuthzState::Valid,
            AuthzState::Invalid,
        ] {
            assert_eq!(AuthzState::from_ordinal(state.ordinal() as u64), Some(state));
        }
        assert_eq!(AuthzState::from_ordinal(4), None);
    }

    #[test]
    fn test_state_terminal() {
        assert!(!AuthzState::Unknown.is_terminal());
        assert!(!AuthzState::Pending.is_terminal());
        assert!(AuthzState::Valid.is_terminal());
        assert!(AuthzState::Invalid.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AuthzState::Pending.to_string(), "pending");
        assert_eq!(AuthzState::Invalid.to_string(), "invalid");
    }

    #[test]
    fn test_serialization_round_trip() {
        let authz = record();
        let restored = Authorization::from_json(&authz.to_json()).unwrap();

        assert_eq!(restored.domain, authz.domain);
        assert_eq!(restored.url, authz.url);
        assert_eq!(restored.dir, authz.dir);
        assert_eq!(restored.state, authz.state);
        // The snapshot is deliberately not persisted.
        assert!(restored.resource.is_none());
    }

    #[test]
    fn test_persisted_shape() {
        let json = record().to_json();
        assert_eq!(json["domain"], "www.example.com");
        assert_eq!(json["location"], "https://ca.example/authz/abc");
        assert_eq!(json["dir"], "www.example.com");
        assert_eq!(json["state"], 1);
    }

    #[test]
    fn test_from_json_rejects_bad_records() {
        let err = Authorization::from_json(&json!({"domain": "a"})).unwrap_err();
        assert!(matches!(err, AcmeError::Invalid(_)));

        let err = Authorization::from_json(&json!({
            "domain": "a", "location": "b", "dir": "", "state": 9
        }))
        .unwrap_err();
        assert!(matches!(err, AcmeError::Invalid(_)));
    }
}
