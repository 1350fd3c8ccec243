//! ACME client context: directory endpoints and replay-nonce handling.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::AcmeConfig;
use crate::error::{AcmeError, AcmeResult};
use crate::jws::AccountKey;
use crate::transport::{HttpResponse, HttpTransport};

/// Endpoints published in the authority's directory document.
#[derive(Debug, Clone)]
pub struct Directory {
    /// Registers a new authorization.
    pub new_authz: String,
    /// Requests certificate issuance.
    pub new_cert: String,
    /// Registers a new account; its endpoint also hands out replay
    /// nonces on HEAD requests.
    pub new_reg: String,
    /// Revokes a certificate.
    pub revoke_cert: String,
}

impl Directory {
    fn from_json(json: &Value) -> AcmeResult<Self> {
        let field = |name: &str| {
            json.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| AcmeError::Invalid(format!("directory is missing '{}'", name)))
        };
        Ok(Self {
            new_authz: field("new-authz")?,
            new_cert: field("new-cert")?,
            new_reg: field("new-reg")?,
            revoke_cert: field("revoke-cert")?,
        })
    }
}

/// Shared context for all operations against one certificate authority.
///
/// The replay nonce is a single slot, so operations must not overlap;
/// every protocol method takes `&mut self` to enforce that.
pub struct AcmeClient {
    url: String,
    sname: String,
    version: u32,
    transport: Arc<dyn HttpTransport>,
    account_key: AccountKey,
    directory: Option<Directory>,
    nonce: Option<String>,
}

impl AcmeClient {
    /// Create a context for the authority at `config.directory_url`.
    pub fn new(
        config: &AcmeConfig,
        transport: Arc<dyn HttpTransport>,
        account_key: AccountKey,
    ) -> AcmeResult<Self> {
        let parsed = Url::parse(&config.directory_url).map_err(|err| {
            AcmeError::Invalid(format!(
                "invalid ACME directory url '{}': {}",
                config.directory_url, err
            ))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(AcmeError::Invalid(format!(
                "ACME directory url must be http(s): {}",
                config.directory_url
            )));
        }
        let host = parsed.host_str().ok_or_else(|| {
            AcmeError::Invalid(format!(
                "ACME directory url has no host: {}",
                config.directory_url
            ))
        })?;

        // Short host tail used to label log lines.
        let sname = if host.len() <= 16 {
            host.to_string()
        } else {
            host[host.len() - 16..].to_string()
        };

        Ok(Self {
            url: config.directory_url.clone(),
            sname,
            version: config.version,
            transport,
            account_key,
            directory: None,
            nonce: None,
        })
    }

    /// The directory URL this context talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Protocol major version the authority speaks.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The account key signing this context's requests.
    pub fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    /// The directory endpoints, once fetched.
    pub fn directory(&self) -> Option<&Directory> {
        self.directory.as_ref()
    }

    /// Fetch the directory document if not yet known. All four endpoints
    /// must be present or setup fails.
    pub async fn setup(&mut self) -> AcmeResult<()> {
        if self.directory.is_some() {
            return Ok(());
        }
        debug!("[{}] fetching directory from {}", self.sname, self.url);
        let url = self.url.clone();
        let json = self.get_json(&url).await?;
        self.directory = Some(Directory::from_json(&json)?);
        Ok(())
    }

    pub(crate) fn sname(&self) -> &str {
        &self.sname
    }

    pub(crate) async fn ensure_directory(&mut self) -> AcmeResult<()> {
        self.setup().await
    }

    /// Take the cached nonce, fetching a fresh one when the slot is
    /// empty. The slot is cleared: a nonce goes into exactly one request.
    pub(crate) async fn take_nonce(&mut self) -> AcmeResult<String> {
        if self.nonce.is_none() {
            self.new_nonce().await?;
        }
        self.nonce
            .take()
            .ok_or_else(|| AcmeError::General(format!("[{}] no replay nonce available", self.sname)))
    }

    /// HEAD the new-reg endpoint and read the Replay-Nonce it returns.
    async fn new_nonce(&mut self) -> AcmeResult<()> {
        let new_reg = self
            .directory
            .as_ref()
            .map(|directory| directory.new_reg.clone())
            .ok_or_else(|| {
                AcmeError::General("directory must be fetched before nonces".to_string())
            })?;
        debug!("[{}] fetching new replay nonce", self.sname);
        let transport = Arc::clone(&self.transport);
        let res = transport.head(&new_reg).await?;
        self.absorb_nonce(&res);
        if self.nonce.is_none() {
            return Err(AcmeError::General(format!(
                "[{}] server sent no Replay-Nonce on {}",
                self.sname, new_reg
            )));
        }
        Ok(())
    }

    /// Remember the Replay-Nonce of any response, success or failure.
    pub(crate) fn absorb_nonce(&mut self, res: &HttpResponse) {
        if let Some(nonce) = res.header("Replay-Nonce") {
            self.nonce = Some(nonce.to_string());
        }
    }

    pub(crate) fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReqwestTransport;
    use serde_json::json;

    fn test_client(directory_url: &str) -> AcmeResult<AcmeClient> {
        AcmeClient::new(
            &AcmeConfig::new(directory_url),
            Arc::new(ReqwestTransport::new()?),
            AccountKey::generate()?,
        )
    }

    #[test]
    fn test_directory_from_json() {
        let directory = Directory::from_json(&json!({
            "new-authz": "https://ca.example/acme/new-authz",
            "new-cert": "https://ca.example/acme/new-cert",
            "new-reg": "https://ca.example/acme/new-reg",
            "revoke-cert": "https://ca.example/acme/revoke-cert",
        }))
        .unwrap();

        assert_eq!(directory.new_authz, "https://ca.example/acme/new-authz");
        assert_eq!(directory.revoke_cert, "https://ca.example/acme/revoke-cert");
    }

    #[test]
    fn test_directory_missing_endpoint() {
        let err = Directory::from_json(&json!({
            "new-authz": "https://ca.example/acme/new-authz",
            "new-cert": "https://ca.example/acme/new-cert",
            "new-reg": "https://ca.example/acme/new-reg",
        }))
        .unwrap_err();

        match err {
            AcmeError::Invalid(message) => assert!(message.contains("revoke-cert")),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_relative_url() {
        assert!(test_client("/directory").is_err());
        assert!(test_client("ftp://ca.example/directory").is_err());
    }

    #[test]
    fn test_short_server_name() {
        let client = test_client("https://ca.example/dir").unwrap();
        assert_eq!(client.sname(), "ca.example");

        let client = test_client("https://acme-staging.api.letsencrypt.org/directory").unwrap();
        assert_eq!(client.sname(), ".letsencrypt.org");
        assert_eq!(client.sname().len(), 16);
    }

    #[test]
    fn test_fresh_client_has_no_directory() {
        let client = test_client("https://ca.example/dir").unwrap();
        assert!(client.directory().is_none());
        assert_eq!(client.version(), 1);
    }
}
