//! Client configuration.

use serde::{Deserialize, Serialize};

use crate::crypto::KeySpec;

const LETSENCRYPT_STAGING: &str = "https://acme-staging.api.letsencrypt.org/directory";
const LETSENCRYPT_PRODUCTION: &str = "https://acme-v01.api.letsencrypt.org/directory";

/// Configuration for an [`AcmeClient`](crate::client::AcmeClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// ACME directory URL of the certificate authority.
    pub directory_url: String,

    /// ACME protocol major version spoken by the authority.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Challenge types this installation can answer, most preferred first.
    #[serde(default = "default_challenges")]
    pub challenges: Vec<String>,

    /// Key algorithm for freshly generated challenge keys.
    #[serde(default)]
    pub key_spec: KeySpec,
}

fn default_version() -> u32 {
    1
}

fn default_challenges() -> Vec<String> {
    vec!["http-01".to_string(), "tls-alpn-01".to_string()]
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory_url: LETSENCRYPT_STAGING.to_string(),
            version: default_version(),
            challenges: default_challenges(),
            key_spec: KeySpec::default(),
        }
    }
}

impl AcmeConfig {
    /// Configuration for the given directory URL.
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            ..Default::default()
        }
    }

    /// Configuration for the Let's Encrypt staging endpoint.
    pub fn letsencrypt_staging() -> Self {
        Self::default()
    }

    /// Configuration for the Let's Encrypt production endpoint.
    pub fn letsencrypt_production() -> Self {
        Self::new(LETSENCRYPT_PRODUCTION)
    }

    /// Set the ordered challenge-type preferences.
    pub fn with_challenges(mut self, challenges: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.challenges = challenges.into_iter().map(Into::into).collect();
        self
    }

    /// Set the protocol major version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Set the challenge key algorithm.
    pub fn with_key_spec(mut self, key_spec: KeySpec) -> Self {
        self.key_spec = key_spec;
        self
    }
}
