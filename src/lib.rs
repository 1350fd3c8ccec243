//! # acme-authz
//!
//! The core of an ACME client: drives the domain-authorization workflow
//! against an ACME-compatible certificate authority. Given a domain and
//! a configured authority, the crate registers an authorization,
//! discovers the server-offered challenges, prepares the local proof
//! material for a chosen challenge type, persists it in a keyed blob
//! store for an out-of-process responder to serve, notifies the
//! authority, and polls until the authorization settles.
//!
//! # Features
//!
//! - Signed request envelopes with replay-nonce sequencing
//! - HTTP-01, TLS-ALPN-01 and TLS-SNI-01 challenge preparation
//! - Idempotent artifact persistence in a pluggable blob store
//! - RFC 7807 problem-document classification
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use acme_authz::{
//!     AccountKey, AcmeClient, AcmeConfig, Authorization, FileStore, ReqwestTransport,
//! };
//!
//! let config = AcmeConfig::letsencrypt_staging();
//! let store = FileStore::new("/var/lib/acme")?;
//! let mut client = AcmeClient::new(
//!     &config,
//!     Arc::new(ReqwestTransport::new()?),
//!     AccountKey::generate()?,
//! )?;
//!
//! let mut authz = Authorization::register(&mut client, "www.example.com").await?;
//! authz.update(&mut client).await?;
//! authz.respond(&mut client, &store, &config.challenges, config.key_spec).await?;
//! while !authz.state.is_terminal() {
//!     authz.update(&mut client).await?;
//! }
//! ```

pub mod authz;
pub mod challenge;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod jws;
pub mod problem;
mod request;
pub mod store;
pub mod transport;

pub use authz::{Authorization, AuthzState};
pub use challenge::ChallengeType;
pub use client::{AcmeClient, Directory};
pub use config::AcmeConfig;
pub use crypto::KeySpec;
pub use error::{AcmeError, AcmeResult};
pub use jws::AccountKey;
pub use problem::{Problem, SubProblem};
pub use store::{ChallengeStore, FileStore, MemoryStore, SaveMode, StoreGroup, ValueKind};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
