//! CRM access credentials and their fingerprints

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;
use crate::utils::sha256_hash;

/// Number of hex characters of the SHA-256 digest kept in a fingerprint
const FINGERPRINT_HEX_LEN: usize = 16;

/// One-way identifier of a credential.
///
/// Keys rate-limit buckets and is the only form of a credential that is
/// persisted or logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialKey(String);

impl CredentialKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a raw access token
pub fn fingerprint(raw: &str) -> CredentialKey {
    let digest = sha256_hash(raw.as_bytes());
    CredentialKey(format!("sha256:{}", &digest[..FINGERPRINT_HEX_LEN]))
}

/// An access token for the remote CRM.
///
/// The raw token only leaves this type through [`Credential::bearer`], which
/// the HTTP client uses to build the authorization header.
#[derive(Clone)]
pub struct Credential {
    token: Arc<SecretString>,
    key: CredentialKey,
}

impl Credential {
    /// Wrap a raw token, rejecting blank input
    pub fn new(raw: impl Into<String>) -> Result<Self, DeployerError> {
        let raw: String = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DeployerError::CredentialInvalid(
                "access token is empty".to_string(),
            ));
        }

        let key = fingerprint(trimmed);
        Ok(Self {
            token: Arc::new(SecretString::from(trimmed.to_string())),
            key,
        })
    }

    /// Fingerprint of this credential
    pub fn key(&self) -> &CredentialKey {
        &self.key
    }

    /// Value of the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
