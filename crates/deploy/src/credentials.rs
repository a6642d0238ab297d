//! Opaque credential references and the stores that resolve them.
//!
//! Configuration only ever names a credential (`env:DEPLOYER_KEY`); the
//! material behind it is looked up when a run connects to its network.

use std::{collections::HashMap, fmt};

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference to a credential held outside this crate.
///
/// Written as `env:NAME` or just `NAME`; both name an environment variable.
/// `unlocked:0x...` names an account the RPC endpoint signs for itself, which
/// only local development nodes and signing proxies do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CredentialRef {
    Env(String),
    Unlocked(Address),
}

impl CredentialRef {
    /// The environment variable holding the secret, if there is one.
    pub fn variable(&self) -> Option<&str> {
        match self {
            CredentialRef::Env(name) => Some(name),
            CredentialRef::Unlocked(_) => None,
        }
    }
}

impl std::str::FromStr for CredentialRef {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(address) = s.strip_prefix("unlocked:") {
            return address
                .trim()
                .parse()
                .map(CredentialRef::Unlocked)
                .map_err(|e| CredentialError::InvalidReference {
                    reference: s.to_string(),
                    reason: format!("expected an account address: {e}"),
                });
        }

        let name = s.strip_prefix("env:").unwrap_or(s).trim();

        if name.is_empty() {
            return Err(CredentialError::InvalidReference {
                reference: s.to_string(),
                reason: "empty variable name".to_string(),
            });
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CredentialError::InvalidReference {
                reference: s.to_string(),
                reason: "variable names may only contain ASCII letters, digits and '_'"
                    .to_string(),
            });
        }

        Ok(CredentialRef::Env(name.to_string()))
    }
}

impl TryFrom<String> for CredentialRef {
    type Error = CredentialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CredentialRef> for String {
    fn from(value: CredentialRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::Env(name) => write!(f, "env:{name}"),
            CredentialRef::Unlocked(address) => write!(f, "unlocked:{address}"),
        }
    }
}

/// A resolved secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid credential reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("credential {0} is not set")]
    Missing(CredentialRef),
    #[error("credential {0} does not refer to a secret")]
    NotASecret(CredentialRef),
    #[error("credential {reference} is malformed: {reason}")]
    Malformed {
        reference: CredentialRef,
        reason: String,
    },
}

/// Resolves credential references into secrets.
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, reference: &CredentialRef) -> Result<Secret, CredentialError>;
}

/// Reads credentials from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialStore for EnvCredentials {
    fn resolve(&self, reference: &CredentialRef) -> Result<Secret, CredentialError> {
        let name = reference
            .variable()
            .ok_or_else(|| CredentialError::NotASecret(reference.clone()))?;
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(Secret::new(value.trim())),
            _ => Err(CredentialError::Missing(reference.clone())),
        }
    }
}

impl CredentialStore for HashMap<String, String> {
    fn resolve(&self, reference: &CredentialRef) -> Result<Secret, CredentialError> {
        let name = reference
            .variable()
            .ok_or_else(|| CredentialError::NotASecret(reference.clone()))?;
        self.get(name)
            .map(|value| Secret::new(value.as_str()))
            .ok_or_else(|| CredentialError::Missing(reference.clone()))
    }
}
