//! Read-only table of network and verification contexts.

use std::{collections::BTreeMap, time::Duration};

use thiserror::Error;
use url::Url;

use crate::{
    ChainshipConfig, CredentialRef, ExplorerUrls, NetworkContext, NetworkEntry, NetworkKey,
    VerificationContext, VerifyEntry, known_explorer,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    #[error("malformed entry for network '{key}': {reason}")]
    MalformedEntry { key: String, reason: String },
}

impl RegistryError {
    fn malformed(key: &str, reason: impl Into<String>) -> Self {
        RegistryError::MalformedEntry {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Process-wide mapping from network key to execution and verification context.
///
/// Built once from configuration and never mutated afterwards, so it can be
/// shared between concurrent runs behind an `Arc`. All validation happens in
/// [`NetworkRegistry::from_config`]; lookups perform no I/O.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<NetworkKey, NetworkContext>,
    verification: BTreeMap<NetworkKey, VerificationContext>,
}

impl NetworkRegistry {
    pub fn from_config(config: &ChainshipConfig) -> Result<Self, RegistryError> {
        let mut networks = BTreeMap::new();
        for (key, entry) in &config.networks {
            let context = network_context(key, entry)?;
            networks.insert(context.key.clone(), context);
        }

        let mut verification = BTreeMap::new();
        for (key, entry) in &config.verify {
            let context = verification_context(key, entry)?;

            if !networks.contains_key(key.as_str()) {
                tracing::warn!(network = %key, "Verification configured for a network with no deployment entry");
            }
            if context.explorer_urls.is_none() && known_explorer(key).is_none() {
                tracing::warn!(
                    network = %key,
                    "No explorer URLs configured and network is not a built-in explorer target; verification will fail"
                );
            }

            verification.insert(NetworkKey::from(key.as_str()), context);
        }

        tracing::debug!(
            networks = networks.len(),
            verification = verification.len(),
            "Network registry built"
        );

        Ok(Self {
            networks,
            verification,
        })
    }

    /// Look up the execution context for a network.
    pub fn resolve(&self, key: &str) -> Result<&NetworkContext, RegistryError> {
        self.networks
            .get(key)
            .ok_or_else(|| RegistryError::UnknownNetwork(key.to_string()))
    }

    /// Look up the verification context, absent when the network is deploy-only.
    pub fn resolve_verification(&self, key: &str) -> Option<&VerificationContext> {
        self.verification.get(key)
    }

    /// Explorer endpoints for a network: the custom override, else the built-in entry.
    pub fn explorer_urls(&self, key: &str) -> Option<ExplorerUrls> {
        self.verification
            .get(key)
            .and_then(|v| v.explorer_urls.clone())
            .or_else(|| known_explorer(key))
    }

    /// All configured networks, ordered by key.
    pub fn networks(&self) -> impl Iterator<Item = &NetworkContext> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

fn network_context(key: &str, entry: &NetworkEntry) -> Result<NetworkContext, RegistryError> {
    if key.trim().is_empty() {
        return Err(RegistryError::malformed(key, "network key is empty"));
    }

    let rpc_endpoint = parse_url(key, "url", &entry.url)?;

    if entry.chain_id == Some(0) {
        return Err(RegistryError::malformed(key, "chain_id must be positive"));
    }

    let credential: CredentialRef = entry
        .credential
        .parse()
        .map_err(|e| RegistryError::malformed(key, format!("{e}")))?;

    Ok(NetworkContext {
        key: NetworkKey::from(key),
        rpc_endpoint,
        chain_id: entry.chain_id,
        credential,
        gas: entry.gas,
        confirmations: entry.confirmations,
        confirmation_timeout: Duration::from_secs(entry.confirmation_timeout_secs),
    })
}

fn verification_context(
    key: &str,
    entry: &VerifyEntry,
) -> Result<VerificationContext, RegistryError> {
    let api_key: CredentialRef = entry
        .api_key
        .parse()
        .map_err(|e| RegistryError::malformed(key, format!("{e}")))?;
    if api_key.variable().is_none() {
        return Err(RegistryError::malformed(
            key,
            "api_key must name a secret, e.g. env:ETHERSCAN_API_KEY",
        ));
    }

    let explorer_urls = match (entry.browser_url.as_deref(), entry.api_url.as_deref()) {
        (None, None) => None,
        (Some(browser_url), Some(api_url)) => Some(ExplorerUrls {
            browser_url: parse_url(key, "browser_url", browser_url)?,
            api_url: parse_url(key, "api_url", api_url)?,
        }),
        (Some(_), None) => {
            return Err(RegistryError::malformed(
                key,
                "browser_url is set but api_url is missing; custom explorers need both",
            ));
        }
        (None, Some(_)) => {
            return Err(RegistryError::malformed(
                key,
                "api_url is set but browser_url is missing; custom explorers need both",
            ));
        }
    };

    Ok(VerificationContext {
        api_key,
        explorer_urls,
    })
}

fn parse_url(key: &str, field: &str, raw: &str) -> Result<Url, RegistryError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RegistryError::malformed(key, format!("{field} is empty")));
    }

    let url =
        Url::parse(raw).map_err(|e| RegistryError::malformed(key, format!("{field}: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(RegistryError::malformed(
            key,
            format!("{field}: unsupported scheme '{scheme}'"),
        )),
    }
}
