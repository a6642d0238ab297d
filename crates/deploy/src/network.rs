//! Network and verification contexts.

use std::{borrow::Borrow, time::Duration};

use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::credentials::CredentialRef;

/// Symbolic name of a deployable network (e.g. `sepolia`, `polygonAmoy`).
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Deref,
    Display,
    From,
)]
#[serde(transparent)]
pub struct NetworkKey(String);

impl From<&str> for NetworkKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl Borrow<str> for NetworkKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Strategy for pricing the deployment transaction.
///
/// In configuration files this is written as `gas = "auto"` or as a literal
/// gas limit, e.g. `gas = 3000000`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "GasRepr", into = "GasRepr")]
pub enum GasPolicy {
    /// Let the RPC layer estimate gas.
    #[default]
    Auto,
    /// Pass this gas limit through unmodified.
    Fixed(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum GasRepr {
    Value(u64),
    Keyword(String),
}

impl TryFrom<GasRepr> for GasPolicy {
    type Error = String;

    fn try_from(repr: GasRepr) -> Result<Self, Self::Error> {
        match repr {
            GasRepr::Value(value) => Ok(GasPolicy::Fixed(value)),
            GasRepr::Keyword(keyword) if keyword.eq_ignore_ascii_case("auto") => {
                Ok(GasPolicy::Auto)
            }
            // Environment overrides arrive as strings.
            GasRepr::Keyword(keyword) => keyword
                .parse::<u64>()
                .map(GasPolicy::Fixed)
                .map_err(|_| format!("invalid gas policy '{keyword}', expected \"auto\" or a number")),
        }
    }
}

impl From<GasPolicy> for GasRepr {
    fn from(policy: GasPolicy) -> Self {
        match policy {
            GasPolicy::Auto => GasRepr::Keyword("auto".to_string()),
            GasPolicy::Fixed(value) => GasRepr::Value(value),
        }
    }
}

impl std::fmt::Display for GasPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GasPolicy::Auto => write!(f, "auto"),
            GasPolicy::Fixed(value) => write!(f, "{value}"),
        }
    }
}

/// Everything needed to send a deployment to one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub key: NetworkKey,
    pub rpc_endpoint: Url,
    /// When absent the chain reported by the endpoint is used as-is.
    pub chain_id: Option<u64>,
    pub credential: CredentialRef,
    pub gas: GasPolicy,
    /// Blocks on top of the receipt block before a deployment counts as final.
    pub confirmations: u64,
    /// Upper bound the RPC collaborator waits for confirmation.
    pub confirmation_timeout: Duration,
}

/// Browser and API endpoints of a block explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerUrls {
    pub browser_url: Url,
    pub api_url: Url,
}

impl ExplorerUrls {
    /// Link to the address page on the explorer's web UI.
    pub fn address_link(&self, address: &str) -> String {
        format!("{}/address/{}", self.browser_url.as_str().trim_end_matches('/'), address)
    }
}

/// Explorer credentials attached to a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationContext {
    pub api_key: CredentialRef,
    /// Custom-chain endpoints. When set they replace the built-in table entry.
    pub explorer_urls: Option<ExplorerUrls>,
}

/// A network whose explorer endpoints are known without configuration.
#[derive(Debug, Clone, Copy)]
pub struct KnownExplorer {
    pub network: &'static str,
    pub chain_id: u64,
    pub browser_url: &'static str,
}

/// Etherscan's multichain API. Every chain below is served from it, selected
/// by the `chainid` query parameter.
pub const ETHERSCAN_V2_API: &str = "https://api.etherscan.io/v2/api";

impl KnownExplorer {
    /// The verification API endpoint for this chain.
    pub fn api_url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(ETHERSCAN_V2_API)?;
        url.query_pairs_mut()
            .append_pair("chainid", &self.chain_id.to_string());
        Ok(url)
    }
}

/// Etherscan-family explorers, keyed the way Hardhat names its networks.
pub const KNOWN_EXPLORERS: &[KnownExplorer] = &[
    KnownExplorer {
        network: "mainnet",
        chain_id: 1,
        browser_url: "https://etherscan.io",
    },
    KnownExplorer {
        network: "sepolia",
        chain_id: 11155111,
        browser_url: "https://sepolia.etherscan.io",
    },
    KnownExplorer {
        network: "holesky",
        chain_id: 17000,
        browser_url: "https://holesky.etherscan.io",
    },
    KnownExplorer {
        network: "polygon",
        chain_id: 137,
        browser_url: "https://polygonscan.com",
    },
    KnownExplorer {
        network: "polygonAmoy",
        chain_id: 80002,
        browser_url: "https://amoy.polygonscan.com",
    },
    KnownExplorer {
        network: "optimism",
        chain_id: 10,
        browser_url: "https://optimistic.etherscan.io",
    },
    KnownExplorer {
        network: "optimismSepolia",
        chain_id: 11155420,
        browser_url: "https://sepolia-optimism.etherscan.io",
    },
    KnownExplorer {
        network: "arbitrumOne",
        chain_id: 42161,
        browser_url: "https://arbiscan.io",
    },
    KnownExplorer {
        network: "arbitrumSepolia",
        chain_id: 421614,
        browser_url: "https://sepolia.arbiscan.io",
    },
    KnownExplorer {
        network: "base",
        chain_id: 8453,
        browser_url: "https://basescan.org",
    },
    KnownExplorer {
        network: "baseSepolia",
        chain_id: 84532,
        browser_url: "https://sepolia.basescan.org",
    },
];

/// Look up the built-in explorer endpoints for a network key.
pub fn known_explorer(key: &str) -> Option<ExplorerUrls> {
    let known = KNOWN_EXPLORERS.iter().find(|e| e.network == key)?;
    Some(ExplorerUrls {
        browser_url: Url::parse(known.browser_url).ok()?,
        api_url: known.api_url().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Serialize)]
    struct Holder {
        gas: GasPolicy,
    }

    #[test]
    fn test_gas_policy_from_toml() {
        let auto: Holder = toml::from_str(r#"gas = "auto""#).unwrap();
        assert_eq!(auto.gas, GasPolicy::Auto);

        let fixed: Holder = toml::from_str("gas = 3000000").unwrap();
        assert_eq!(fixed.gas, GasPolicy::Fixed(3_000_000));

        let from_env_string: Holder = toml::from_str(r#"gas = "21000""#).unwrap();
        assert_eq!(from_env_string.gas, GasPolicy::Fixed(21_000));

        assert!(toml::from_str::<Holder>(r#"gas = "cheap""#).is_err());
    }

    #[test]
    fn test_gas_policy_serializes_back() {
        let out = toml::to_string(&Holder { gas: GasPolicy::Auto }).unwrap();
        assert_eq!(out.trim(), r#"gas = "auto""#);

        let out = toml::to_string(&Holder { gas: GasPolicy::Fixed(42) }).unwrap();
        assert_eq!(out.trim(), "gas = 42");
    }

    #[test]
    fn test_known_explorers_parse() {
        for known in KNOWN_EXPLORERS {
            assert!(known_explorer(known.network).is_some(), "{}", known.network);
        }
        assert!(known_explorer("scrollSepolia").is_none());
    }

    #[test]
    fn test_known_explorers_use_multichain_api() {
        let urls = known_explorer("sepolia").unwrap();
        assert_eq!(
            urls.api_url.as_str(),
            "https://api.etherscan.io/v2/api?chainid=11155111"
        );
        assert_eq!(
            known_explorer("polygonAmoy").unwrap().api_url.as_str(),
            "https://api.etherscan.io/v2/api?chainid=80002"
        );
    }

    #[test]
    fn test_address_link() {
        let urls = known_explorer("sepolia").unwrap();
        assert_eq!(
            urls.address_link("0x8b73329a1D91957B64f0Fa55c14d380f8263B80C"),
            "https://sepolia.etherscan.io/address/0x8b73329a1D91957B64f0Fa55c14d380f8263B80C"
        );
    }
}
