//! Configuration file model.
//!
//! `chainship.toml` carries two maps keyed by network name, mirroring a
//! Hardhat config: `[networks.<key>]` for deployment and `[verify.<key>]` for
//! explorer access. Values may be overridden from the environment with the
//! `CHAINSHIP_` prefix and `__` as the nesting separator, for example
//! `CHAINSHIP_POLLING__MAX_WINDOW_SECS=600`. Only nested keys are read, so
//! flat variables such as `CHAINSHIP_NETWORKS` stay free for the CLI. Figment
//! lowercases environment keys, so overrides only reach networks whose key is
//! all lowercase.

use std::{collections::BTreeMap, path::Path};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::GasPolicy;

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "chainship.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CHAINSHIP_";

const DEFAULT_CONFIRMATIONS: u64 = 1;
const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;

/// `CHAINSHIP_<TABLE>__<KEY>...` variables. Every top-level field is a table,
/// so a flat `CHAINSHIP_<NAME>` is never a config override.
fn env_overrides() -> Env {
    Env::prefixed(ENV_PREFIX)
        .split("__")
        .filter(|key| key.as_str().contains('.'))
}

/// Deployment settings for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    /// JSON-RPC endpoint.
    #[serde(default)]
    pub url: String,
    /// Reference to the deployer private key, e.g. `env:DEPLOYER_KEY`, or `unlocked:0x...`.
    pub credential: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub gas: GasPolicy,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

/// Explorer settings for one network.
///
/// `browser_url` and `api_url` are only needed for chains the explorer table
/// does not know; they must be given together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyEntry {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

/// Verification polling schedule, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub factor: f32,
    pub max_window_secs: u64,
    pub max_attempts: usize,
    pub max_transport_retries: u32,
    pub jitter: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 3,
            max_delay_secs: 30,
            factor: 2.0,
            max_window_secs: 300,
            max_attempts: 20,
            max_transport_retries: 5,
            jitter: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainshipConfig {
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkEntry>,
    #[serde(default)]
    pub verify: BTreeMap<String, VerifyEntry>,
    #[serde(default)]
    pub polling: PollingConfig,
}

impl ChainshipConfig {
    /// Load the configuration file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(env_overrides())
            .extract()
            .with_context(|| format!("Failed to parse configuration {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            verify = config.verify.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse a configuration from TOML text, without environment overrides.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Figment::new()
            .merge(Toml::string(content))
            .extract()
            .context("Failed to parse configuration")
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// A starting point for `chainship init`: one built-in network and one custom chain.
    pub fn starter() -> Self {
        let networks = BTreeMap::from([
            (
                "sepolia".to_string(),
                NetworkEntry {
                    url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
                    credential: "env:DEPLOYER_KEY".to_string(),
                    chain_id: Some(11155111),
                    gas: GasPolicy::Auto,
                    confirmations: DEFAULT_CONFIRMATIONS,
                    confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
                },
            ),
            (
                "scrollSepolia".to_string(),
                NetworkEntry {
                    url: "https://sepolia-rpc.scroll.io".to_string(),
                    credential: "env:DEPLOYER_KEY".to_string(),
                    chain_id: Some(534351),
                    gas: GasPolicy::Auto,
                    confirmations: DEFAULT_CONFIRMATIONS,
                    confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
                },
            ),
        ]);

        let verify = BTreeMap::from([
            (
                "sepolia".to_string(),
                VerifyEntry {
                    api_key: "env:ETHERSCAN_API_KEY".to_string(),
                    browser_url: None,
                    api_url: None,
                },
            ),
            (
                "scrollSepolia".to_string(),
                VerifyEntry {
                    api_key: "env:SCROLLSCAN_API_KEY".to_string(),
                    browser_url: Some("https://sepolia.scrollscan.com/".to_string()),
                    api_url: Some("https://api-sepolia.scrollscan.com/api".to_string()),
                },
            ),
        ]);

        Self {
            networks,
            verify,
            polling: PollingConfig::default(),
        }
    }
}
