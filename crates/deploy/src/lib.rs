//! chainship-deploy - Multi-network contract deployment and verification.
//!
//! This crate resolves a logical network name into a full execution context,
//! deploys a compiled contract artifact through a [`DeploymentBackend`], and
//! carries the confirmed deployment through a block-explorer verification
//! pipeline driven by a bounded exponential backoff.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chainship_deploy::{
//!     ChainshipConfig, ContractArtifact, HttpConnector, NetworkRegistry, Orchestrator,
//!     RunRequest, cancel_pair,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ChainshipConfig::load("chainship.toml")?;
//! let registry = Arc::new(NetworkRegistry::from_config(&config)?);
//! let orchestrator = Orchestrator::new(registry, HttpConnector::new()?, config.polling.into());
//!
//! let artifact = Arc::new(ContractArtifact::load_hardhat("artifacts/contracts/Token.sol/Token.json")?);
//! let request = RunRequest::new("sepolia", artifact, vec!["$deployer".to_string()]);
//!
//! let (_handle, cancel) = cancel_pair();
//! let report = orchestrator.run(&request, &cancel).await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod artifact;
mod backend;
mod cancel;
mod config;
mod connector;
mod credentials;
mod executor;
mod explorer;
mod network;
mod orchestrator;
mod registry;
mod report;
mod rpc;
mod verifier;

pub use artifact::{CompilerSettings, ContractArtifact, VerificationSource};
pub use backend::{DeployerAccount, JsonRpcBackend};
pub use cancel::{CancelHandle, CancelToken, Cancelled, cancel_pair};
pub use config::{
    CONFIG_FILENAME, ChainshipConfig, ENV_PREFIX, NetworkEntry, PollingConfig, VerifyEntry,
};
pub use connector::{Connector, HttpConnector};
pub use credentials::{CredentialError, CredentialRef, CredentialStore, EnvCredentials, Secret};
pub use executor::{
    Confirmation, DEPLOYER_PLACEHOLDER, DeployError, DeployFailureKind, DeploymentBackend,
    DeploymentExecutor, DeploymentRecord, DeploymentTx, PendingDeployment,
};
pub use explorer::{
    CodeFormat, EtherscanClient, ExplorerApi, ExplorerError, ExplorerTarget, StatusResponse,
    SubmitResponse, VerificationRequest,
};
pub use network::{
    ExplorerUrls, GasPolicy, KNOWN_EXPLORERS, KnownExplorer, NetworkContext, NetworkKey,
    VerificationContext, known_explorer,
};
pub use orchestrator::{Orchestrator, RunRequest};
pub use registry::{NetworkRegistry, RegistryError};
pub use report::{ContractState, RunReport, RunStatus, exit_code, summary_table};
pub use rpc::{HttpRpc, JsonRpc, RpcError};
pub use verifier::{PollPolicy, VerificationDriver, VerificationOutcome, VerifyFailure};
