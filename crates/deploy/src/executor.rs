//! Deployment of a contract artifact to one network.

use std::{
    future::Future,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CancelToken, ContractArtifact, CredentialError, GasPolicy, NetworkContext, NetworkKey};

/// Replaced in constructor arguments by the deploying account's address.
pub const DEPLOYER_PLACEHOLDER: &str = "$deployer";

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("constructor expects {expected} argument(s), got {actual}")]
    ArgumentArityMismatch { expected: usize, actual: usize },
    #[error("invalid constructor argument #{index}: {reason}")]
    InvalidArgument { index: usize, reason: String },
    #[error("failed to encode constructor arguments: {0}")]
    AbiEncoding(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("failed to sign deployment transaction: {0}")]
    Signing(String),
    #[error("endpoint serves chain {actual}, expected {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("transaction reverted: {reason}")]
    TransactionReverted { tx_hash: Option<B256>, reason: String },
    #[error("RPC unavailable: {0}")]
    RpcUnavailable(String),
    #[error("timed out waiting for confirmation of {tx_hash}")]
    DeploymentTimeout { tx_hash: B256 },
    #[error("cancelled while waiting for deployment")]
    Cancelled { tx_hash: Option<B256> },
}

/// Short name of a deployment failure, as shown in reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum DeployFailureKind {
    ArgumentArityMismatch,
    InvalidArgument,
    AbiEncoding,
    Credential,
    Signing,
    ChainIdMismatch,
    InsufficientFunds,
    TransactionReverted,
    RpcUnavailable,
    DeploymentTimeout,
    Cancelled,
}

impl DeployError {
    pub fn kind(&self) -> DeployFailureKind {
        match self {
            DeployError::ArgumentArityMismatch { .. } => DeployFailureKind::ArgumentArityMismatch,
            DeployError::InvalidArgument { .. } => DeployFailureKind::InvalidArgument,
            DeployError::AbiEncoding(_) => DeployFailureKind::AbiEncoding,
            DeployError::Credential(_) => DeployFailureKind::Credential,
            DeployError::Signing(_) => DeployFailureKind::Signing,
            DeployError::ChainIdMismatch { .. } => DeployFailureKind::ChainIdMismatch,
            DeployError::InsufficientFunds(_) => DeployFailureKind::InsufficientFunds,
            DeployError::TransactionReverted { .. } => DeployFailureKind::TransactionReverted,
            DeployError::RpcUnavailable(_) => DeployFailureKind::RpcUnavailable,
            DeployError::DeploymentTimeout { .. } => DeployFailureKind::DeploymentTimeout,
            DeployError::Cancelled { .. } => DeployFailureKind::Cancelled,
        }
    }

    /// Hash of the deployment transaction, when it was broadcast before the failure.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            DeployError::TransactionReverted { tx_hash, .. } | DeployError::Cancelled { tx_hash } => {
                *tx_hash
            }
            DeployError::DeploymentTimeout { tx_hash } => Some(*tx_hash),
            _ => None,
        }
    }
}

/// A deployment transaction ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTx {
    pub bytecode: Bytes,
    pub encoded_args: Bytes,
    pub gas: GasPolicy,
    pub chain_id: Option<u64>,
}

impl DeploymentTx {
    /// Transaction input: creation bytecode followed by the encoded arguments.
    pub fn data(&self) -> Bytes {
        self.bytecode
            .iter()
            .chain(self.encoded_args.iter())
            .copied()
            .collect()
    }
}

/// A broadcast transaction awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDeployment {
    pub tx_hash: B256,
}

/// A mined deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub contract_address: Address,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Signs, broadcasts and tracks deployment transactions on one network.
///
/// Each orchestration run gets its own backend, so implementations need not
/// coordinate between runs.
pub trait DeploymentBackend: Send + Sync {
    /// The account transactions are sent from.
    fn sender(&self) -> Address;

    /// Broadcast exactly one transaction.
    fn submit(
        &self,
        tx: DeploymentTx,
    ) -> impl Future<Output = Result<PendingDeployment, DeployError>> + Send;

    /// Wait until the transaction is final, or fail with `DeploymentTimeout`.
    fn await_confirmation(
        &self,
        pending: &PendingDeployment,
    ) -> impl Future<Output = Result<Confirmation, DeployError>> + Send;

    /// Runtime code stored at `address` as of `block`.
    fn code_at(
        &self,
        address: Address,
        block: u64,
    ) -> impl Future<Output = Result<Bytes, DeployError>> + Send;
}

/// The outcome of a confirmed deployment, reused verbatim by verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub network: NetworkKey,
    pub contract_name: String,
    pub contract_address: Address,
    /// Constructor arguments as sent, after placeholder substitution.
    pub constructor_args: Vec<String>,
    pub encoded_args: Bytes,
    pub tx_hash: B256,
    pub block_number: u64,
    /// Unix timestamp, in seconds.
    pub deployed_at: i64,
}

impl DeploymentRecord {
    pub fn checksummed_address(&self) -> String {
        self.contract_address.to_checksum(None)
    }

    /// `<outdata>/<network>/<Contract>.json`
    pub fn default_path(&self, outdata: &Path) -> PathBuf {
        outdata
            .join(self.network.as_str())
            .join(format!("{}.json", self.contract_name))
    }

    /// Save the record to a JSON file, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create record directory {}", parent.display())
            })?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment record")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write deployment record to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Deployment record saved");
        Ok(())
    }

    /// Load a record saved by [`DeploymentRecord::save_to_file`].
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment record {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse deployment record {}", path.display()))
    }
}

/// Deploys artifacts through a [`DeploymentBackend`]. One call, one transaction.
pub struct DeploymentExecutor<B> {
    backend: B,
}

impl<B: DeploymentBackend> DeploymentExecutor<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Deploy `artifact` with `args` and wait until the contract is live.
    ///
    /// Arity is checked before any network call. Cancellation is honoured up to
    /// the broadcast and again while waiting for confirmation; once submission
    /// has started it runs to completion so the hash is never lost.
    pub async fn deploy(
        &self,
        ctx: &NetworkContext,
        artifact: &ContractArtifact,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<DeploymentRecord, DeployError> {
        artifact.check_arity(args)?;

        let sender = self.backend.sender().to_checksum(None);
        let args: Vec<String> = args
            .iter()
            .map(|arg| arg.replace(DEPLOYER_PLACEHOLDER, &sender))
            .collect();
        let encoded_args = artifact.encode_constructor_args(&args)?;

        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled { tx_hash: None });
        }

        tracing::info!(
            network = %ctx.key,
            contract = %artifact.contract_name,
            sender = %sender,
            gas = %ctx.gas,
            "Submitting deployment transaction..."
        );

        let tx = DeploymentTx {
            bytecode: artifact.bytecode.clone(),
            encoded_args: encoded_args.clone(),
            gas: ctx.gas,
            chain_id: ctx.chain_id,
        };

        let pending = self.backend.submit(tx).await?;

        tracing::info!(
            network = %ctx.key,
            tx_hash = %pending.tx_hash,
            confirmations = ctx.confirmations,
            "Deployment submitted, waiting for confirmation..."
        );

        let confirmation = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DeployError::Cancelled { tx_hash: Some(pending.tx_hash) });
            }
            confirmation = self.backend.await_confirmation(&pending) => confirmation?,
        };

        let code = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DeployError::Cancelled { tx_hash: Some(pending.tx_hash) });
            }
            code = self
                .backend
                .code_at(confirmation.contract_address, confirmation.block_number) => code?,
        };

        if code.is_empty() {
            return Err(DeployError::TransactionReverted {
                tx_hash: Some(confirmation.tx_hash),
                reason: format!(
                    "no code at {} after confirmation",
                    confirmation.contract_address.to_checksum(None)
                ),
            });
        }

        let record = DeploymentRecord {
            network: ctx.key.clone(),
            contract_name: artifact.contract_name.clone(),
            contract_address: confirmation.contract_address,
            constructor_args: args,
            encoded_args,
            tx_hash: confirmation.tx_hash,
            block_number: confirmation.block_number,
            deployed_at: chrono::Utc::now().timestamp(),
        };

        tracing::info!(
            network = %ctx.key,
            contract = %record.contract_name,
            address = %record.checksummed_address(),
            tx_hash = %record.tx_hash,
            block = record.block_number,
            "Contract deployed"
        );

        Ok(record)
    }
}
