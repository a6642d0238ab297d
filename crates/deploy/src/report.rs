//! Terminal report of an orchestration run.

use std::fmt;

use alloy_core::primitives::{Address, B256};
use comfy_table::Table;
use serde::Serialize;

use crate::{DeployFailureKind, NetworkKey, VerificationOutcome};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    UnknownNetwork,
    DeploymentFailed {
        kind: DeployFailureKind,
        message: String,
    },
    /// Cancelled before confirmation. With a transaction hash the transaction
    /// may still land; inspect the chain.
    CancelledDuringDeployment,
    /// Deployed; the network has no verification configured.
    VerificationSkipped,
    Verification(VerificationOutcome),
    /// Deployed; verification was not pursued further.
    CancelledDuringVerification,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::UnknownNetwork => write!(f, "unknown network"),
            RunStatus::DeploymentFailed { kind, message } => {
                write!(f, "deployment failed ({kind}): {message}")
            }
            RunStatus::CancelledDuringDeployment => {
                write!(f, "cancelled during deployment")
            }
            RunStatus::VerificationSkipped => write!(f, "verification skipped"),
            RunStatus::Verification(outcome) => write!(f, "verification {outcome}"),
            RunStatus::CancelledDuringVerification => write!(f, "cancelled during verification"),
        }
    }
}

/// Whether the contract exists on-chain after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContractState {
    Live,
    NotDeployed,
    /// A transaction was broadcast but its fate was not observed.
    Unknown,
}

/// The single externally observable result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub network: NetworkKey,
    pub contract: String,
    pub contract_address: Option<Address>,
    pub tx_hash: Option<B256>,
    pub contract_state: ContractState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_link: Option<String>,
    #[serde(flatten)]
    pub status: RunStatus,
    /// Unix timestamp, in seconds.
    pub finished_at: i64,
}

impl RunReport {
    pub fn new(
        network: NetworkKey,
        contract: impl Into<String>,
        contract_address: Option<Address>,
        tx_hash: Option<B256>,
        status: RunStatus,
    ) -> Self {
        let contract_state = match &status {
            RunStatus::VerificationSkipped
            | RunStatus::Verification(_)
            | RunStatus::CancelledDuringVerification => ContractState::Live,
            RunStatus::CancelledDuringDeployment if tx_hash.is_some() => ContractState::Unknown,
            RunStatus::DeploymentFailed { kind, .. }
                if tx_hash.is_some() && *kind != DeployFailureKind::TransactionReverted =>
            {
                ContractState::Unknown
            }
            RunStatus::CancelledDuringDeployment
            | RunStatus::DeploymentFailed { .. }
            | RunStatus::UnknownNetwork => ContractState::NotDeployed,
        };

        Self {
            network,
            contract: contract.into(),
            contract_address,
            tx_hash,
            contract_state,
            explorer_link: None,
            status,
            finished_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_explorer_link(mut self, link: Option<String>) -> Self {
        self.explorer_link = link;
        self
    }

    /// Deployment succeeded and verification did not definitively fail.
    pub fn is_success(&self) -> bool {
        match &self.status {
            RunStatus::VerificationSkipped => true,
            RunStatus::Verification(outcome) => {
                outcome.is_verified() || *outcome == VerificationOutcome::PendingTimeout
            }
            _ => false,
        }
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = if self.is_success() { "[ok]" } else { "[FAILED]" };
        writeln!(f, "{} {} on {}: {}", icon, self.contract, self.network, self.status)?;

        if let Some(address) = self.contract_address {
            writeln!(f, "    address:  {}", address.to_checksum(None))?;
        }
        if let Some(tx_hash) = self.tx_hash {
            writeln!(f, "    tx:       {tx_hash}")?;
        }
        write!(f, "    contract: {}", self.contract_state)?;
        if let Some(link) = &self.explorer_link {
            write!(f, "\n    explorer: {link}")?;
        }

        Ok(())
    }
}

/// Process exit code for a batch of runs: 0 when every run succeeded.
pub fn exit_code(reports: &[RunReport]) -> u8 {
    reports.iter().map(RunReport::exit_code).max().unwrap_or(0)
}

/// One row per run.
pub fn summary_table(reports: &[RunReport]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Network", "Contract", "Address", "State", "Result"]);

    for report in reports {
        table.add_row(vec![
            report.network.to_string(),
            report.contract.clone(),
            report
                .contract_address
                .map(|a| a.to_checksum(None))
                .unwrap_or_else(|| "-".to_string()),
            report.contract_state.to_string(),
            report.status.to_string(),
        ]);
    }

    table
}
