//! Resolve, deploy, verify, report.

use std::{path::PathBuf, sync::Arc};

use crate::{
    CancelToken, Cancelled, Connector, ContractArtifact, DeployError, DeploymentExecutor,
    DeploymentRecord, ExplorerTarget, NetworkContext, NetworkKey, NetworkRegistry, PollPolicy,
    RunReport, RunStatus, VerificationContext, VerificationDriver, VerificationOutcome,
    VerifyFailure,
};

/// One contract to deploy on one network.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub network: String,
    pub artifact: Arc<ContractArtifact>,
    pub args: Vec<String>,
    /// When false, verification is skipped even if configured.
    pub verify: bool,
}

impl RunRequest {
    pub fn new(network: impl Into<String>, artifact: Arc<ContractArtifact>, args: Vec<String>) -> Self {
        Self {
            network: network.into(),
            artifact,
            args,
            verify: true,
        }
    }

    pub fn without_verification(mut self) -> Self {
        self.verify = false;
        self
    }
}

/// Entry point composing the registry, the executor and the verification driver.
///
/// Runs share nothing but the read-only registry, so [`Orchestrator::run_all`]
/// drives them concurrently.
pub struct Orchestrator<C> {
    registry: Arc<NetworkRegistry>,
    connector: C,
    policy: PollPolicy,
    outdata: Option<PathBuf>,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(registry: Arc<NetworkRegistry>, connector: C, policy: PollPolicy) -> Self {
        Self {
            registry,
            connector,
            policy,
            outdata: None,
        }
    }

    /// Save deployment records under `outdata/<network>/<Contract>.json`.
    pub fn with_outdata(mut self, outdata: impl Into<PathBuf>) -> Self {
        self.outdata = Some(outdata.into());
        self
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Run one request to its terminal report. Never verifies an unconfirmed address.
    pub async fn run(&self, request: &RunRequest, cancel: &CancelToken) -> RunReport {
        let network = NetworkKey::from(request.network.as_str());
        let contract = request.artifact.contract_name.as_str();

        let ctx = match self.registry.resolve(&request.network) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(error = %e, "Cannot deploy");
                return RunReport::new(network, contract, None, None, RunStatus::UnknownNetwork);
            }
        };

        let record = match self.deploy(ctx, request, cancel).await {
            Ok(record) => record,
            Err(DeployError::Cancelled { tx_hash }) => {
                match tx_hash {
                    Some(tx_hash) => tracing::warn!(
                        network = %network,
                        tx_hash = %tx_hash,
                        "Cancelled during deployment; the transaction may still be mined"
                    ),
                    None => tracing::warn!(
                        network = %network,
                        "Cancelled before the deployment was broadcast"
                    ),
                }
                return RunReport::new(
                    network,
                    contract,
                    None,
                    tx_hash,
                    RunStatus::CancelledDuringDeployment,
                );
            }
            Err(e) => {
                tracing::error!(network = %network, kind = %e.kind(), error = %e, "Deployment failed");
                let tx_hash = e.tx_hash();
                return RunReport::new(
                    network,
                    contract,
                    None,
                    tx_hash,
                    RunStatus::DeploymentFailed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                );
            }
        };

        self.persist(&record);

        let verification = if request.verify {
            self.registry.resolve_verification(&request.network)
        } else {
            None
        };

        match verification {
            Some(vctx) => self.verify_record(&record, &request.artifact, vctx, cancel).await,
            None => {
                tracing::info!(network = %network, "No verification configured, skipping");
                deployed_report(&record, RunStatus::VerificationSkipped)
            }
        }
    }

    /// Run independent requests concurrently, one report per request, in order.
    pub async fn run_all(&self, requests: &[RunRequest], cancel: &CancelToken) -> Vec<RunReport> {
        futures::future::join_all(requests.iter().map(|request| self.run(request, cancel))).await
    }

    /// Verify a deployment recorded by an earlier run.
    pub async fn verify_existing(
        &self,
        record: &DeploymentRecord,
        artifact: &ContractArtifact,
        cancel: &CancelToken,
    ) -> RunReport {
        if artifact.contract_name != record.contract_name {
            tracing::warn!(
                record = %record.contract_name,
                artifact = %artifact.contract_name,
                "Artifact does not match the recorded contract name"
            );
        }

        match self.registry.resolve_verification(&record.network) {
            Some(vctx) => self.verify_record(record, artifact, vctx, cancel).await,
            None => {
                tracing::info!(network = %record.network, "No verification configured, skipping");
                deployed_report(record, RunStatus::VerificationSkipped)
            }
        }
    }

    async fn deploy(
        &self,
        ctx: &NetworkContext,
        request: &RunRequest,
        cancel: &CancelToken,
    ) -> Result<DeploymentRecord, DeployError> {
        // Input errors take precedence over credential problems.
        request.artifact.check_arity(&request.args)?;

        let backend = self.connector.connect(ctx)?;
        DeploymentExecutor::new(backend)
            .deploy(ctx, &request.artifact, &request.args, cancel)
            .await
    }

    async fn verify_record(
        &self,
        record: &DeploymentRecord,
        artifact: &ContractArtifact,
        vctx: &VerificationContext,
        cancel: &CancelToken,
    ) -> RunReport {
        let Some(urls) = self.registry.explorer_urls(&record.network) else {
            tracing::warn!(network = %record.network, "No explorer endpoint known for network");
            return deployed_report(
                record,
                RunStatus::Verification(VerificationOutcome::Failed(
                    VerifyFailure::NoExplorerEndpoint,
                )),
            );
        };
        let link = Some(urls.address_link(&record.checksummed_address()));

        let api_key = match self.connector.api_key(vctx) {
            Ok(api_key) => api_key,
            Err(e) => {
                tracing::error!(network = %record.network, error = %e, "Cannot resolve explorer API key");
                return deployed_report(
                    record,
                    RunStatus::Verification(VerificationOutcome::Failed(
                        VerifyFailure::MissingApiKey(e.to_string()),
                    )),
                )
                .with_explorer_link(link);
            }
        };

        let target = ExplorerTarget {
            network: record.network.clone(),
            api_url: urls.api_url,
            browser_url: urls.browser_url,
            api_key,
        };

        let driver = VerificationDriver::new(self.connector.explorer(), self.policy.clone());
        let status = match driver.verify(&target, record, artifact, cancel).await {
            Ok(outcome) => RunStatus::Verification(outcome),
            Err(Cancelled) => {
                tracing::warn!(
                    network = %record.network,
                    address = %record.checksummed_address(),
                    "Cancelled during verification; the contract is deployed"
                );
                RunStatus::CancelledDuringVerification
            }
        };

        deployed_report(record, status).with_explorer_link(link)
    }

    fn persist(&self, record: &DeploymentRecord) {
        let Some(outdata) = &self.outdata else {
            return;
        };
        let path = record.default_path(outdata);
        if let Err(e) = record.save_to_file(&path) {
            tracing::warn!(error = %e, path = %path.display(), "Failed to save deployment record");
        }
    }
}

fn deployed_report(record: &DeploymentRecord, status: RunStatus) -> RunReport {
    RunReport::new(
        record.network.clone(),
        record.contract_name.clone(),
        Some(record.contract_address),
        Some(record.tx_hash),
        status,
    )
}
