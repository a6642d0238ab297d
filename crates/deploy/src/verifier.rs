//! Verification retry protocol.
//!
//! A submission is only the start: the explorer has to index the deployment
//! and then compile the source before it can answer. The driver re-submits
//! while the explorer has not seen the contract yet, then polls the status
//! endpoint on an exponential schedule bounded both by attempt count and by a
//! total time window.

use std::{fmt, future::Future, time::Duration};

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    CancelToken, Cancelled, ContractArtifact, DeploymentRecord, ExplorerApi, ExplorerTarget,
    PollingConfig, StatusResponse, SubmitResponse, VerificationRequest,
};

/// Delay schedule and bounds for one verification.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
    /// Total time after which the outcome is reported as undetermined.
    pub max_window: Duration,
    /// Maximum number of waits, across submission and polling.
    pub max_attempts: usize,
    /// Consecutive explorer failures tolerated before giving up.
    pub max_transport_retries: u32,
    pub jitter: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollingConfig::default().into()
    }
}

impl From<PollingConfig> for PollPolicy {
    fn from(config: PollingConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            factor: config.factor,
            max_window: Duration::from_secs(config.max_window_secs),
            max_attempts: config.max_attempts,
            max_transport_retries: config.max_transport_retries,
            jitter: config.jitter,
        }
    }
}

impl PollPolicy {
    /// The successive delays, e.g. 3s, 6s, 12s, 24s, 30s, 30s, ...
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + Send + use<> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_attempts);
        if self.jitter {
            builder = builder.with_jitter();
        }
        builder.build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "failure", content = "detail", rename_all = "snake_case")]
pub enum VerifyFailure {
    /// The explorer compiled the source and it does not reproduce the bytecode.
    BytecodeMismatch(String),
    /// Too many consecutive failures talking to the explorer.
    TransportExhausted(String),
    Rejected(String),
    /// Neither custom URLs nor a built-in entry exist for the network.
    NoExplorerEndpoint,
    MissingApiKey(String),
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyFailure::BytecodeMismatch(detail) => write!(f, "bytecode mismatch: {detail}"),
            VerifyFailure::TransportExhausted(last) => {
                write!(f, "explorer unreachable, retries exhausted: {last}")
            }
            VerifyFailure::Rejected(message) => write!(f, "rejected by explorer: {message}"),
            VerifyFailure::NoExplorerEndpoint => write!(f, "no explorer endpoint for network"),
            VerifyFailure::MissingApiKey(reason) => write!(f, "missing API key: {reason}"),
        }
    }
}

/// Terminal result of a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
    /// No definitive answer within the window. The explorer may still finish.
    PendingTimeout,
    Failed(VerifyFailure),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(
            self,
            VerificationOutcome::Verified | VerificationOutcome::AlreadyVerified
        )
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationOutcome::Verified => write!(f, "verified"),
            VerificationOutcome::AlreadyVerified => write!(f, "already verified"),
            VerificationOutcome::PendingTimeout => write!(f, "pending (timed out waiting)"),
            VerificationOutcome::Failed(failure) => write!(f, "failed: {failure}"),
        }
    }
}

/// Drives one deployment through an explorer's verification pipeline.
pub struct VerificationDriver<E> {
    explorer: E,
    policy: PollPolicy,
}

impl<E: ExplorerApi> VerificationDriver<E> {
    pub fn new(explorer: E, policy: PollPolicy) -> Self {
        Self { explorer, policy }
    }

    pub fn explorer(&self) -> &E {
        &self.explorer
    }

    /// Verify a confirmed deployment. Only cancellation is an error.
    pub async fn verify(
        &self,
        target: &ExplorerTarget,
        record: &DeploymentRecord,
        artifact: &ContractArtifact,
        cancel: &CancelToken,
    ) -> Result<VerificationOutcome, Cancelled> {
        let request = VerificationRequest::build(record, artifact);
        let mut poll = Poll {
            schedule: self.policy.schedule(),
            started: Instant::now(),
            policy: &self.policy,
            transport_failures: 0,
        };

        tracing::info!(
            network = %target.network,
            address = %request.contract_address,
            contract = %request.contract_name,
            api_url = %target.api_url,
            "Starting verification"
        );

        let guid = loop {
            match race(cancel, self.explorer.submit(target, &request)).await? {
                Ok(SubmitResponse::Accepted(guid)) => break guid,
                Ok(SubmitResponse::AlreadyVerified) => {
                    tracing::info!(network = %target.network, address = %request.contract_address, "Contract already verified");
                    return Ok(VerificationOutcome::AlreadyVerified);
                }
                Ok(SubmitResponse::NotIndexed) => {
                    poll.transport_failures = 0;
                    tracing::debug!(network = %target.network, "Explorer has not indexed the contract yet");
                }
                Ok(SubmitResponse::Rejected(message)) => {
                    tracing::warn!(network = %target.network, %message, "Verification request rejected");
                    return Ok(VerificationOutcome::Failed(VerifyFailure::Rejected(message)));
                }
                Err(e) => {
                    if let Some(outcome) = poll.transport_failure(&e.to_string()) {
                        return Ok(outcome);
                    }
                }
            }

            if !poll.wait(cancel).await? {
                return Ok(poll.timed_out(target));
            }
        };

        tracing::info!(network = %target.network, guid = %guid, "Verification submitted, polling status...");

        loop {
            if !poll.wait(cancel).await? {
                return Ok(poll.timed_out(target));
            }

            match race(cancel, self.explorer.check_status(target, &guid)).await? {
                Ok(StatusResponse::Verified) => {
                    tracing::info!(
                        network = %target.network,
                        address = %request.contract_address,
                        elapsed = ?poll.started.elapsed(),
                        "Contract verified"
                    );
                    return Ok(VerificationOutcome::Verified);
                }
                Ok(StatusResponse::AlreadyVerified) => {
                    return Ok(VerificationOutcome::AlreadyVerified);
                }
                Ok(StatusResponse::Pending) => {
                    poll.transport_failures = 0;
                    tracing::debug!(network = %target.network, guid = %guid, "Verification pending");
                }
                Ok(StatusResponse::BytecodeMismatch(detail)) => {
                    tracing::warn!(network = %target.network, %detail, "Bytecode does not match source");
                    return Ok(VerificationOutcome::Failed(VerifyFailure::BytecodeMismatch(
                        detail,
                    )));
                }
                Ok(StatusResponse::Rejected(message)) => {
                    return Ok(VerificationOutcome::Failed(VerifyFailure::Rejected(message)));
                }
                Err(e) => {
                    if let Some(outcome) = poll.transport_failure(&e.to_string()) {
                        return Ok(outcome);
                    }
                }
            }
        }
    }
}

/// Progress through the delay schedule of one verification.
struct Poll<'a, S> {
    schedule: S,
    started: Instant,
    policy: &'a PollPolicy,
    transport_failures: u32,
}

impl<S: Iterator<Item = Duration>> Poll<'_, S> {
    /// Sleep for the next delay. `false` once the schedule or the window is used up.
    async fn wait(&mut self, cancel: &CancelToken) -> Result<bool, Cancelled> {
        let Some(delay) = self.schedule.next() else {
            return Ok(false);
        };
        if self.started.elapsed() + delay > self.policy.max_window {
            return Ok(false);
        }

        race(cancel, tokio::time::sleep(delay)).await?;
        Ok(true)
    }

    fn transport_failure(&mut self, error: &str) -> Option<VerificationOutcome> {
        self.transport_failures += 1;
        if self.transport_failures > self.policy.max_transport_retries {
            tracing::warn!(error, failures = self.transport_failures, "Explorer unreachable, giving up");
            return Some(VerificationOutcome::Failed(
                VerifyFailure::TransportExhausted(error.to_string()),
            ));
        }
        tracing::warn!(error, failures = self.transport_failures, "Explorer request failed, retrying...");
        None
    }

    fn timed_out(&self, target: &ExplorerTarget) -> VerificationOutcome {
        tracing::warn!(
            network = %target.network,
            elapsed = ?self.started.elapsed(),
            "Verification still pending, giving up waiting"
        );
        VerificationOutcome::PendingTimeout
    }
}

async fn race<F: Future>(cancel: &CancelToken, fut: F) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use alloy_core::primitives::{Address, B256, Bytes};

    use super::*;
    use crate::{
        ExplorerError, NetworkKey, Secret,
        artifact::tests::{CONSTRUCTOR_ABI, sample_artifact},
        cancel_pair,
    };

    /// Explorer replaying scripted answers. Runs out into `Accepted` / `Pending`.
    #[derive(Default)]
    struct ScriptedExplorer {
        submits: Mutex<VecDeque<Result<SubmitResponse, ExplorerError>>>,
        statuses: Mutex<VecDeque<Result<StatusResponse, ExplorerError>>>,
        submit_calls: AtomicUsize,
        status_calls: AtomicUsize,
    }

    impl ScriptedExplorer {
        fn new(
            submits: Vec<Result<SubmitResponse, ExplorerError>>,
            statuses: Vec<Result<StatusResponse, ExplorerError>>,
        ) -> Self {
            Self {
                submits: Mutex::new(submits.into()),
                statuses: Mutex::new(statuses.into()),
                ..Default::default()
            }
        }
    }

    impl ExplorerApi for ScriptedExplorer {
        async fn submit(
            &self,
            _target: &ExplorerTarget,
            _request: &VerificationRequest,
        ) -> Result<SubmitResponse, ExplorerError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.submits.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(SubmitResponse::Accepted("guid".to_string())))
        }

        async fn check_status(
            &self,
            _target: &ExplorerTarget,
            _guid: &str,
        ) -> Result<StatusResponse, ExplorerError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.statuses.lock().unwrap().pop_front();
            next.unwrap_or(Ok(StatusResponse::Pending))
        }
    }

    fn target() -> ExplorerTarget {
        ExplorerTarget {
            network: NetworkKey::from("testnetB"),
            api_url: "https://api.explorerB.example/api".parse().unwrap(),
            browser_url: "https://explorerB.example".parse().unwrap(),
            api_key: Secret::new("KEY"),
        }
    }

    fn record() -> DeploymentRecord {
        DeploymentRecord {
            network: NetworkKey::from("testnetB"),
            contract_name: "Registry".to_string(),
            contract_address: Address::repeat_byte(0xab),
            constructor_args: vec![],
            encoded_args: Bytes::new(),
            tx_hash: B256::ZERO,
            block_number: 1,
            deployed_at: 0,
        }
    }

    fn unavailable() -> Result<StatusResponse, ExplorerError> {
        Err(ExplorerError::Unavailable("connection reset".to_string()))
    }

    async fn run(
        driver: &VerificationDriver<ScriptedExplorer>,
        cancel: &CancelToken,
    ) -> Result<VerificationOutcome, Cancelled> {
        driver
            .verify(&target(), &record(), &sample_artifact(CONSTRUCTOR_ABI), cancel)
            .await
    }

    #[test]
    fn test_default_schedule() {
        let delays: Vec<_> = PollPolicy::default().schedule().take(6).collect();
        assert_eq!(
            delays,
            [3, 6, 12, 24, 30, 30].map(Duration::from_secs).to_vec()
        );
        assert_eq!(PollPolicy::default().schedule().count(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verified_after_pending_polls() {
        let explorer = ScriptedExplorer::new(
            vec![],
            vec![
                Ok(StatusResponse::Pending),
                Ok(StatusResponse::Pending),
                Ok(StatusResponse::Verified),
            ],
        );
        let driver = VerificationDriver::new(explorer, PollPolicy::default());
        let start = Instant::now();

        let outcome = run(&driver, &CancelToken::never()).await.unwrap();

        assert_eq!(outcome, VerificationOutcome::Verified);
        assert_eq!(start.elapsed(), Duration::from_secs(3 + 6 + 12));
        assert_eq!(driver.explorer().submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(driver.explorer().status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatch_fails_without_retry() {
        let explorer = ScriptedExplorer::new(
            vec![],
            vec![Ok(StatusResponse::BytecodeMismatch("does not match".to_string()))],
        );
        let driver = VerificationDriver::new(explorer, PollPolicy::default());

        let outcome = run(&driver, &CancelToken::never()).await.unwrap();

        assert_eq!(
            outcome,
            VerificationOutcome::Failed(VerifyFailure::BytecodeMismatch(
                "does not match".to_string()
            ))
        );
        assert_eq!(driver.explorer().status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_verify_is_already_verified() {
        let explorer = ScriptedExplorer::new(
            vec![
                Ok(SubmitResponse::Accepted("first".to_string())),
                Ok(SubmitResponse::AlreadyVerified),
            ],
            vec![Ok(StatusResponse::Verified)],
        );
        let driver = VerificationDriver::new(explorer, PollPolicy::default());

        let first = run(&driver, &CancelToken::never()).await.unwrap();
        let second = run(&driver, &CancelToken::never()).await.unwrap();

        assert_eq!(first, VerificationOutcome::Verified);
        assert_eq!(second, VerificationOutcome::AlreadyVerified);
        assert!(second.is_verified());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_indexed_resubmits() {
        let explorer = ScriptedExplorer::new(
            vec![
                Ok(SubmitResponse::NotIndexed),
                Ok(SubmitResponse::Accepted("guid".to_string())),
            ],
            vec![Ok(StatusResponse::Verified)],
        );
        let driver = VerificationDriver::new(explorer, PollPolicy::default());
        let start = Instant::now();

        let outcome = run(&driver, &CancelToken::never()).await.unwrap();

        assert_eq!(outcome, VerificationOutcome::Verified);
        assert_eq!(driver.explorer().submit_calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(3 + 6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission() {
        let explorer = ScriptedExplorer::new(
            vec![Ok(SubmitResponse::Rejected("Invalid API Key".to_string()))],
            vec![],
        );
        let driver = VerificationDriver::new(explorer, PollPolicy::default());

        let outcome = run(&driver, &CancelToken::never()).await.unwrap();

        assert!(matches!(
            outcome,
            VerificationOutcome::Failed(VerifyFailure::Rejected(_))
        ));
        assert_eq!(driver.explorer().status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_retries_exhausted() {
        let explorer = ScriptedExplorer::new(vec![], (0..6).map(|_| unavailable()).collect());
        let driver = VerificationDriver::new(explorer, PollPolicy::default());

        let outcome = run(&driver, &CancelToken::never()).await.unwrap();

        assert!(matches!(
            outcome,
            VerificationOutcome::Failed(VerifyFailure::TransportExhausted(_))
        ));
        assert_eq!(driver.explorer().status_calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_reset_on_answer() {
        let mut statuses: Vec<_> = (0..5).map(|_| unavailable()).collect();
        statuses.push(Ok(StatusResponse::Pending));
        statuses.extend((0..5).map(|_| unavailable()));
        statuses.push(Ok(StatusResponse::Verified));

        let explorer = ScriptedExplorer::new(vec![], statuses);
        let policy = PollPolicy {
            max_window: Duration::from_secs(3600),
            ..Default::default()
        };
        let driver = VerificationDriver::new(explorer, policy);

        let outcome = run(&driver, &CancelToken::never()).await.unwrap();

        assert_eq!(outcome, VerificationOutcome::Verified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_until_window_closes() {
        let driver = VerificationDriver::new(ScriptedExplorer::default(), PollPolicy::default());
        let start = Instant::now();

        let outcome = run(&driver, &CancelToken::never()).await.unwrap();

        assert_eq!(outcome, VerificationOutcome::PendingTimeout);
        // 3 + 6 + 12 + 24 + 8 * 30; the next 30s wait would cross 300s.
        assert_eq!(start.elapsed(), Duration::from_secs(285));
        assert_eq!(driver.explorer().status_calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_until_attempts_exhausted() {
        let policy = PollPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        let driver = VerificationDriver::new(ScriptedExplorer::default(), policy);

        let outcome = run(&driver, &CancelToken::never()).await.unwrap();

        assert_eq!(outcome, VerificationOutcome::PendingTimeout);
        assert_eq!(driver.explorer().status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_poll() {
        let driver = VerificationDriver::new(ScriptedExplorer::default(), PollPolicy::default());
        let (handle, cancel) = cancel_pair();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            handle.cancel();
        });

        let result = run(&driver, &cancel).await;

        assert_eq!(result, Err(Cancelled));
        // Polls at 3s and 9s happened; the 12s wait was interrupted.
        assert_eq!(driver.explorer().status_calls.load(Ordering::SeqCst), 2);
    }
}
