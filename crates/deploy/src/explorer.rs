//! Block-explorer verification API.
//!
//! The default client speaks the Etherscan `contract` module protocol, which
//! Etherscan-family explorers (Polygonscan, Scrollscan, Basescan, ...) and
//! Blockscout's compatibility layer all serve.

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{
    ContractArtifact, DeploymentRecord, NetworkKey, Secret, VerificationSource,
};

/// A resolved explorer: where to send requests and with which key.
#[derive(Debug, Clone)]
pub struct ExplorerTarget {
    pub network: NetworkKey,
    pub api_url: Url,
    pub browser_url: Url,
    pub api_key: Secret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CodeFormat {
    #[strum(serialize = "solidity-single-file")]
    SingleFile,
    #[strum(serialize = "solidity-standard-json-input")]
    StandardJson,
}

/// Everything the explorer needs to recompile and diff the deployed bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    /// Checksummed contract address.
    pub contract_address: String,
    pub source_code: String,
    pub code_format: CodeFormat,
    /// `Name` for single files, `path/To.sol:Name` for standard-json input.
    pub contract_name: String,
    pub compiler_version: String,
    pub optimization_used: bool,
    pub runs: u32,
    pub evm_version: Option<String>,
    /// Hex-encoded constructor arguments, without `0x`.
    pub constructor_arguments: String,
}

impl VerificationRequest {
    pub fn build(record: &DeploymentRecord, artifact: &ContractArtifact) -> Self {
        let (source_code, code_format, contract_name) = match &artifact.source {
            VerificationSource::SingleFile(source) => (
                source.clone(),
                CodeFormat::SingleFile,
                artifact.contract_name.clone(),
            ),
            VerificationSource::StandardJson(input) => (
                input.to_string(),
                CodeFormat::StandardJson,
                artifact.qualified_name(),
            ),
        };

        Self {
            contract_address: record.checksummed_address(),
            source_code,
            code_format,
            contract_name,
            compiler_version: artifact.compiler.explorer_version(),
            optimization_used: artifact.compiler.optimizer_enabled,
            runs: artifact.compiler.optimizer_runs,
            evm_version: artifact.compiler.evm_version.clone(),
            constructor_arguments: hex::encode(&record.encoded_args),
        }
    }

    /// Form fields of a `verifysourcecode` submission.
    pub fn form_fields(&self, api_key: &Secret) -> Vec<(&'static str, String)> {
        vec![
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("apikey", api_key.expose().to_string()),
            ("contractaddress", self.contract_address.clone()),
            ("sourceCode", self.source_code.clone()),
            ("codeformat", self.code_format.to_string()),
            ("contractname", self.contract_name.clone()),
            ("compilerversion", self.compiler_version.clone()),
            (
                "optimizationUsed",
                if self.optimization_used { "1" } else { "0" }.to_string(),
            ),
            ("runs", self.runs.to_string()),
            (
                "evmversion",
                self.evm_version.clone().unwrap_or_default(),
            ),
            // Misspelled in the explorer API.
            ("constructorArguements", self.constructor_arguments.clone()),
        ]
    }
}

/// Answer to a verification submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResponse {
    /// Queued; poll with this identifier.
    Accepted(String),
    AlreadyVerified,
    /// The explorer has not indexed the deployment yet.
    NotIndexed,
    Rejected(String),
}

/// Answer to a status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusResponse {
    Pending,
    Verified,
    AlreadyVerified,
    BytecodeMismatch(String),
    Rejected(String),
}

/// Failure to get an answer from the explorer. Always worth retrying.
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("explorer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("explorer unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected explorer response: {0}")]
    Decode(String),
}

/// A verification service reachable over the network.
pub trait ExplorerApi: Send + Sync {
    fn submit(
        &self,
        target: &ExplorerTarget,
        request: &VerificationRequest,
    ) -> impl Future<Output = Result<SubmitResponse, ExplorerError>> + Send;

    fn check_status(
        &self,
        target: &ExplorerTarget,
        guid: &str,
    ) -> impl Future<Output = Result<StatusResponse, ExplorerError>> + Send;
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: serde_json::Value,
}

impl EtherscanResponse {
    fn result_text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Etherscan-compatible explorer client.
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    client: reqwest::Client,
}

impl EtherscanClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read_response(response: reqwest::Response) -> Result<EtherscanResponse, ExplorerError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ExplorerError::Unavailable(format!("HTTP {status}")));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ExplorerError::Decode(format!("{e}: {body}")))
    }
}

impl ExplorerApi for EtherscanClient {
    async fn submit(
        &self,
        target: &ExplorerTarget,
        request: &VerificationRequest,
    ) -> Result<SubmitResponse, ExplorerError> {
        tracing::debug!(
            network = %target.network,
            api_url = %target.api_url,
            address = %request.contract_address,
            contract = %request.contract_name,
            "Submitting verification request"
        );

        let response = self
            .client
            .post(target.api_url.clone())
            .form(&request.form_fields(&target.api_key))
            .send()
            .await?;

        classify_submission(&Self::read_response(response).await?)
    }

    async fn check_status(
        &self,
        target: &ExplorerTarget,
        guid: &str,
    ) -> Result<StatusResponse, ExplorerError> {
        let response = self
            .client
            .get(target.api_url.clone())
            .query(&[
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
                ("apikey", target.api_key.expose()),
            ])
            .send()
            .await?;

        classify_status(&Self::read_response(response).await?)
    }
}

fn is_rate_limited(text: &str) -> bool {
    text.to_lowercase().contains("rate limit")
}

fn classify_submission(response: &EtherscanResponse) -> Result<SubmitResponse, ExplorerError> {
    let result = response.result_text();
    let lower = result.to_lowercase();

    if response.status == "1" {
        return Ok(SubmitResponse::Accepted(result));
    }

    if lower.contains("already verified") {
        Ok(SubmitResponse::AlreadyVerified)
    } else if lower.contains("unable to locate contractcode") {
        Ok(SubmitResponse::NotIndexed)
    } else if is_rate_limited(&result) {
        Err(ExplorerError::Unavailable(result))
    } else {
        Ok(SubmitResponse::Rejected(format!("{}: {result}", response.message)))
    }
}

fn classify_status(response: &EtherscanResponse) -> Result<StatusResponse, ExplorerError> {
    let result = response.result_text();
    let lower = result.to_lowercase();

    if lower.contains("pass - verified") {
        Ok(StatusResponse::Verified)
    } else if lower.contains("already verified") {
        Ok(StatusResponse::AlreadyVerified)
    } else if lower.contains("pending in queue") || lower.contains("unable to locate contractcode") {
        Ok(StatusResponse::Pending)
    } else if lower.contains("fail - unable to verify") || lower.contains("does not match") {
        Ok(StatusResponse::BytecodeMismatch(result))
    } else if is_rate_limited(&result) {
        Err(ExplorerError::Unavailable(result))
    } else {
        Ok(StatusResponse::Rejected(result))
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, B256, Bytes};

    use super::*;
    use crate::artifact::tests::{CONSTRUCTOR_ABI, sample_artifact};

    fn response(status: &str, result: &str) -> EtherscanResponse {
        EtherscanResponse {
            status: status.to_string(),
            message: if status == "1" { "OK" } else { "NOTOK" }.to_string(),
            result: serde_json::Value::String(result.to_string()),
        }
    }

    fn record() -> DeploymentRecord {
        DeploymentRecord {
            network: NetworkKey::from("scrollSepolia"),
            contract_name: "Registry".to_string(),
            contract_address: Address::repeat_byte(0xab),
            constructor_args: vec![],
            encoded_args: Bytes::from_static(&[0x00, 0x2a]),
            tx_hash: B256::ZERO,
            block_number: 1,
            deployed_at: 0,
        }
    }

    #[test]
    fn test_submission_classification() {
        assert_eq!(
            classify_submission(&response("1", "ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn"))
                .unwrap(),
            SubmitResponse::Accepted("ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn".to_string())
        );
        assert_eq!(
            classify_submission(&response("0", "Contract source code already verified")).unwrap(),
            SubmitResponse::AlreadyVerified
        );
        assert_eq!(
            classify_submission(&response(
                "0",
                "Unable to locate ContractCode at 0xabababababababababababababababababababab"
            ))
            .unwrap(),
            SubmitResponse::NotIndexed
        );
        assert!(matches!(
            classify_submission(&response("0", "Invalid API Key")).unwrap(),
            SubmitResponse::Rejected(msg) if msg.contains("Invalid API Key")
        ));
        assert!(matches!(
            classify_submission(&response("0", "Max rate limit reached")),
            Err(ExplorerError::Unavailable(_))
        ));
    }

    #[test]
    fn test_status_classification() {
        let cases = [
            ("0", "Pending in queue", StatusResponse::Pending),
            ("1", "Pass - Verified", StatusResponse::Verified),
            ("0", "Already Verified", StatusResponse::AlreadyVerified),
            (
                "0",
                "Fail - Unable to verify. Compiled contract deployment bytecode does NOT match",
                StatusResponse::BytecodeMismatch(
                    "Fail - Unable to verify. Compiled contract deployment bytecode does NOT match"
                        .to_string(),
                ),
            ),
            (
                "0",
                "Unknown UID",
                StatusResponse::Rejected("Unknown UID".to_string()),
            ),
        ];

        for (status, result, expected) in cases {
            assert_eq!(classify_status(&response(status, result)).unwrap(), expected, "{result}");
        }
    }

    #[test]
    fn test_request_from_standard_json() {
        let mut artifact = sample_artifact(CONSTRUCTOR_ABI);
        artifact.source = VerificationSource::StandardJson(serde_json::json!({
            "language": "Solidity",
            "sources": {}
        }));

        let request = VerificationRequest::build(&record(), &artifact);

        assert_eq!(request.code_format, CodeFormat::StandardJson);
        assert_eq!(request.contract_name, "contracts/Registry.sol:Registry");
        assert_eq!(request.compiler_version, "v0.8.24+commit.e11b9ed9");
        assert_eq!(request.constructor_arguments, "002a");
        assert!(request.source_code.contains("\"language\":\"Solidity\""));
        assert!(
            request
                .contract_address
                .eq_ignore_ascii_case("0xabababababababababababababababababababab")
        );
    }

    #[test]
    fn test_form_fields() {
        let request = VerificationRequest::build(&record(), &sample_artifact(CONSTRUCTOR_ABI));
        let fields = request.form_fields(&Secret::new("KEY"));
        let get = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };

        assert_eq!(get("action"), "verifysourcecode");
        assert_eq!(get("apikey"), "KEY");
        assert_eq!(get("codeformat"), "solidity-single-file");
        assert_eq!(get("contractname"), "Registry");
        assert_eq!(get("optimizationUsed"), "1");
        assert_eq!(get("runs"), "200");
        assert_eq!(get("evmversion"), "paris");
        assert_eq!(get("constructorArguements"), "002a");
    }
}
