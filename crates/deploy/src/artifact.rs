//! Compiled contract artifacts.
//!
//! Artifacts are read from a Hardhat `artifacts/` tree: the contract JSON
//! provides the ABI and creation bytecode, and its `.dbg.json` sibling points
//! at the build-info file that holds the exact compiler input. That input is
//! reused verbatim as the standard-json verification payload, so the explorer
//! recompiles with byte-identical settings.

use std::path::{Path, PathBuf};

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt, Specifier},
    json_abi::JsonAbi,
    primitives::Bytes,
};
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use crate::DeployError;

/// Compiler fingerprint the explorer needs to reproduce the bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSettings {
    /// Full solc version, e.g. `0.8.24+commit.e11b9ed9`.
    pub long_version: String,
    pub optimizer_enabled: bool,
    pub optimizer_runs: u32,
    pub evm_version: Option<String>,
}

impl CompilerSettings {
    /// The version string as explorers expect it (`v0.8.24+commit.e11b9ed9`).
    pub fn explorer_version(&self) -> String {
        if self.long_version.starts_with('v') {
            self.long_version.clone()
        } else {
            format!("v{}", self.long_version)
        }
    }

    /// Read the settings out of a solc standard-json input.
    fn from_standard_input(long_version: String, input: &Value) -> Self {
        let settings = &input["settings"];
        let optimizer = &settings["optimizer"];

        Self {
            long_version,
            optimizer_enabled: optimizer["enabled"].as_bool().unwrap_or(false),
            optimizer_runs: optimizer["runs"]
                .as_u64()
                .and_then(|runs| u32::try_from(runs).ok())
                .unwrap_or(200),
            evm_version: settings["evmVersion"].as_str().map(str::to_string),
        }
    }
}

/// Source material submitted for verification.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationSource {
    /// A flattened single Solidity file.
    SingleFile(String),
    /// A complete solc standard-json input.
    StandardJson(Value),
}

/// A compiled contract, ready to deploy and verify.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractArtifact {
    pub contract_name: String,
    /// Path of the defining source file, e.g. `contracts/Token.sol`.
    pub source_name: String,
    pub abi: JsonAbi,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Bytes,
    pub compiler: CompilerSettings,
    pub source: VerificationSource,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    source_name: String,
    abi: JsonAbi,
    bytecode: Bytes,
    #[serde(default)]
    link_references: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatDebugFile {
    build_info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatBuildInfo {
    solc_long_version: String,
    input: Value,
}

impl ContractArtifact {
    /// Load a Hardhat artifact, e.g. `artifacts/contracts/Token.sol/Token.json`.
    pub fn load_hardhat(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let artifact: HardhatArtifact = read_json(path)?;

        if !artifact.link_references.is_empty() {
            anyhow::bail!(
                "Contract {} needs linked libraries ({}), which are not supported",
                artifact.contract_name,
                artifact
                    .link_references
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if artifact.bytecode.is_empty() {
            anyhow::bail!(
                "Contract {} has no creation bytecode (abstract contract or interface?)",
                artifact.contract_name
            );
        }

        let dbg_path = debug_file_path(path)?;
        let dbg: HardhatDebugFile = read_json(&dbg_path)?;
        let build_info_path = dbg_path
            .parent()
            .map(|dir| dir.join(&dbg.build_info))
            .with_context(|| format!("Invalid debug file path {}", dbg_path.display()))?;
        let build_info: HardhatBuildInfo = read_json(&build_info_path)?;

        let compiler =
            CompilerSettings::from_standard_input(build_info.solc_long_version, &build_info.input);

        tracing::debug!(
            contract = %artifact.contract_name,
            source = %artifact.source_name,
            compiler = %compiler.long_version,
            build_info = %build_info_path.display(),
            "Loaded Hardhat artifact"
        );

        Ok(Self {
            contract_name: artifact.contract_name,
            source_name: artifact.source_name,
            abi: artifact.abi,
            bytecode: artifact.bytecode,
            compiler,
            source: VerificationSource::StandardJson(build_info.input),
        })
    }

    /// Number of constructor parameters declared by the ABI.
    pub fn constructor_arity(&self) -> usize {
        self.abi.constructor().map_or(0, |c| c.inputs.len())
    }

    /// Fail with [`DeployError::ArgumentArityMismatch`] unless `args` has one
    /// entry per constructor parameter.
    pub fn check_arity(&self, args: &[String]) -> Result<(), DeployError> {
        let expected = self.constructor_arity();
        if args.len() != expected {
            return Err(DeployError::ArgumentArityMismatch {
                expected,
                actual: args.len(),
            });
        }
        Ok(())
    }

    /// `source:Name`, the contract identifier used with standard-json input.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }

    /// Coerce string arguments against the constructor's input types and ABI-encode them.
    pub fn encode_constructor_args(&self, args: &[String]) -> Result<Bytes, DeployError> {
        self.check_arity(args)?;

        let Some(constructor) = self.abi.constructor() else {
            return Ok(Bytes::new());
        };

        let values = constructor
            .inputs
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (param, arg))| {
                let ty = param.resolve().map_err(|e| DeployError::InvalidArgument {
                    index,
                    reason: format!("cannot resolve type {}: {e}", param.ty),
                })?;
                ty.coerce_str(arg).map_err(|e| DeployError::InvalidArgument {
                    index,
                    reason: format!("'{arg}' is not a valid {}: {e}", param.ty),
                })
            })
            .collect::<Result<Vec<DynSolValue>, _>>()?;

        constructor
            .abi_encode_input(&values)
            .map(Bytes::from)
            .map_err(|e| DeployError::AbiEncoding(e.to_string()))
    }
}

fn debug_file_path(artifact_path: &Path) -> anyhow::Result<PathBuf> {
    let stem = artifact_path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Invalid artifact path {}", artifact_path.display()))?;
    Ok(artifact_path.with_file_name(format!("{stem}.dbg.json")))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
pub(crate) mod tests {
    use tempdir::TempDir;

    use super::*;

    pub(crate) const CONSTRUCTOR_ABI: &str = r#"[
        {
            "type": "constructor",
            "stateMutability": "nonpayable",
            "inputs": [
                { "name": "owner", "type": "address", "internalType": "address" },
                { "name": "cap", "type": "uint256", "internalType": "uint256" },
                { "name": "admins", "type": "address[]", "internalType": "address[]" }
            ]
        },
        {
            "type": "function",
            "name": "owner",
            "stateMutability": "view",
            "inputs": [],
            "outputs": [{ "name": "", "type": "address", "internalType": "address" }]
        }
    ]"#;

    pub(crate) fn sample_artifact(abi: &str) -> ContractArtifact {
        ContractArtifact {
            contract_name: "Registry".to_string(),
            source_name: "contracts/Registry.sol".to_string(),
            abi: serde_json::from_str(abi).unwrap(),
            bytecode: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52]),
            compiler: CompilerSettings {
                long_version: "0.8.24+commit.e11b9ed9".to_string(),
                optimizer_enabled: true,
                optimizer_runs: 200,
                evm_version: Some("paris".to_string()),
            },
            source: VerificationSource::SingleFile("contract Registry {}".to_string()),
        }
    }

    const OWNER: &str = "0x8b73329a1d91957b64f0fa55c14d380f8263b80c";

    #[test]
    fn test_constructor_arity() {
        assert_eq!(sample_artifact(CONSTRUCTOR_ABI).constructor_arity(), 3);
        assert_eq!(sample_artifact("[]").constructor_arity(), 0);
    }

    #[test]
    fn test_check_arity() {
        let artifact = sample_artifact(CONSTRUCTOR_ABI);
        assert!(artifact.check_arity(&["a".into(), "b".into(), "c".into()]).is_ok());
        assert!(matches!(
            artifact.check_arity(&[]),
            Err(DeployError::ArgumentArityMismatch {
                expected: 3,
                actual: 0
            })
        ));
        assert!(sample_artifact("[]").check_arity(&[]).is_ok());
    }

    #[test]
    fn test_encode_constructor_args() {
        let artifact = sample_artifact(CONSTRUCTOR_ABI);
        let args = vec![OWNER.to_string(), "1000".to_string(), format!("[{OWNER}]")];

        let encoded = artifact.encode_constructor_args(&args).unwrap();

        // Two static heads, the array offset, its length and one element.
        assert_eq!(encoded.len(), 5 * 32);
        assert_eq!(&encoded[12..32], hex::decode(&OWNER[2..]).unwrap().as_slice());
        assert_eq!(encoded[63], 0xe8);
        assert_eq!(encoded[62], 0x03);
    }

    #[test]
    fn test_encode_rejects_wrong_arity() {
        let artifact = sample_artifact(CONSTRUCTOR_ABI);
        let result = artifact.encode_constructor_args(&[OWNER.to_string()]);
        assert!(matches!(
            result,
            Err(DeployError::ArgumentArityMismatch {
                expected: 3,
                actual: 1
            })
        ));

        let no_ctor = sample_artifact("[]");
        assert!(no_ctor.encode_constructor_args(&[]).unwrap().is_empty());
        assert!(matches!(
            no_ctor.encode_constructor_args(&["1".to_string()]),
            Err(DeployError::ArgumentArityMismatch {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_encode_reports_bad_argument_index() {
        let artifact = sample_artifact(CONSTRUCTOR_ABI);
        let args = vec![OWNER.to_string(), "not-a-number".to_string(), "[]".to_string()];

        let result = artifact.encode_constructor_args(&args);
        assert!(matches!(result, Err(DeployError::InvalidArgument { index: 1, .. })));
    }

    #[test]
    fn test_explorer_version() {
        let artifact = sample_artifact("[]");
        assert_eq!(artifact.compiler.explorer_version(), "v0.8.24+commit.e11b9ed9");
        assert_eq!(artifact.qualified_name(), "contracts/Registry.sol:Registry");
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_hardhat_artifact() {
        let temp_dir = TempDir::new("chainship-test").expect("Failed to create temp dir");
        let root = temp_dir.path().join("artifacts");
        let artifact_path = root.join("contracts/Registry.sol/Registry.json");

        write(
            &artifact_path,
            &format!(
                r#"{{
                    "_format": "hh-sol-artifact-1",
                    "contractName": "Registry",
                    "sourceName": "contracts/Registry.sol",
                    "abi": {CONSTRUCTOR_ABI},
                    "bytecode": "0x6080604052",
                    "deployedBytecode": "0x6080",
                    "linkReferences": {{}},
                    "deployedLinkReferences": {{}}
                }}"#
            ),
        );
        write(
            &root.join("contracts/Registry.sol/Registry.dbg.json"),
            r#"{ "_format": "hh-sol-dbg-1", "buildInfo": "../../build-info/abc123.json" }"#,
        );
        write(
            &root.join("build-info/abc123.json"),
            r#"{
                "id": "abc123",
                "solcVersion": "0.8.24",
                "solcLongVersion": "0.8.24+commit.e11b9ed9",
                "input": {
                    "language": "Solidity",
                    "sources": { "contracts/Registry.sol": { "content": "contract Registry {}" } },
                    "settings": {
                        "optimizer": { "enabled": true, "runs": 200 },
                        "evmVersion": "paris"
                    }
                }
            }"#,
        );

        let artifact = ContractArtifact::load_hardhat(&artifact_path).unwrap();

        assert_eq!(artifact.contract_name, "Registry");
        assert_eq!(artifact.constructor_arity(), 3);
        assert_eq!(artifact.bytecode.as_ref(), &[0x60, 0x80, 0x60, 0x40, 0x52]);
        assert_eq!(
            artifact.compiler,
            CompilerSettings {
                long_version: "0.8.24+commit.e11b9ed9".to_string(),
                optimizer_enabled: true,
                optimizer_runs: 200,
                evm_version: Some("paris".to_string()),
            }
        );
        assert!(matches!(
            artifact.source,
            VerificationSource::StandardJson(ref input) if input["language"] == "Solidity"
        ));
    }

    #[test]
    fn test_load_hardhat_rejects_linked_libraries() {
        let temp_dir = TempDir::new("chainship-test").expect("Failed to create temp dir");
        let artifact_path = temp_dir.path().join("Linked.json");
        write(
            &artifact_path,
            r#"{
                "contractName": "Linked",
                "sourceName": "contracts/Linked.sol",
                "abi": [],
                "bytecode": "0x6080",
                "linkReferences": { "contracts/Lib.sol": { "Lib": [] } }
            }"#,
        );

        let err = ContractArtifact::load_hardhat(&artifact_path).unwrap_err();
        assert!(err.to_string().contains("linked libraries"));
    }
}
