//! Per-run wiring of collaborators.

use alloy_signer_local::PrivateKeySigner;

use crate::{
    CredentialError, CredentialRef, CredentialStore, DeployError, DeployerAccount,
    DeploymentBackend, EnvCredentials, EtherscanClient, ExplorerApi, JsonRpcBackend,
    NetworkContext, Secret, VerificationContext, rpc::create_client,
};

/// Builds the collaborators one orchestration run talks to.
///
/// Every run connects its own backend, so credential handles are never shared
/// between concurrent runs.
pub trait Connector: Send + Sync {
    type Backend: DeploymentBackend;
    type Explorer: ExplorerApi;

    /// Resolve the network's credential and connect a deployment backend.
    fn connect(&self, ctx: &NetworkContext) -> Result<Self::Backend, DeployError>;

    fn explorer(&self) -> Self::Explorer;

    /// Resolve the explorer API key.
    fn api_key(&self, ctx: &VerificationContext) -> Result<Secret, CredentialError>;
}

/// JSON-RPC and Etherscan over HTTP, with credentials from a [`CredentialStore`].
///
/// The network credential holds the deployer's private key, except for
/// `unlocked:` accounts, which the endpoint signs for.
#[derive(Debug, Clone)]
pub struct HttpConnector<S = EnvCredentials> {
    client: reqwest::Client,
    credentials: S,
}

impl HttpConnector<EnvCredentials> {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client()?,
            credentials: EnvCredentials,
        })
    }
}

impl<S: CredentialStore> HttpConnector<S> {
    pub fn with_credentials<T: CredentialStore>(self, credentials: T) -> HttpConnector<T> {
        HttpConnector {
            client: self.client,
            credentials,
        }
    }
}

impl<S: CredentialStore> Connector for HttpConnector<S> {
    type Backend = JsonRpcBackend;
    type Explorer = EtherscanClient;

    fn connect(&self, ctx: &NetworkContext) -> Result<JsonRpcBackend, DeployError> {
        let account = match &ctx.credential {
            CredentialRef::Unlocked(address) => DeployerAccount::Unlocked(*address),
            reference => {
                let secret = self.credentials.resolve(reference)?;
                let signer: PrivateKeySigner =
                    secret
                        .expose()
                        .parse()
                        .map_err(|e| CredentialError::Malformed {
                            reference: reference.clone(),
                            reason: format!("expected a hex private key: {e}"),
                        })?;
                DeployerAccount::Local(signer)
            }
        };

        tracing::debug!(
            network = %ctx.key,
            endpoint = %ctx.rpc_endpoint.host_str().unwrap_or_default(),
            sender = %account.address(),
            local_signing = matches!(account, DeployerAccount::Local(_)),
            "Connected deployment backend"
        );

        Ok(JsonRpcBackend::new(self.client.clone(), ctx, account))
    }

    fn explorer(&self) -> EtherscanClient {
        EtherscanClient::new(self.client.clone())
    }

    fn api_key(&self, ctx: &VerificationContext) -> Result<Secret, CredentialError> {
        self.credentials.resolve(&ctx.api_key)
    }
}
