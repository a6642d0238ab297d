//! JSON-RPC deployment backend.
//!
//! Deployments are signed in-process with the private key behind the network
//! credential and broadcast with `eth_sendRawTransaction`, so any public RPC
//! endpoint will do. Accounts the endpoint holds itself (`unlocked:`
//! credentials) are sent with `eth_sendTransaction` instead.

use std::time::Duration;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U64, U128, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    Confirmation, DeployError, DeploymentBackend, DeploymentTx, GasPolicy, NetworkContext,
    PendingDeployment,
    rpc::{HttpRpc, JsonRpc, RpcError, json_rpc_call, poll_until},
};

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    transaction_hash: B256,
    block_number: Option<U64>,
    status: Option<U64>,
    contract_address: Option<Address>,
}

/// The account deployments are sent from.
#[derive(Debug, Clone)]
pub enum DeployerAccount {
    /// Signs locally.
    Local(PrivateKeySigner),
    /// The endpoint signs for this account.
    Unlocked(Address),
}

impl DeployerAccount {
    pub fn address(&self) -> Address {
        match self {
            DeployerAccount::Local(signer) => signer.address(),
            DeployerAccount::Unlocked(address) => *address,
        }
    }
}

/// [`DeploymentBackend`] talking to a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcBackend<R = HttpRpc> {
    rpc: R,
    account: DeployerAccount,
    confirmations: u64,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl JsonRpcBackend {
    pub fn new(client: reqwest::Client, ctx: &NetworkContext, account: DeployerAccount) -> Self {
        Self::with_rpc(HttpRpc::new(client, ctx.rpc_endpoint.clone()), ctx, account)
    }
}

impl<R: JsonRpc> JsonRpcBackend<R> {
    pub fn with_rpc(rpc: R, ctx: &NetworkContext, account: DeployerAccount) -> Self {
        Self {
            rpc,
            account,
            confirmations: ctx.confirmations.max(1),
            confirmation_timeout: ctx.confirmation_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        json_rpc_call(&self.rpc, method, params).await
    }

    /// The chain the endpoint serves, checked against the configured one.
    async fn chain_id(&self, expected: Option<u64>) -> Result<u64, DeployError> {
        let actual: U64 = self
            .call("eth_chainId", vec![])
            .await
            .map_err(|e| deploy_error(e, None))?;
        let actual = actual.to::<u64>();

        match expected {
            Some(expected) if expected != actual => {
                Err(DeployError::ChainIdMismatch { expected, actual })
            }
            _ => Ok(actual),
        }
    }

    /// Fill in nonce, gas price and gas limit, sign, and broadcast.
    async fn send_signed(
        &self,
        signer: &PrivateKeySigner,
        tx: &DeploymentTx,
        chain_id: u64,
    ) -> Result<B256, DeployError> {
        let sender = signer.address();

        let nonce: U64 = self
            .call(
                "eth_getTransactionCount",
                vec![json!(sender), json!("pending")],
            )
            .await
            .map_err(|e| deploy_error(e, None))?;
        let gas_price: U128 = self
            .call("eth_gasPrice", vec![])
            .await
            .map_err(|e| deploy_error(e, None))?;
        let gas_limit = match tx.gas {
            GasPolicy::Fixed(gas) => gas,
            GasPolicy::Auto => {
                let estimate: U64 = self
                    .call(
                        "eth_estimateGas",
                        vec![json!({ "from": sender, "data": tx.data() })],
                    )
                    .await
                    .map_err(|e| deploy_error(e, None))?;
                estimate.to::<u64>()
            }
        };

        let envelope = sign_creation(
            signer,
            TxLegacy {
                chain_id: Some(chain_id),
                nonce: nonce.to::<u64>(),
                gas_price: gas_price.to::<u128>(),
                gas_limit,
                to: TxKind::Create,
                value: U256::ZERO,
                input: tx.data(),
            },
        )?;

        tracing::debug!(
            sender = %sender,
            nonce = nonce.to::<u64>(),
            gas_limit,
            tx_hash = %envelope.tx_hash(),
            "Signed deployment transaction"
        );

        let raw = Bytes::from(envelope.encoded_2718());
        self.call("eth_sendRawTransaction", vec![json!(raw)])
            .await
            .map_err(|e| deploy_error(e, None))
    }

    /// The receipt, once it is `confirmations` blocks deep.
    async fn final_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RpcError> {
        let receipt: Option<Receipt> = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(mined_at) = receipt.block_number else {
            return Ok(None);
        };

        let head: U64 = self.call("eth_blockNumber", vec![]).await?;
        let depth = head.to::<u64>().saturating_sub(mined_at.to::<u64>()) + 1;

        tracing::trace!(
            tx_hash = %tx_hash,
            depth,
            required = self.confirmations,
            "Receipt found"
        );

        Ok((depth >= self.confirmations).then_some(receipt))
    }
}

impl<R: JsonRpc> DeploymentBackend for JsonRpcBackend<R> {
    fn sender(&self) -> Address {
        self.account.address()
    }

    async fn submit(&self, tx: DeploymentTx) -> Result<PendingDeployment, DeployError> {
        let chain_id = self.chain_id(tx.chain_id).await?;

        let tx_hash = match &self.account {
            DeployerAccount::Local(signer) => self.send_signed(signer, &tx, chain_id).await?,
            DeployerAccount::Unlocked(sender) => self
                .call("eth_sendTransaction", vec![transaction_request(*sender, &tx)])
                .await
                .map_err(|e| deploy_error(e, None))?,
        };

        Ok(PendingDeployment { tx_hash })
    }

    async fn await_confirmation(
        &self,
        pending: &PendingDeployment,
    ) -> Result<Confirmation, DeployError> {
        let tx_hash = pending.tx_hash;
        let what = format!("receipt of {tx_hash}");

        let receipt = poll_until(&what, self.confirmation_timeout, self.poll_interval, || {
            self.final_receipt(tx_hash)
        })
        .await
        .map_err(|e| match e {
            RpcError::Timeout { .. } => DeployError::DeploymentTimeout { tx_hash },
            other => deploy_error(other, Some(tx_hash)),
        })?;

        if receipt.status.is_some_and(|status| status.is_zero()) {
            return Err(DeployError::TransactionReverted {
                tx_hash: Some(receipt.transaction_hash),
                reason: "receipt status is 0".to_string(),
            });
        }

        let contract_address =
            receipt
                .contract_address
                .ok_or_else(|| DeployError::TransactionReverted {
                    tx_hash: Some(receipt.transaction_hash),
                    reason: "receipt has no contract address".to_string(),
                })?;

        Ok(Confirmation {
            contract_address,
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map_or(0, |n| n.to::<u64>()),
        })
    }

    async fn code_at(&self, address: Address, block: u64) -> Result<Bytes, DeployError> {
        self.call(
            "eth_getCode",
            vec![json!(address), json!(format!("{block:#x}"))],
        )
        .await
        .map_err(|e| deploy_error(e, None))
    }
}

/// EIP-155 signature over a contract creation.
fn sign_creation(signer: &PrivateKeySigner, tx: TxLegacy) -> Result<TxEnvelope, DeployError> {
    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .map_err(|e| DeployError::Signing(e.to_string()))?;
    Ok(tx.into_signed(signature).into())
}

/// Parameters of `eth_sendTransaction` for a contract creation.
fn transaction_request(sender: Address, tx: &DeploymentTx) -> Value {
    let mut request = json!({
        "from": sender,
        "data": tx.data(),
    });

    if let GasPolicy::Fixed(gas) = tx.gas {
        request["gas"] = json!(format!("{gas:#x}"));
    }
    if let Some(chain_id) = tx.chain_id {
        request["chainId"] = json!(format!("{chain_id:#x}"));
    }

    request
}

/// Map an RPC failure onto the deployment error taxonomy.
fn deploy_error(err: RpcError, tx_hash: Option<B256>) -> DeployError {
    match err {
        RpcError::Rpc { message, .. } => {
            let lower = message.to_lowercase();
            if lower.contains("insufficient funds") {
                DeployError::InsufficientFunds(message)
            } else if lower.contains("revert") {
                DeployError::TransactionReverted {
                    tx_hash,
                    reason: message,
                }
            } else {
                DeployError::RpcUnavailable(message)
            }
        }
        other => DeployError::RpcUnavailable(other.to_string()),
    }
}
