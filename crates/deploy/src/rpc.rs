//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::{future::Future, time::Duration};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{method} request failed: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} returned error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("failed to decode {method} result: {reason}")]
    Decode { method: String, reason: String },
    #[error("timeout waiting for {what} after {elapsed:?}")]
    Timeout { what: String, elapsed: Duration },
}

impl RpcError {
    /// Whether the node answered at all. Transport failures are worth retrying.
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }
}

/// Create an HTTP client configured for JSON-RPC and explorer requests.
///
/// One client is shared by every run so connections are pooled.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// A JSON-RPC endpoint.
pub trait JsonRpc: Send + Sync {
    /// Send one request and return the raw `result` value.
    fn request(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<Value, RpcError>> + Send;
}

/// JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRpc {
    client: reqwest::Client,
    url: Url,
}

impl HttpRpc {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

impl JsonRpc for HttpRpc {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let transport = |source| RpcError::Transport {
            method: method.to_string(),
            source,
        };

        let response: Value = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;

        if let Some(error) = response.get("error") {
            return Err(RpcError::Rpc {
                method: method.to_string(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        response.get("result").cloned().ok_or_else(|| RpcError::Decode {
            method: method.to_string(),
            reason: "no result in response".to_string(),
        })
    }
}

/// Make a JSON-RPC call and deserialize the result.
///
/// A `null` result deserializes into `Option::None` when `T` is an option,
/// which is how pending receipts are reported.
///
/// # Arguments
/// * `rpc` - The endpoint to call
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an [`RpcError`] if the request failed, the node
/// answered with an error object, or the result has an unexpected shape.
pub async fn json_rpc_call<T: DeserializeOwned>(
    rpc: &impl JsonRpc,
    method: &str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let result = rpc.request(method, params).await?;

    serde_json::from_value(result).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

/// Poll `check_fn` every `interval` until it yields a value or `timeout` elapses.
///
/// Transport failures are logged and retried; any other error ends the wait.
///
/// # Arguments
/// * `what` - What is being waited for (for logs and the timeout error)
/// * `timeout` - Maximum time to wait
/// * `interval` - Delay between checks
/// * `check_fn` - Returns `Ok(Some(value))` once ready, `Ok(None)` to keep waiting
///
/// # Returns
/// The first value `check_fn` yields, [`RpcError::Timeout`] when the next
/// check would start past `timeout`, or the first non-transport error.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check_fn: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, RpcError>>,
{
    let start = tokio::time::Instant::now();

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                tracing::trace!(what, "Not ready yet, retrying...");
            }
            Err(e) if e.is_transport() => {
                tracing::debug!(error = %e, what, "Transport error while polling, retrying...");
            }
            Err(e) => return Err(e),
        }

        if start.elapsed() + interval > timeout {
            return Err(RpcError::Timeout {
                what: what.to_string(),
                elapsed: start.elapsed(),
            });
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_ready() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();

        let value = poll_until("receipt", Duration::from_secs(60), Duration::from_secs(2), || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok((n == 3).then_some(n))
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_timeout() {
        let result: Result<(), _> =
            poll_until("receipt", Duration::from_secs(10), Duration::from_secs(3), || async {
                Ok(None)
            })
            .await;

        assert!(matches!(result, Err(RpcError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_stops_on_rpc_error() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> =
            poll_until("receipt", Duration::from_secs(60), Duration::from_secs(2), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RpcError::Rpc {
                        method: "eth_getTransactionReceipt".to_string(),
                        code: -32000,
                        message: "boom".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(RpcError::Rpc { code: -32000, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
