use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::common::config::RuntimeConfig;

/// Status of a broadcast transaction as reported by `getSignatureStatuses`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    #[serde(default)]
    pub confirmation_status: Option<String>,
    #[serde(default)]
    pub err: Option<Value>,
}

impl SignatureStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

/// JSON-RPC client with endpoint failover and exponential backoff.
///
/// Transport failures and non-success HTTP statuses are retried against the
/// current endpoint `retry_attempts` times before rotating to the next one.
/// A JSON-RPC `error` object is returned immediately: the node answered, so
/// another endpoint would answer the same.
#[derive(Clone)]
pub struct RpcClient {
    endpoints: Arc<Vec<String>>,
    cur_idx: Arc<AtomicUsize>,
    client: Client,
    retry_attempts: usize,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
}

impl RpcClient {
    pub fn new(
        endpoints: Vec<String>,
        retry_attempts: usize,
        timeout: Duration,
        backoff_base_ms: u64,
        backoff_max_ms: u64,
    ) -> Result<Self> {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if endpoints.is_empty() {
            bail!("no rpc endpoints provided");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build rpc http client")?;
        Ok(Self {
            endpoints: Arc::new(endpoints),
            cur_idx: Arc::new(AtomicUsize::new(0)),
            client,
            retry_attempts: retry_attempts.max(1),
            backoff_base_ms,
            backoff_max_ms,
        })
    }

    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        Self::new(
            cfg.rpc_endpoints.clone(),
            cfg.rpc_retry_attempts,
            cfg.rpc_timeout(),
            cfg.rpc_backoff_base_ms,
            cfg.rpc_backoff_max_ms,
        )
    }

    fn current_endpoint(&self) -> String {
        let idx = self.cur_idx.load(Ordering::Relaxed) % self.endpoints.len();
        self.endpoints[idx].clone()
    }

    fn failover_to_next(&self) {
        let next = (self.cur_idx.load(Ordering::Relaxed) + 1) % self.endpoints.len();
        self.cur_idx.store(next, Ordering::Relaxed);
        log::warn!("RPC failover: switching to endpoint index {}", next);
    }

    async fn exponential_backoff_delay(&self, attempt: usize) {
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.backoff_max_ms);
        sleep(Duration::from_millis(delay)).await;
    }

    /// Perform a JSON-RPC call and return its `result` field.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        for _round in 0..self.endpoints.len() {
            let url = self.current_endpoint();

            for attempt in 0..self.retry_attempts {
                match self.client.post(&url).json(&payload).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        let mut body: Value = resp
                            .json()
                            .await
                            .with_context(|| format!("invalid json-rpc body from {}", url))?;
                        if let Some(err) = body.get("error") {
                            bail!("{} rejected by {}: {}", method, url, err);
                        }
                        return Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null));
                    }
                    Ok(resp) => {
                        log::warn!("RPC endpoint {} returned non-success status: {}", url, resp.status());
                    }
                    Err(e) => {
                        log::warn!("RPC request to {} failed on attempt {}: {}", url, attempt, e);
                    }
                }
                self.exponential_backoff_delay(attempt).await;
            }

            self.failover_to_next();
        }

        Err(anyhow!("{}: all rpc endpoints failed after retries", method))
    }

    /// Broadcast a base64-encoded signed transaction; returns its signature.
    pub async fn send_transaction(&self, tx_base64: &str) -> Result<String> {
        let result = self
            .call(
                "sendTransaction",
                json!([tx_base64, { "encoding": "base64", "skipPreflight": true, "maxRetries": 2 }]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("sendTransaction returned no signature: {}", result))
    }

    /// Status for a single signature, `None` while the cluster has not seen it.
    pub async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": false }]),
            )
            .await?;
        let entry = result
            .get("value")
            .and_then(|v| v.get(0))
            .cloned()
            .unwrap_or(Value::Null);
        if entry.is_null() {
            return Ok(None);
        }
        serde_json::from_value(entry)
            .map(Some)
            .context("malformed signature status")
    }
}
