use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use tokio::time::sleep;

use crate::common::config::RuntimeConfig;
use crate::common::logger::Logger;
use crate::common::rpc_client::{RpcClient, SignatureStatus};
use crate::universal::classifier::WSOL_MINT;
use crate::universal::ratchet::ExitReason;

const QUOTE_API: &str = "https://quote-api.jup.ag/v6/quote";
const SWAP_API: &str = "https://quote-api.jup.ag/v6/swap";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    DryRun,
    Live,
}

impl ExecutionMode {
    /// Case-insensitive; anything other than `LIVE` is a dry run.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "LIVE" => ExecutionMode::Live,
            _ => ExecutionMode::DryRun,
        }
    }
}

/// A request to sell `amount` (UI units) of `asset_id` back to SOL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExitOrder {
    pub asset_id: String,
    pub amount: f64,
    pub decimals: u8,
    pub reason: ExitReason,
    /// Sample price that triggered the exit, SOL per token.
    pub trigger_price: f64,
}

impl ExitOrder {
    /// `amount` in raw token units, rounded down.
    pub fn raw_amount(&self) -> u64 {
        let scaled = (self.amount * 10f64.powi(self.decimals as i32)).floor();
        if scaled.is_finite() && scaled > 0.0 {
            scaled as u64
        } else {
            0
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ExitReceipt {
    pub mode: &'static str,
    pub signature: String,
}

/// Sells a position back to SOL.
///
/// `Ok` means the swap is confirmed on-chain; `Err` means it is not, and the
/// caller keeps the position open.
#[async_trait]
pub trait ExitExecutor: Send + Sync {
    async fn liquidate(&self, order: &ExitOrder) -> Result<ExitReceipt>;
}

/// Logs the order and reports success without touching the chain.
pub struct DryRunExitExecutor {
    logger: Logger,
}

impl DryRunExitExecutor {
    pub fn new() -> Self {
        Self {
            logger: Logger::new("DryRun"),
        }
    }
}

impl Default for DryRunExitExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExitExecutor for DryRunExitExecutor {
    async fn liquidate(&self, order: &ExitOrder) -> Result<ExitReceipt> {
        self.logger.log(format!(
            "Execution bypassed: sell {} of {} at {:.10} ({:?})",
            order.amount, order.asset_id, order.trigger_price, order.reason
        ));
        Ok(ExitReceipt {
            mode: "DRY_RUN",
            signature: "not-sent".into(),
        })
    }
}

/// One venue-specific way to sell: quote, build, sign and broadcast a swap,
/// then report on the broadcast signature.
#[async_trait]
pub trait SwapRoute: Send + Sync {
    /// Broadcast one sell of `raw_amount` units; returns the signature.
    async fn broadcast(&self, order: &ExitOrder, raw_amount: u64) -> Result<String>;

    async fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>>;
}

/// Drives a [`SwapRoute`] until one sell lands.
///
/// Failures before a broadcast are retried up to `max_retries` times. A
/// broadcast signature is never re-sent: if it does not confirm in time the
/// exit fails, and the signature is kept as pending for the asset. The next
/// exit for that asset checks the pending signature first and only sends a
/// new swap once it is known not to have landed.
pub struct SwapExitExecutor<R> {
    route: R,
    max_retries: usize,
    confirm_timeout: Duration,
    poll_interval: Duration,
    pending: DashMap<String, String>,
    logger: Logger,
}

impl<R: SwapRoute> SwapExitExecutor<R> {
    pub fn new(route: R, max_retries: usize, confirm_timeout: Duration) -> Self {
        Self {
            route,
            max_retries: max_retries.max(1),
            confirm_timeout,
            poll_interval: Duration::from_secs(1),
            pending: DashMap::new(),
            logger: Logger::new("Executor"),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn route(&self) -> &R {
        &self.route
    }

    /// Signature of an earlier exit for `asset_id` whose outcome is unknown.
    pub fn pending_signature(&self, asset_id: &str) -> Option<String> {
        self.pending.get(asset_id).map(|s| s.value().clone())
    }

    async fn confirm(&self, signature: &str) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.route.signature_status(signature).await {
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        bail!("swap {} failed on-chain: {}", signature, err);
                    }
                    if status.is_confirmed() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => self.logger.warn(format!("Status poll for {} failed: {:#}", signature, e)),
            }
            if started.elapsed() >= self.confirm_timeout {
                bail!("swap {} not confirmed within {:?}", signature, self.confirm_timeout);
            }
            sleep(self.poll_interval).await;
        }
    }

    fn landed(&self, order: &ExitOrder, signature: String) -> ExitReceipt {
        self.pending.remove(&order.asset_id);
        self.logger.log(format!(
            "Swap successful for {}: https://solscan.io/tx/{}",
            order.asset_id, signature
        ));
        ExitReceipt {
            mode: "LIVE",
            signature,
        }
    }
}

#[async_trait]
impl<R: SwapRoute> ExitExecutor for SwapExitExecutor<R> {
    async fn liquidate(&self, order: &ExitOrder) -> Result<ExitReceipt> {
        let raw_amount = order.raw_amount();
        if raw_amount == 0 {
            bail!("exit for {} rounds to zero raw units", order.asset_id);
        }

        if let Some(signature) = self.pending_signature(&order.asset_id) {
            match self.confirm(&signature).await {
                Ok(()) => return Ok(self.landed(order, signature)),
                Err(e) => {
                    self.logger.warn(format!(
                        "Earlier exit {} for {} did not land, sending a new one: {:#}",
                        signature, order.asset_id, e
                    ));
                    self.pending.remove(&order.asset_id);
                }
            }
        }

        let mut last_err = None;
        for attempt in 1..=self.max_retries {
            match self.route.broadcast(order, raw_amount).await {
                Ok(signature) => {
                    self.logger.log(format!("Sent exit for {}: {}", order.asset_id, signature));
                    self.pending.insert(order.asset_id.clone(), signature.clone());
                    self.confirm(&signature)
                        .await
                        .with_context(|| format!("exit for {} unconfirmed", order.asset_id))?;
                    return Ok(self.landed(order, signature));
                }
                Err(e) => {
                    self.logger.warn(format!(
                        "Exit attempt {}/{} for {} failed: {:#}",
                        attempt, self.max_retries, order.asset_id, e
                    ));
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow!("no attempt made"))
            .context(format!("exit for {} failed after {} attempts", order.asset_id, self.max_retries)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

/// Jupiter v6: quote, build, sign and broadcast through the RPC client.
pub struct JupiterRoute {
    http: Client,
    rpc: RpcClient,
    keypair: Keypair,
    slippage_bps: u16,
    priority_fee_lamports: u64,
}

pub type JupiterExitExecutor = SwapExitExecutor<JupiterRoute>;

impl JupiterRoute {
    pub fn new(rpc: RpcClient, keypair: Keypair, slippage_bps: u16, priority_fee_lamports: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build jupiter http client")?;
        Ok(Self {
            http,
            rpc,
            keypair,
            slippage_bps,
            priority_fee_lamports,
        })
    }

    pub fn wallet(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    async fn quote(&self, order: &ExitOrder, raw_amount: u64) -> Result<Value> {
        let url = format!(
            "{}?inputMint={}&outputMint={}&amount={}&slippageBps={}&restrictIntermediateTokens=true",
            QUOTE_API, order.asset_id, WSOL_MINT, raw_amount, self.slippage_bps
        );
        let quote: Value = self
            .http
            .get(&url)
            .send()
            .await
            .context("quote request failed")?
            .error_for_status()
            .context("quote rejected")?
            .json()
            .await
            .context("quote body was not json")?;
        if let Some(err) = quote.get("error") {
            bail!("quote error: {}", err);
        }
        Ok(quote)
    }

    async fn build(&self, quote: Value) -> Result<VersionedTransaction> {
        let body = json!({
            "quoteResponse": quote,
            "userPublicKey": self.wallet(),
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": {
                "priorityLevelWithMaxLamports": {
                    "maxLamports": self.priority_fee_lamports,
                    "global": false,
                    "priorityLevel": "veryHigh",
                }
            },
        });
        let swap: SwapResponse = self
            .http
            .post(SWAP_API)
            .json(&body)
            .send()
            .await
            .context("swap request failed")?
            .error_for_status()
            .context("swap rejected")?
            .json()
            .await
            .context("swap body missing swapTransaction")?;
        let bytes = base64::decode(&swap.swap_transaction).context("swapTransaction is not base64")?;
        bincode::deserialize(&bytes).context("swapTransaction is not a versioned transaction")
    }

    fn sign(&self, unsigned: VersionedTransaction) -> Result<String> {
        let signed = VersionedTransaction::try_new(unsigned.message, &[&self.keypair])
            .map_err(|e| anyhow!("failed to sign swap: {}", e))?;
        let bytes = bincode::serialize(&signed).context("failed to serialize signed swap")?;
        Ok(base64::encode(bytes))
    }
}

#[async_trait]
impl SwapRoute for JupiterRoute {
    async fn broadcast(&self, order: &ExitOrder, raw_amount: u64) -> Result<String> {
        let quote = self.quote(order, raw_amount).await?;
        let unsigned = self.build(quote).await?;
        let tx = self.sign(unsigned)?;
        self.rpc.send_transaction(&tx).await
    }

    async fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>> {
        self.rpc.get_signature_status(signature).await
    }
}

impl SwapExitExecutor<JupiterRoute> {
    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        let secret = cfg
            .wallet_private_key
            .as_deref()
            .ok_or_else(|| anyhow!("WALLET_PRIVATE_KEY must be set for LIVE execution"))?;
        let route = JupiterRoute::new(
            RpcClient::from_config(cfg)?,
            keypair_from_base58(secret)?,
            cfg.slippage_bps,
            cfg.priority_fee_lamports,
        )?;
        Ok(Self::new(route, cfg.max_swap_retries, cfg.confirm_timeout()))
    }

    pub fn wallet(&self) -> String {
        self.route.wallet()
    }
}

/// Decode a base58 64-byte secret key.
pub fn keypair_from_base58(secret: &str) -> Result<Keypair> {
    let bytes = bs58::decode(secret.trim())
        .into_vec()
        .context("wallet key is not base58")?;
    Keypair::from_bytes(&bytes).map_err(|e| anyhow!("invalid wallet keypair: {}", e))
}
