use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A transaction as delivered by `getTransaction` / raw Helius webhooks.
///
/// Everything is optional or defaulted: a payload missing fields classifies
/// as "no event" rather than failing to parse.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub meta: Option<TransactionMeta>,
    #[serde(default)]
    pub transaction: Option<TransactionBody>,
}

impl TransactionRecord {
    /// The fee payer, i.e. the first account key.
    pub fn fee_payer(&self) -> Option<&str> {
        self.transaction
            .as_ref()?
            .message
            .as_ref()?
            .account_keys
            .first()
            .map(AccountKey::pubkey)
    }

    /// Every account key the message references, fee payer first.
    pub fn account_keys(&self) -> impl Iterator<Item = &str> {
        self.transaction
            .iter()
            .filter_map(|t| t.message.as_ref())
            .flat_map(|m| m.account_keys.iter().map(AccountKey::pubkey))
    }

    /// Whether any of `programs` appears among the account keys.
    pub fn references_any(&self, programs: &[String]) -> bool {
        self.account_keys().any(|key| programs.iter().any(|p| p == key))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    /// Execution error; `null` on success.
    #[serde(default)]
    pub err: Option<Value>,
    /// Native lamport balances, indexed like the account keys.
    #[serde(default)]
    pub pre_balances: Vec<u64>,
    #[serde(default)]
    pub post_balances: Vec<u64>,
    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
}

impl TransactionMeta {
    pub fn pre_token_balances(&self) -> &[TokenBalance] {
        self.pre_token_balances.as_deref().unwrap_or_default()
    }

    pub fn post_token_balances(&self) -> &[TokenBalance] {
        self.post_token_balances.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: u32,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub ui_token_amount: Option<UiTokenAmount>,
}

impl TokenBalance {
    /// UI amount, zero when absent.
    pub fn ui_amount(&self) -> f64 {
        self.ui_token_amount
            .as_ref()
            .and_then(|a| a.ui_amount)
            .unwrap_or(0.0)
    }

    pub fn decimals(&self) -> u8 {
        self.ui_token_amount.as_ref().map(|a| a.decimals).unwrap_or(0)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    #[serde(default)]
    pub ui_amount: Option<f64>,
    #[serde(default)]
    pub decimals: u8,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionBody {
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub account_keys: Vec<AccountKey>,
}

/// Account keys arrive as plain strings or, with `jsonParsed` encoding, as
/// objects carrying a `pubkey`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountKey {
    Plain(String),
    Parsed { pubkey: String },
}

impl AccountKey {
    pub fn pubkey(&self) -> &str {
        match self {
            AccountKey::Plain(key) => key,
            AccountKey::Parsed { pubkey } => pubkey,
        }
    }
}

/// Non-zero change of one token account between pre and post balances.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceChange {
    pub account_index: u32,
    pub mint: String,
    pub amount: f64,
    pub decimals: u8,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
    Swap,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TradeLeg {
    pub mint: String,
    /// Signed UI amount; negative for the leg that left the wallet.
    pub amount: f64,
}

/// Classified trade for the observer wallet.
///
/// `asset_id` is the acquired mint for `Buy`/`Swap` and the sold mint for
/// `Sell`; `asset_amount` is signed accordingly. `base_amount` is the absolute
/// SOL leg of the trade.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TradeEvent {
    pub direction: TradeDirection,
    pub asset_id: String,
    pub asset_amount: f64,
    pub base_amount: f64,
    pub decimals: u8,
    /// Block time in unix seconds, 0 when the payload carried none.
    pub timestamp: i64,
    /// The leg given up in a `Swap`.
    pub sold: Option<TradeLeg>,
}

impl TradeEvent {
    /// True when the wallet ended the trade holding more of `asset_id`.
    pub fn is_acquisition(&self) -> bool {
        matches!(self.direction, TradeDirection::Buy | TradeDirection::Swap) && self.asset_amount > 0.0
    }

    /// Cost basis per token in SOL, net of the deployment's fixed fee offset.
    ///
    /// `None` for disposals and whenever the result is not a positive finite
    /// number (e.g. the fee offset swallows the whole base leg).
    pub fn entry_price(&self, fee_offset: f64) -> Option<f64> {
        if !self.is_acquisition() {
            return None;
        }
        let price = (self.base_amount - fee_offset) / self.asset_amount;
        (price.is_finite() && price > 0.0).then_some(price)
    }
}
