use serde::{Deserialize, Serialize};

/// An open position in one asset, keyed by its mint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    /// Token mint public key in base58 string form.
    pub asset_id: String,
    /// Cost basis per token, in SOL.
    pub entry_price: f64,
    /// Tokens held, UI units.
    pub size: f64,
    /// Mint decimals, used to convert `size` into raw units on exit.
    pub decimals: u8,
    /// Highest ladder rung crossed so far; `None` until the first one.
    pub ladder_index: Option<usize>,
    /// Armed stop in SOL per token; 0 means no stop is armed.
    pub stop_price: f64,
    /// Unix timestamp (seconds) of the trade that opened the position.
    pub opened_at: i64,
    /// Last valid price sample seen for this asset.
    #[serde(default)]
    pub last_price: Option<f64>,
}

impl Position {
    pub fn new(asset_id: &str, entry_price: f64, size: f64, decimals: u8, opened_at: i64) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            entry_price,
            size,
            decimals,
            ladder_index: None,
            stop_price: 0.0,
            opened_at,
            last_price: None,
        }
    }

    pub fn is_stop_armed(&self) -> bool {
        self.stop_price > 0.0
    }

    /// Ratchet the stop up to `candidate`.
    ///
    /// A candidate at or below the current stop leaves it untouched; returns
    /// whether the stop moved.
    pub fn raise_stop(&mut self, candidate: f64) -> bool {
        if candidate.is_finite() && candidate > self.stop_price {
            self.stop_price = candidate;
            true
        } else {
            false
        }
    }

    /// Live price as a multiple of the entry price.
    pub fn multiple(&self, price: f64) -> f64 {
        price / self.entry_price
    }
}

/// Callbacks fired by the store after a position is opened, changed or closed.
///
/// Used to keep the price feed subscription and the on-disk cache in step with
/// the store. Implementations must not call back into the store.
pub trait PositionObserver: Send + Sync {
    fn on_open(&self, position: &Position);

    fn on_update(&self, _position: &Position) {}

    fn on_close(&self, asset_id: &str);
}
