use serde::{Deserialize, Serialize};

use super::ExitStrategy;
use crate::universal::positions::Position;

/// Why a position is being liquidated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum ExitReason {
    /// Price reached `entry * hard_exit_multiple`.
    HardExit,
    /// Price fell to or through the armed stop.
    StopHit { stop_price: f64 },
}

/// Outcome of evaluating one price sample against one position.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum ExitDecision {
    /// Sample was zero, negative or not a number; nothing was evaluated.
    Skip,
    /// Nothing to do.
    Hold,
    /// A new rung was crossed and the stop (possibly) raised.
    StopRaised { ladder_index: usize, stop_price: f64 },
    /// Sell `fraction` of the position.
    Liquidate { fraction: f64, reason: ExitReason },
}

impl ExitDecision {
    pub fn is_liquidate(&self) -> bool {
        matches!(self, ExitDecision::Liquidate { .. })
    }
}

/// Advance `position` by one price sample.
///
/// Order of checks:
/// 1. hard exit ceiling, which bypasses the ladder;
/// 2. at most one ladder rung above `ladder_index`, arming its stop;
/// 3. the armed stop.
///
/// Boundaries are inclusive. The stop is only ever raised. `position` keeps
/// any ladder progress even when the decision is not a liquidation.
pub fn evaluate(position: &mut Position, live_price: f64, strategy: &ExitStrategy) -> ExitDecision {
    if !(live_price.is_finite() && live_price > 0.0) {
        return ExitDecision::Skip;
    }
    position.last_price = Some(live_price);
    let entry = position.entry_price;

    if live_price >= entry * strategy.hard_exit_multiple {
        return ExitDecision::Liquidate {
            fraction: 1.0,
            reason: ExitReason::HardExit,
        };
    }

    let start = position.ladder_index.map_or(0, |i| i + 1);
    let crossed = strategy
        .ladder
        .rungs()
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, rung)| live_price >= entry * rung.take_profit_multiple);

    let mut advanced = None;
    if let Some((index, rung)) = crossed {
        position.ladder_index = Some(index);
        if !position.raise_stop(entry * rung.arm_stop_multiple) {
            log::warn!(
                "[Ratchet] {} rung {} would not raise stop {:.10}, keeping it",
                position.asset_id,
                index,
                position.stop_price
            );
        }
        advanced = Some(index);
    }

    if position.is_stop_armed() && live_price <= position.stop_price {
        return ExitDecision::Liquidate {
            fraction: 1.0,
            reason: ExitReason::StopHit {
                stop_price: position.stop_price,
            },
        };
    }

    match advanced {
        Some(ladder_index) => ExitDecision::StopRaised {
            ladder_index,
            stop_price: position.stop_price,
        },
        None => ExitDecision::Hold,
    }
}
