//! Balance-delta classifier.
//!
//! Turns a raw transaction into a [`TradeEvent`] for one observer wallet by
//! diffing its pre/post token balances. Pure: no I/O, no state.

use std::collections::BTreeMap;

pub mod types;

pub use types::*;

/// Wrapped SOL mint; its token-account legs are the base leg, never the asset.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Swap programs whose transactions are treated as trades.
pub const DEFAULT_DEX_PROGRAMS: &[&str] = &[
    // Jupiter aggregator v6
    "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
    // Raydium AMM v4, CPMM, CLMM
    "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
    "CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C",
    "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK",
    // Orca Whirlpool
    "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",
    // Pump.fun bonding curve and PumpSwap
    "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",
    "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA",
    // Meteora DLMM
    "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YNVaPwxo",
];

/// Classify `record` from the point of view of `wallet`.
///
/// Returns `None` for failed transactions, payloads without meta, and
/// transactions whose token changes do not form a Buy, Sell or Swap.
pub fn classify(record: &TransactionRecord, wallet: &str) -> Option<TradeEvent> {
    let meta = record.meta.as_ref()?;
    if meta.err.is_some() {
        return None;
    }

    let changes = balance_changes(meta.pre_token_balances(), meta.post_token_balances(), |b| {
        b.mint != WSOL_MINT && b.owner.as_deref() == Some(wallet)
    });
    let timestamp = record.block_time.unwrap_or_default();

    match changes.as_slice() {
        [] => None,
        [only] => {
            let direction = if only.amount > 0.0 {
                TradeDirection::Buy
            } else {
                TradeDirection::Sell
            };
            Some(TradeEvent {
                direction,
                asset_id: only.mint.clone(),
                asset_amount: only.amount,
                base_amount: native_change(meta).abs(),
                decimals: only.decimals,
                timestamp,
                sold: None,
            })
        }
        [first, second] => {
            let (sold, bought) = match (first.amount > 0.0, second.amount > 0.0) {
                (false, true) => (first, second),
                (true, false) => (second, first),
                _ => {
                    log::debug!(
                        "[Classifier] two legs with the same sign ({} {}, {} {}), not a swap",
                        first.mint,
                        first.amount,
                        second.mint,
                        second.amount
                    );
                    return None;
                }
            };
            let base_amount = wrapped_base_change(meta).unwrap_or_else(|| native_change(meta).abs());
            Some(TradeEvent {
                direction: TradeDirection::Swap,
                asset_id: bought.mint.clone(),
                asset_amount: bought.amount,
                base_amount,
                decimals: bought.decimals,
                timestamp,
                sold: Some(TradeLeg {
                    mint: sold.mint.clone(),
                    amount: sold.amount,
                }),
            })
        }
        many => {
            log::debug!("[Classifier] {} asset legs, ambiguous trade skipped", many.len());
            None
        }
    }
}

/// Non-zero changes between `pre` and `post` for the entries accepted by
/// `keep`, matched by account index.
///
/// An account present on one side only counts as zero on the other (a fresh
/// ATA has no pre entry, a closed one no post entry). Any non-zero delta
/// counts; there is no epsilon.
pub fn balance_changes<F>(pre: &[TokenBalance], post: &[TokenBalance], keep: F) -> Vec<BalanceChange>
where
    F: Fn(&TokenBalance) -> bool,
{
    let mut by_account: BTreeMap<u32, (Option<&TokenBalance>, Option<&TokenBalance>)> = BTreeMap::new();
    for balance in pre.iter().filter(|b| keep(*b)) {
        by_account.entry(balance.account_index).or_default().0 = Some(balance);
    }
    for balance in post.iter().filter(|b| keep(*b)) {
        by_account.entry(balance.account_index).or_default().1 = Some(balance);
    }

    by_account
        .into_iter()
        .filter_map(|(account_index, (before, after))| {
            let amount = after.map_or(0.0, TokenBalance::ui_amount) - before.map_or(0.0, TokenBalance::ui_amount);
            if amount == 0.0 {
                return None;
            }
            let reference = after.or(before)?;
            Some(BalanceChange {
                account_index,
                mint: reference.mint.clone(),
                amount,
                decimals: reference.decimals(),
            })
        })
        .collect()
}

/// Lamport change of the fee payer (account 0) in SOL; missing entries are zero.
pub fn native_change(meta: &TransactionMeta) -> f64 {
    let pre = meta.pre_balances.first().copied().unwrap_or(0) as i128;
    let post = meta.post_balances.first().copied().unwrap_or(0) as i128;
    (post - pre) as f64 / LAMPORTS_PER_SOL
}

/// SOL moved through wrapped-SOL accounts, regardless of owner.
///
/// A routed swap wraps and unwraps, so two legs carry the same SOL twice and
/// the sum is halved; a single leg is taken as is. `None` when no WSOL
/// account changed.
pub fn wrapped_base_change(meta: &TransactionMeta) -> Option<f64> {
    let legs = balance_changes(meta.pre_token_balances(), meta.post_token_balances(), |b| {
        b.mint == WSOL_MINT
    });
    let total: f64 = legs.iter().map(|leg| leg.amount.abs()).sum();
    match legs.len() {
        0 => None,
        1 => Some(total),
        _ => Some(total / 2.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(index: u32, mint: &str, owner: &str, amount: Option<f64>) -> TokenBalance {
        TokenBalance {
            account_index: index,
            mint: mint.to_string(),
            owner: Some(owner.to_string()),
            ui_token_amount: Some(UiTokenAmount {
                ui_amount: amount,
                decimals: 6,
            }),
        }
    }

    #[test]
    fn fresh_account_counts_from_zero() {
        let post = vec![balance(3, "MintA", "w", Some(10.0))];
        let changes = balance_changes(&[], &post, |_| true);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].amount, 10.0);
        assert_eq!(changes[0].mint, "MintA");
    }

    #[test]
    fn closed_account_counts_to_zero() {
        let pre = vec![balance(3, "MintA", "w", Some(4.0))];
        let changes = balance_changes(&pre, &[], |_| true);
        assert_eq!(changes[0].amount, -4.0);
    }

    #[test]
    fn null_ui_amount_is_zero_and_unchanged_accounts_are_dropped() {
        let pre = vec![balance(1, "MintA", "w", None), balance(2, "MintB", "w", Some(5.0))];
        let post = vec![balance(1, "MintA", "w", Some(2.5)), balance(2, "MintB", "w", Some(5.0))];
        let changes = balance_changes(&pre, &post, |_| true);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].account_index, 1);
        assert_eq!(changes[0].amount, 2.5);
    }

    #[test]
    fn native_change_handles_missing_balances() {
        let meta = TransactionMeta {
            pre_balances: vec![3_000_000_000],
            post_balances: vec![],
            ..Default::default()
        };
        assert_eq!(native_change(&meta), -3.0);
        assert_eq!(native_change(&TransactionMeta::default()), 0.0);
    }

    #[test]
    fn wrapped_base_is_halved_for_round_trips() {
        let meta = TransactionMeta {
            pre_token_balances: Some(vec![
                balance(4, WSOL_MINT, "w", Some(0.0)),
                balance(9, WSOL_MINT, "pool", Some(100.0)),
            ]),
            post_token_balances: Some(vec![
                balance(4, WSOL_MINT, "w", Some(0.0)),
                balance(9, WSOL_MINT, "pool", Some(101.5)),
            ]),
            ..Default::default()
        };
        assert_eq!(wrapped_base_change(&meta), Some(1.5));

        let meta = TransactionMeta {
            pre_token_balances: Some(vec![
                balance(4, WSOL_MINT, "w", Some(2.0)),
                balance(9, WSOL_MINT, "pool", Some(100.0)),
            ]),
            post_token_balances: Some(vec![
                balance(4, WSOL_MINT, "w", Some(0.0)),
                balance(9, WSOL_MINT, "pool", Some(102.0)),
            ]),
            ..Default::default()
        };
        assert_eq!(wrapped_base_change(&meta), Some(2.0));
        assert_eq!(wrapped_base_change(&TransactionMeta::default()), None);
    }
}
