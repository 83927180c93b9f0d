use serde_json::{json, Value};

use solana_ratchet_exit::universal::classifier::{
    classify, TradeDirection, TransactionRecord, DEFAULT_DEX_PROGRAMS, WSOL_MINT,
};

const WALLET: &str = "Wa11etObserver1111111111111111111111111111111";
const OTHER: &str = "SomeoneE1se11111111111111111111111111111111";
const MINT_A: &str = "MintA111111111111111111111111111111111111111";
const MINT_B: &str = "MintB111111111111111111111111111111111111111";

fn token(index: u32, mint: &str, owner: &str, ui_amount: f64, decimals: u8) -> Value {
    json!({
        "accountIndex": index,
        "mint": mint,
        "owner": owner,
        "uiTokenAmount": { "uiAmount": ui_amount, "decimals": decimals }
    })
}

fn record(pre_lamports: u64, post_lamports: u64, pre: Vec<Value>, post: Vec<Value>) -> TransactionRecord {
    serde_json::from_value(json!({
        "blockTime": 1_700_000_000,
        "meta": {
            "err": null,
            "preBalances": [pre_lamports, 2_039_280],
            "postBalances": [post_lamports, 2_039_280],
            "preTokenBalances": pre,
            "postTokenBalances": post
        },
        "transaction": { "message": { "accountKeys": [WALLET, OTHER] } }
    }))
    .unwrap()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-12
}

#[test]
fn single_positive_leg_is_a_buy() {
    // 1.004 SOL spent for 1000 tokens into a fresh token account.
    let tx = record(10_000_000_000, 8_996_000_000, vec![], vec![token(3, MINT_A, WALLET, 1000.0, 6)]);
    let event = classify(&tx, WALLET).unwrap();

    assert_eq!(event.direction, TradeDirection::Buy);
    assert_eq!(event.asset_id, MINT_A);
    assert_eq!(event.asset_amount, 1000.0);
    assert!(approx(event.base_amount, 1.004));
    assert_eq!(event.decimals, 6);
    assert_eq!(event.timestamp, 1_700_000_000);
    assert!(approx(event.entry_price(0.004).unwrap(), 0.001));
}

#[test]
fn single_negative_leg_is_a_sell_and_not_an_acquisition() {
    let tx = record(
        1_000_000_000,
        1_500_000_000,
        vec![token(3, MINT_A, WALLET, 1000.0, 6)],
        vec![token(3, MINT_A, WALLET, 400.0, 6)],
    );
    let event = classify(&tx, WALLET).unwrap();

    assert_eq!(event.direction, TradeDirection::Sell);
    assert_eq!(event.asset_id, MINT_A);
    assert_eq!(event.asset_amount, -600.0);
    assert!(approx(event.base_amount, 0.5));
    assert!(!event.is_acquisition());
    assert_eq!(event.entry_price(0.004), None);
}

#[test]
fn opposite_legs_are_a_swap_into_the_positive_leg() {
    let tx = record(
        5_000_000_000,
        4_995_000_000,
        vec![
            token(3, MINT_A, WALLET, 50.0, 6),
            token(4, WSOL_MINT, OTHER, 10.0, 9),
            token(5, WSOL_MINT, OTHER, 0.0, 9),
        ],
        vec![
            token(3, MINT_A, WALLET, 0.0, 6),
            token(4, WSOL_MINT, OTHER, 8.0, 9),
            token(5, WSOL_MINT, OTHER, 2.0, 9),
            token(6, MINT_B, WALLET, 300.0, 9),
        ],
    );
    let event = classify(&tx, WALLET).unwrap();

    assert_eq!(event.direction, TradeDirection::Swap);
    assert_eq!(event.asset_id, MINT_B);
    assert_eq!(event.asset_amount, 300.0);
    assert_eq!(event.decimals, 9);
    // Two WSOL legs of 2 each carry the same SOL twice.
    assert!(approx(event.base_amount, 2.0));
    let sold = event.sold.as_ref().unwrap();
    assert_eq!(sold.mint, MINT_A);
    assert_eq!(sold.amount, -50.0);
    assert!(event.is_acquisition());
}

#[test]
fn swap_without_wrapped_sol_uses_native_change() {
    let tx = record(
        5_000_000_000,
        3_000_000_000,
        vec![token(3, MINT_A, WALLET, 50.0, 6)],
        vec![token(3, MINT_A, WALLET, 0.0, 6), token(6, MINT_B, WALLET, 300.0, 9)],
    );
    let event = classify(&tx, WALLET).unwrap();
    assert_eq!(event.direction, TradeDirection::Swap);
    assert!(approx(event.base_amount, 2.0));
}

#[test]
fn failed_transactions_are_dropped() {
    let mut tx = record(10_000_000_000, 8_996_000_000, vec![], vec![token(3, MINT_A, WALLET, 1000.0, 6)]);
    tx.meta.as_mut().unwrap().err = Some(json!({ "InstructionError": [2, "Custom"] }));
    assert!(classify(&tx, WALLET).is_none());
}

#[test]
fn no_owned_change_yields_nothing() {
    let unchanged = record(
        10_000_000_000,
        9_999_995_000,
        vec![token(3, MINT_A, WALLET, 5.0, 6)],
        vec![token(3, MINT_A, WALLET, 5.0, 6)],
    );
    assert!(classify(&unchanged, WALLET).is_none());

    let someone_else = record(10_000_000_000, 9_000_000_000, vec![], vec![token(3, MINT_A, OTHER, 5.0, 6)]);
    assert!(classify(&someone_else, WALLET).is_none());

    // Wrapped SOL alone is never the asset.
    let wrap_only = record(10_000_000_000, 9_000_000_000, vec![], vec![token(3, WSOL_MINT, WALLET, 1.0, 9)]);
    assert!(classify(&wrap_only, WALLET).is_none());
}

#[test]
fn same_sign_or_many_legs_are_ambiguous() {
    let both_up = record(
        10_000_000_000,
        9_000_000_000,
        vec![],
        vec![token(3, MINT_A, WALLET, 1.0, 6), token(4, MINT_B, WALLET, 1.0, 6)],
    );
    assert!(classify(&both_up, WALLET).is_none());

    let three = record(
        10_000_000_000,
        9_000_000_000,
        vec![token(5, "MintC", WALLET, 1.0, 6)],
        vec![token(3, MINT_A, WALLET, 1.0, 6), token(4, MINT_B, WALLET, 1.0, 6)],
    );
    assert!(classify(&three, WALLET).is_none());
}

#[test]
fn payload_without_meta_is_ignored() {
    let tx: TransactionRecord = serde_json::from_value(json!({ "blockTime": 1 })).unwrap();
    assert!(classify(&tx, WALLET).is_none());
    assert_eq!(tx.fee_payer(), None);
}

#[test]
fn fee_payer_comes_from_first_account_key() {
    let tx = record(1, 1, vec![], vec![]);
    assert_eq!(tx.fee_payer(), Some(WALLET));

    let parsed: TransactionRecord = serde_json::from_value(json!({
        "transaction": { "message": { "accountKeys": [{ "pubkey": OTHER, "signer": true }] } }
    }))
    .unwrap();
    assert_eq!(parsed.fee_payer(), Some(OTHER));
}

#[test]
fn dex_programs_are_matched_in_plain_and_parsed_keys() {
    let jupiter = DEFAULT_DEX_PROGRAMS[0];
    let allowlist: Vec<String> = DEFAULT_DEX_PROGRAMS.iter().map(|p| p.to_string()).collect();

    let plain: TransactionRecord = serde_json::from_value(json!({
        "transaction": { "message": { "accountKeys": [WALLET, jupiter] } }
    }))
    .unwrap();
    assert!(plain.references_any(&allowlist));
    assert_eq!(plain.account_keys().collect::<Vec<_>>(), vec![WALLET, jupiter]);

    let parsed: TransactionRecord = serde_json::from_value(json!({
        "transaction": { "message": { "accountKeys": [
            { "pubkey": WALLET, "signer": true, "writable": true },
            { "pubkey": OTHER, "signer": false, "writable": false }
        ] } }
    }))
    .unwrap();
    assert!(!parsed.references_any(&allowlist));
    assert!(!parsed.references_any(&[]));
}
