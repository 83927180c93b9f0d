//! Ratchet exit state machine.
//!
//! Scenario tests on the default two-rung ladder plus property tests:
//! 1. Stop monotonicity over random price paths
//! 2. No stop or exit below the first rung
//! 3. Hard exit precedence over the stop

use proptest::prelude::*;
use solana_ratchet_exit::universal::positions::Position;
use solana_ratchet_exit::universal::ratchet::{
    evaluate, ExitDecision, ExitReason, ExitStrategy, Ladder, LadderRung,
};

fn fresh(entry: f64) -> Position {
    Position::new("mintX", entry, 100.0, 6, 1_700_000_000)
}

#[test]
fn ladder_arms_then_stop_liquidates() {
    let strategy = ExitStrategy::default();
    let mut pos = fresh(1.0);

    assert_eq!(
        evaluate(&mut pos, 1.5, &strategy),
        ExitDecision::StopRaised {
            ladder_index: 0,
            stop_price: 1.0
        }
    );
    assert_eq!(pos.ladder_index, Some(0));
    assert_eq!(pos.stop_price, 1.0);

    assert_eq!(evaluate(&mut pos, 1.2, &strategy), ExitDecision::Hold);

    assert_eq!(
        evaluate(&mut pos, 0.95, &strategy),
        ExitDecision::Liquidate {
            fraction: 1.0,
            reason: ExitReason::StopHit { stop_price: 1.0 }
        }
    );
}

#[test]
fn jump_to_ceiling_is_a_hard_exit() {
    let strategy = ExitStrategy::default();
    let mut pos = fresh(1.0);
    assert_eq!(
        evaluate(&mut pos, 2.2, &strategy),
        ExitDecision::Liquidate {
            fraction: 1.0,
            reason: ExitReason::HardExit
        }
    );
    // The ladder was bypassed.
    assert_eq!(pos.ladder_index, None);
}

#[test]
fn boundaries_are_inclusive() {
    let strategy = ExitStrategy::default();
    let mut pos = fresh(1.0);

    assert!(matches!(
        evaluate(&mut pos, 1.45, &strategy),
        ExitDecision::StopRaised { ladder_index: 0, .. }
    ));
    assert!(matches!(
        evaluate(&mut pos, 1.0, &strategy),
        ExitDecision::Liquidate {
            reason: ExitReason::StopHit { .. },
            ..
        }
    ));

    let mut pos = fresh(1.0);
    assert!(matches!(
        evaluate(&mut pos, 2.1, &strategy),
        ExitDecision::Liquidate {
            reason: ExitReason::HardExit,
            ..
        }
    ));
}

#[test]
fn a_jump_over_several_rungs_arms_one_per_sample() {
    let strategy = ExitStrategy::default();
    let mut pos = fresh(1.0);

    assert_eq!(
        evaluate(&mut pos, 1.8, &strategy),
        ExitDecision::StopRaised {
            ladder_index: 0,
            stop_price: 1.0
        }
    );
    assert_eq!(
        evaluate(&mut pos, 1.8, &strategy),
        ExitDecision::StopRaised {
            ladder_index: 1,
            stop_price: 1.3
        }
    );
    assert_eq!(evaluate(&mut pos, 1.8, &strategy), ExitDecision::Hold);
}

#[test]
fn armed_stop_is_kept_when_a_rung_would_lower_it() {
    let ladder = Ladder::new(vec![LadderRung::new(1.2, 1.1), LadderRung::new(1.5, 1.1)]).unwrap();
    let strategy = ExitStrategy::new(ladder, 3.0).unwrap();
    let mut pos = fresh(1.0);
    pos.ladder_index = Some(0);
    pos.stop_price = 1.15;

    assert_eq!(
        evaluate(&mut pos, 1.6, &strategy),
        ExitDecision::StopRaised {
            ladder_index: 1,
            stop_price: 1.15
        }
    );
    assert_eq!(pos.stop_price, 1.15);
}

#[test]
fn stop_at_or_above_its_take_profit_is_rejected() {
    let ladder = Ladder::new(vec![LadderRung::new(1.1, 1.0), LadderRung::new(1.2, 1.3)]);
    assert!(ladder.is_err());
}

// ── Properties ───────────────────────────────────────────────────────

fn arb_entry() -> impl Strategy<Value = f64> {
    0.000_001..10.0_f64
}

fn arb_path(lo: f64, hi: f64) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(lo..hi, 1..60)
}

proptest! {
    /// The stop price never moves down, whatever the price path.
    #[test]
    fn stop_is_monotonic(entry in arb_entry(), path in arb_path(0.2, 2.3)) {
        let strategy = ExitStrategy::default();
        let mut pos = fresh(entry);
        let mut last_stop = pos.stop_price;
        let mut last_index = pos.ladder_index;

        for multiple in path {
            let decision = evaluate(&mut pos, entry * multiple, &strategy);
            prop_assert!(pos.stop_price >= last_stop);
            prop_assert!(pos.ladder_index >= last_index);
            if let ExitDecision::StopRaised { ladder_index, stop_price } = decision {
                prop_assert_eq!(Some(ladder_index), pos.ladder_index);
                prop_assert_eq!(stop_price, pos.stop_price);
            }
            last_stop = pos.stop_price;
            last_index = pos.ladder_index;
            if decision.is_liquidate() {
                break;
            }
        }
    }

    /// Prices that never reach the first take-profit never arm or exit.
    #[test]
    fn below_first_rung_never_arms(entry in arb_entry(), path in arb_path(0.01, 1.44)) {
        let strategy = ExitStrategy::default();
        let mut pos = fresh(entry);
        for multiple in path {
            prop_assert_eq!(evaluate(&mut pos, entry * multiple, &strategy), ExitDecision::Hold);
        }
        prop_assert_eq!(pos.stop_price, 0.0);
        prop_assert_eq!(pos.ladder_index, None);
    }

    /// At or above the ceiling the only outcome is one hard exit, even with
    /// an armed stop above the sample.
    #[test]
    fn hard_exit_wins(entry in arb_entry(), over in 2.1..5.0_f64) {
        let strategy = ExitStrategy::default();
        let mut pos = fresh(entry);
        pos.ladder_index = Some(1);
        pos.stop_price = entry * 10.0;

        prop_assert_eq!(
            evaluate(&mut pos, entry * over, &strategy),
            ExitDecision::Liquidate { fraction: 1.0, reason: ExitReason::HardExit }
        );
    }
}
