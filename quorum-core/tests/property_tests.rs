//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Clock termination: N sessions yield N-1 advances, then EndOfRun
//! 2. Risk bounds: entries never exceed the position fraction or free cash
//! 3. Equity accounting: cash + positions value reconciles after every fill

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use quorum_core::clock::{ClockError, SimulatedClock, TradingCalendar};
use quorum_core::domain::{Action, OrderSide};
use quorum_core::positions::{FillModel, PositionManager};
use quorum_core::risk::{BoundedOrder, RiskLimitExceeded, RiskLimits, RiskManager, SizingRequest};
use std::collections::BTreeMap;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (5.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![Just(Action::Buy), Just(Action::Sell), Just(Action::Hold)]
}

fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i as i64)
}

fn request(symbol: &str, action: Action, size_fraction: f64, confidence: f64) -> SizingRequest {
    SizingRequest {
        decision_id: None,
        symbol: symbol.into(),
        action,
        confidence,
        size_fraction,
        stop_loss_pct: None,
        take_profit_pct: None,
    }
}

fn buy(symbol: &str, quantity: f64, price: f64) -> BoundedOrder {
    BoundedOrder {
        decision_id: None,
        symbol: symbol.into(),
        side: OrderSide::Buy,
        quantity,
        reference_price: price,
        size_fraction: 0.0,
        reduces_position: false,
        stop_loss: None,
        take_profit: None,
    }
}

// ── 1. Clock termination ─────────────────────────────────────────────

proptest! {
    /// A clock over N sessions advances exactly N-1 times, strictly
    /// forward, and then reports EndOfRun on every further call.
    #[test]
    fn clock_ends_exactly_once_per_calendar(gaps in prop::collection::vec(1usize..5, 1..60)) {
        let mut offset = 0;
        let sessions: Vec<NaiveDate> = gaps
            .iter()
            .map(|g| {
                offset += g;
                day(offset)
            })
            .collect();
        let n = sessions.len();
        let mut clock = SimulatedClock::new(TradingCalendar::new(sessions.clone()).unwrap());

        let mut seen = vec![clock.now()];
        loop {
            match clock.advance() {
                Ok(date) => {
                    prop_assert!(date > *seen.last().unwrap());
                    seen.push(date);
                }
                Err(ClockError::EndOfRun) => break,
                Err(e) => prop_assert!(false, "unexpected clock error: {e}"),
            }
        }
        prop_assert_eq!(seen.len(), n);
        prop_assert_eq!(seen, sessions);
        prop_assert!(clock.is_finished());
        prop_assert_eq!(clock.advance(), Err(ClockError::EndOfRun));
    }
}

// ── 2. Risk bounds ───────────────────────────────────────────────────

proptest! {
    /// Entry orders stay within max_position_fraction of equity and within
    /// free cash, in whole shares. Zero cash never yields a buy.
    #[test]
    fn entries_respect_fraction_and_cash(
        capital in 0.0..200_000.0_f64,
        invested in 0.0..1.0_f64,
        price in arb_price(),
        fraction in -0.5..2.0_f64,
        confidence in 0.0..1.0_f64,
        max_fraction in 0.01..0.5_f64,
        scaling in any::<bool>(),
    ) {
        let mut pm = PositionManager::new(capital, FillModel::frictionless());
        let other_qty = ((capital * invested) / 50.0).floor();
        if other_qty >= 1.0 {
            pm.apply(&buy("OTHER", other_qty, 50.0), day(0)).unwrap();
        }
        let snapshot = pm.snapshot(day(0));

        let risk = RiskManager::new(RiskLimits {
            max_position_fraction: max_fraction,
            confidence_scaling: scaling,
            ..RiskLimits::default()
        });
        let req = request("SPY", Action::Buy, fraction, confidence);
        match risk.size(&req, &snapshot, price) {
            Ok(Some(order)) => {
                prop_assert_eq!(order.side, OrderSide::Buy);
                prop_assert!(!order.reduces_position);
                prop_assert_eq!(order.quantity, order.quantity.floor());
                prop_assert!(order.quantity >= 1.0);
                let notional = order.quantity * price;
                prop_assert!(notional <= max_fraction * snapshot.equity + 1e-6);
                prop_assert!(notional <= snapshot.cash + 1e-6);
            }
            Ok(None) => {}
            Err(RiskLimitExceeded::ZeroSize { .. }) | Err(RiskLimitExceeded::NonPositiveEquity { .. }) => {}
            Err(e) => prop_assert!(false, "unexpected rejection: {e}"),
        }
    }

    /// Exits never sell more than is held.
    #[test]
    fn exits_never_exceed_holding(
        held in 1u32..1_000,
        fraction in -1.0..2.0_f64,
        price in arb_price(),
    ) {
        let mut pm = PositionManager::new(1_000_000.0, FillModel::frictionless());
        pm.apply(&buy("SPY", f64::from(held), 100.0), day(0)).unwrap();
        let snapshot = pm.snapshot(day(0));
        let order = RiskManager::default()
            .size(&request("SPY", Action::Sell, fraction, 0.5), &snapshot, price)
            .unwrap()
            .unwrap();
        prop_assert!(order.reduces_position);
        prop_assert_eq!(order.side, OrderSide::Sell);
        prop_assert!(order.quantity >= 1.0);
        prop_assert!(order.quantity <= f64::from(held));
    }
}

#[test]
fn sell_without_position_is_a_no_op_when_shorting_is_off() {
    let pm = PositionManager::new(100_000.0, FillModel::frictionless());
    let out = RiskManager::default()
        .size(&request("SPY", Action::Sell, 0.1, 0.9), &pm.snapshot(day(0)), 100.0)
        .unwrap();
    assert!(out.is_none());
}

// ── 3. Equity accounting ─────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random price paths and random decisions through sizing and fills:
    /// the incrementally tracked equity always equals cash plus marked
    /// position value, and the recorded curve matches it.
    #[test]
    fn equity_reconciles_over_random_paths(
        steps in prop::collection::vec(
            (arb_price(), arb_price(), arb_action(), arb_action(), 0.0..0.3_f64),
            1..40,
        ),
        slippage_bps in 0.0..20.0_f64,
        commission in 0.0..5.0_f64,
    ) {
        let mut pm = PositionManager::new(100_000.0, FillModel::new(slippage_bps, commission));
        let risk = RiskManager::new(RiskLimits {
            max_position_fraction: 0.3,
            default_stop_loss_pct: Some(0.1),
            default_take_profit_pct: Some(0.25),
            ..RiskLimits::default()
        });

        for (i, (pa, pb, act_a, act_b, fraction)) in steps.into_iter().enumerate() {
            let date = day(i);
            let prices: BTreeMap<String, f64> =
                [("AAA".to_string(), pa), ("BBB".to_string(), pb)].into_iter().collect();
            pm.mark_to_market(&prices, date).unwrap();

            let snapshot = pm.snapshot(date);
            let mut orders = Vec::new();
            for (symbol, action, price) in [("AAA", act_a, pa), ("BBB", act_b, pb)] {
                if let Ok(Some(order)) = risk.size(&request(symbol, action, fraction, 0.6), &snapshot, price) {
                    orders.push(order);
                }
            }
            for order in &orders {
                pm.apply(order, date).unwrap();
            }

            pm.reconcile(date).unwrap();
            let point = pm.record_equity(date);
            let direct = pm.state().cash + pm.state().positions_value();
            prop_assert!((point.equity - direct).abs() <= 1e-6 * direct.abs().max(1.0));
            prop_assert!((pm.tracked_equity() - direct).abs() <= 1e-6 * direct.abs().max(1.0));
        }

        let realized: f64 = pm.closed_trades().iter().map(|t| t.net_pnl).sum();
        prop_assert!((pm.state().realized_pnl - realized).abs() <= 1e-6 * realized.abs().max(1.0));
    }
}
