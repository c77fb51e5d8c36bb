//! Performance metrics: pure functions over the equity curve and the
//! closed-trade log.
//!
//! Nothing here touches the engine or data layer, so the same functions can
//! score a finished report loaded back from disk.

use quorum_core::domain::{ClosedTrade, EquityPoint};
use serde::{Deserialize, Serialize};

const SESSIONS_PER_YEAR: f64 = 252.0;

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    /// Negative fraction, e.g. -0.12 for a 12% peak-to-trough loss.
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: usize,
    pub avg_sessions_held: f64,
    pub total_commission: f64,
}

impl PerformanceMetrics {
    pub fn compute(curve: &[EquityPoint], trades: &[ClosedTrade]) -> Self {
        let equity: Vec<f64> = curve.iter().map(|p| p.equity).collect();
        Self {
            total_return: total_return(&equity),
            cagr: cagr(&equity),
            sharpe: sharpe_ratio(&equity),
            max_drawdown: max_drawdown(&equity),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            trade_count: trades.len(),
            avg_sessions_held: avg_sessions_held(trades),
            total_commission: trades.iter().map(|t| t.commission).sum(),
        }
    }
}

// ─── Curve metrics ──────────────────────────────────────────────────

/// (final - initial) / initial.
pub fn total_return(equity: &[f64]) -> f64 {
    match (equity.first(), equity.last()) {
        (Some(&first), Some(&last)) if equity.len() >= 2 && first > 0.0 => (last - first) / first,
        _ => 0.0,
    }
}

/// Compound annual growth, assuming one curve point per session.
pub fn cagr(equity: &[f64]) -> f64 {
    let (Some(&first), Some(&last)) = (equity.first(), equity.last()) else {
        return 0.0;
    };
    if equity.len() < 2 || first <= 0.0 || last <= 0.0 {
        return 0.0;
    }
    let years = equity.len() as f64 / SESSIONS_PER_YEAR;
    (last / first).powf(1.0 / years) - 1.0
}

/// Annualised Sharpe ratio of per-session returns, zero risk-free rate.
pub fn sharpe_ratio(equity: &[f64]) -> f64 {
    let returns = session_returns(equity);
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean(&returns) / std * SESSIONS_PER_YEAR.sqrt()
}

pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.min((value - peak) / peak);
        }
    }
    worst
}

pub fn session_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

// ─── Trade metrics ──────────────────────────────────────────────────

pub fn win_rate(trades: &[ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profit / gross loss, capped at 100 when there are no losers.
pub fn profit_factor(trades: &[ClosedTrade]) -> f64 {
    let (profit, loss) = trades.iter().fold((0.0, 0.0), |(p, l), t| {
        if t.net_pnl > 0.0 {
            (p + t.net_pnl, l)
        } else {
            (p, l - t.net_pnl)
        }
    });
    if loss < 1e-10 {
        return if profit > 0.0 { 100.0 } else { 0.0 };
    }
    (profit / loss).min(100.0)
}

pub fn avg_sessions_held(trades: &[ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.sessions_held as f64).sum::<f64>() / trades.len() as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quorum_core::domain::{ExitReason, PositionSide};

    fn trade(net_pnl: f64) -> ClosedTrade {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        ClosedTrade {
            symbol: "SPY".into(),
            side: PositionSide::Long,
            entry_date: date,
            entry_price: 100.0,
            entry_decision: None,
            exit_date: date,
            exit_price: 100.0 + net_pnl / 10.0,
            exit_decision: None,
            exit_reason: ExitReason::Decision,
            quantity: 10.0,
            gross_pnl: net_pnl,
            commission: 1.0,
            net_pnl,
            sessions_held: 4,
        }
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                date: start + chrono::Duration::days(i as i64),
                cash: equity,
                equity,
                realized_pnl: 0.0,
                unrealized_pnl: 0.0,
            })
            .collect()
    }

    #[test]
    fn total_return_handles_short_curves() {
        assert_eq!(total_return(&[]), 0.0);
        assert_eq!(total_return(&[100.0]), 0.0);
        assert!((total_return(&[100.0, 110.0]) - 0.1).abs() < 1e-12);
        assert!((total_return(&[100.0, 90.0]) + 0.1).abs() < 1e-12);
    }

    #[test]
    fn max_drawdown_from_peak() {
        let dd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd + 0.25).abs() < 1e-12);
        assert_eq!(max_drawdown(&[100.0, 101.0, 102.0]), 0.0);
    }

    #[test]
    fn sharpe_is_zero_for_flat_equity() {
        assert_eq!(sharpe_ratio(&[100.0; 30]), 0.0);
        assert_eq!(sharpe_ratio(&[100.0]), 0.0);
    }

    #[test]
    fn sharpe_positive_for_noisy_uptrend() {
        let mut eq = vec![100.0];
        for i in 1..100 {
            let r = if i % 2 == 0 { 1.002 } else { 0.9995 };
            eq.push(eq[i - 1] * r);
        }
        assert!(sharpe_ratio(&eq) > 0.0);
    }

    #[test]
    fn trade_statistics() {
        let trades = vec![trade(300.0), trade(-100.0), trade(200.0), trade(-100.0)];
        assert!((win_rate(&trades) - 0.5).abs() < 1e-12);
        assert!((profit_factor(&trades) - 2.5).abs() < 1e-12);
        assert_eq!(profit_factor(&[trade(50.0)]), 100.0);
        assert_eq!(profit_factor(&[]), 0.0);
        assert!((avg_sessions_held(&trades) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn compute_aggregates_everything() {
        let m = PerformanceMetrics::compute(
            &curve(&[10_000.0, 10_100.0, 10_100.0]),
            &[trade(100.0)],
        );
        assert!((m.total_return - 0.01).abs() < 1e-12);
        assert_eq!(m.trade_count, 1);
        assert_eq!(m.win_rate, 1.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.total_commission, 1.0);
        assert!(m.cagr.is_finite() && m.sharpe.is_finite());
    }

    #[test]
    fn compute_on_empty_run() {
        let m = PerformanceMetrics::compute(&[], &[]);
        assert_eq!(m, PerformanceMetrics::default());
    }

    proptest::proptest! {
        #[test]
        fn drawdown_is_bounded(values in proptest::collection::vec(1.0f64..1e6, 0..200)) {
            let dd = max_drawdown(&values);
            proptest::prop_assert!((-1.0..=0.0).contains(&dd));
            if values.windows(2).all(|w| w[1] >= w[0]) {
                proptest::prop_assert_eq!(dd, 0.0);
            }
        }
    }
}
