//! Criterion benchmarks for quorum hot paths.
//!
//! Benchmarks:
//! 1. Prefetch with indicator annotation
//! 2. Time-gated series reads (cold and memoized)
//! 3. Memory recall over a populated store
//! 4. Risk sizing plus fill application

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chrono::{Duration, NaiveDate};
use quorum_core::agents::AgentRole;
use quorum_core::clock::AsOf;
use quorum_core::data::{DataManager, SyntheticSource};
use quorum_core::domain::{Action, SeriesField};
use quorum_core::memory::{MemoryStore, NewMemory, OutcomeLabel, RecallSettings};
use quorum_core::positions::{FillModel, PositionManager};
use quorum_core::risk::{RiskManager, SizingRequest};

// ── Helpers ──────────────────────────────────────────────────────────

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 2).unwrap()
}

fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("SYM{i:02}")).collect()
}

fn loaded(n_symbols: usize, days: i64) -> DataManager {
    let manager = DataManager::new(1);
    manager
        .prefetch(
            &SyntheticSource::new(7),
            &symbols(n_symbols),
            start(),
            start() + Duration::days(days),
        )
        .unwrap();
    manager
}

// ── 1. Prefetch ──────────────────────────────────────────────────────

fn bench_prefetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefetch");
    for n in [1usize, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(loaded(n, 2_500)));
        });
    }
    group.finish();
}

// ── 2. Series reads ──────────────────────────────────────────────────

fn bench_get_series(c: &mut Criterion) {
    let manager = loaded(10, 2_500);
    let field = SeriesField::indicator("sma_20");
    let mut group = c.benchmark_group("get_series");

    let mut offset = 100;
    group.bench_function("cold_cutoffs", |b| {
        b.iter(|| {
            offset = if offset >= 2_400 { 100 } else { offset + 1 };
            let as_of = AsOf::new(start() + Duration::days(offset));
            black_box(manager.get_series("SYM03", &field, 50, as_of).ok())
        });
    });

    let as_of = AsOf::new(start() + Duration::days(2_000));
    group.bench_function("memoized", |b| {
        b.iter(|| black_box(manager.get_series("SYM03", &field, 50, as_of).ok()));
    });
    group.finish();
}

// ── 3. Memory recall ─────────────────────────────────────────────────

fn bench_recall(c: &mut Criterion) {
    let store = MemoryStore::new(RecallSettings::default());
    for i in 0..2_000i64 {
        let closed_at = start() + Duration::days(i);
        store
            .append(NewMemory {
                role: AgentRole::Trader,
                symbol: format!("SYM{:02}", i % 10),
                decided_at: closed_at - Duration::days(5),
                closed_at,
                decision_id: None,
                stance: if i % 2 == 0 { Action::Buy } else { Action::Sell },
                situation: format!("SYM{:02} rsi {} trend {}", i % 10, i % 100, i % 7),
                lesson: "sized too large into resistance".into(),
                realized_return: (i % 11) as f64 / 100.0 - 0.05,
                outcome: OutcomeLabel::Neutral,
                hit: i % 3 == 0,
            })
            .unwrap();
    }
    let as_of = AsOf::new(start() + Duration::days(2_500));
    c.bench_function("recall_top3_of_2000", |b| {
        b.iter(|| black_box(store.recall(AgentRole::Trader, "SYM04 rsi 71 trend 3", as_of)));
    });
}

// ── 4. Sizing and fills ──────────────────────────────────────────────

fn bench_size_and_apply(c: &mut Criterion) {
    let risk = RiskManager::default();
    c.bench_function("size_and_apply_round_trip", |b| {
        b.iter(|| {
            let mut pm = PositionManager::new(100_000.0, FillModel::new(5.0, 1.0));
            let date = start();
            for (action, price) in [(Action::Buy, 100.0), (Action::Sell, 104.0)] {
                let req = SizingRequest {
                    decision_id: None,
                    symbol: "SPY".into(),
                    action,
                    confidence: 0.7,
                    size_fraction: 0.15,
                    stop_loss_pct: None,
                    take_profit_pct: None,
                };
                if let Ok(Some(order)) = risk.size(&req, &pm.snapshot(date), price) {
                    pm.apply(&order, date).unwrap();
                }
            }
            black_box(pm.tracked_equity())
        });
    });
}

criterion_group!(
    benches,
    bench_prefetch,
    bench_get_series,
    bench_recall,
    bench_size_and_apply
);
criterion_main!(benches);
