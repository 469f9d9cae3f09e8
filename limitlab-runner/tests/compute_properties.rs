//! Property tests for compute modes against the SQLite store.
//!
//! However a symbol's history reaches the store, the stored results must
//! match a from-scratch run:
//! 1. Incremental runs over a split history equal one full run
//! 2. Recomputing forward from any date equals one full run

use chrono::{Duration, NaiveDate};
use limitlab_core::domain::{DailyBar, LimitRatios, SymbolMeta};
use limitlab_runner::verify::stored_fingerprints;
use limitlab_runner::{ComputeEngine, ComputeMode, Store};
use proptest::prelude::*;

const CODE: &str = "600000";

#[derive(Debug, Clone, Copy)]
enum Move {
    Limit,
    Rise,
    Fall,
    Suspend,
}

fn arb_moves() -> impl Strategy<Value = Vec<Move>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(Move::Limit),
            3 => Just(Move::Rise),
            3 => Just(Move::Fall),
            1 => Just(Move::Suspend),
        ],
        2..40,
    )
}

fn cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn build_bars(moves: &[Move], engine: &ComputeEngine) -> Vec<DailyBar> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut pre = 10.0;
    moves
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let close = match m {
                Move::Limit => engine.classifier().limit_price(pre, 0.10),
                Move::Rise => cents(pre * 1.03),
                Move::Fall => cents(pre * 0.97),
                Move::Suspend => pre,
            };
            let volume = if matches!(m, Move::Suspend) { 0.0 } else { 1_000.0 };
            let bar = DailyBar {
                date: start + Duration::days(i as i64),
                code: CODE.into(),
                open: pre,
                high: pre.max(close),
                low: pre.min(close),
                close,
                pre_close: Some(pre),
                volume,
                amount: volume * close,
            };
            pre = close;
            bar
        })
        .collect()
}

fn fresh_store() -> Store {
    let mut store = Store::open_in_memory().unwrap();
    store
        .upsert_meta(&[SymbolMeta::derive(CODE, "浦发银行", &LimitRatios::default())])
        .unwrap();
    store
}

fn full_run(bars: &[DailyBar], engine: &ComputeEngine) -> Store {
    let mut store = fresh_store();
    store.upsert_bars(bars).unwrap();
    engine.run(&mut store, &ComputeMode::Full).unwrap();
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn incremental_matches_full(moves in arb_moves(), split in 1usize..40) {
        let engine = ComputeEngine::default().with_parallelism(false);
        let bars = build_bars(&moves, &engine);
        let split = split.min(bars.len());

        let mut stepped = fresh_store();
        stepped.upsert_bars(&bars[..split]).unwrap();
        engine.run(&mut stepped, &ComputeMode::Incremental).unwrap();
        stepped.upsert_bars(&bars[split..]).unwrap();
        engine.run(&mut stepped, &ComputeMode::Incremental).unwrap();

        let whole = full_run(&bars, &engine);
        prop_assert_eq!(stored_fingerprints(&stepped).unwrap(), stored_fingerprints(&whole).unwrap());
    }

    #[test]
    fn recompute_from_any_date_matches_full(moves in arb_moves(), at in 0usize..40) {
        let engine = ComputeEngine::default().with_parallelism(false);
        let bars = build_bars(&moves, &engine);
        let date = bars[at.min(bars.len() - 1)].date;

        let mut store = full_run(&bars, &engine);
        let expected = stored_fingerprints(&store).unwrap();
        let mode = ComputeMode::From { date, codes: vec![CODE.to_string()] };
        engine.run(&mut store, &mode).unwrap();

        prop_assert_eq!(stored_fingerprints(&store).unwrap(), expected);
    }
}
