//! Criterion benchmarks for the per-symbol hot path.
//!
//! Benchmarks:
//! 1. Single-bar classification
//! 2. Chain accumulation over a long status sequence
//! 3. Full per-symbol analysis over synthetic histories of increasing length

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use limitlab_core::calendar::ZeroVolumeHeuristic;
use limitlab_core::chain::accumulate;
use limitlab_core::data::synthetic::{origin, SyntheticConfig, SyntheticProvider};
use limitlab_core::data::DataProvider;
use limitlab_core::domain::{DailyBar, LimitRatios, LimitStatus, SymbolMeta};
use limitlab_core::{analyze_symbol, ChainState, Classifier};

fn bench_classify(c: &mut Criterion) {
    let classifier = Classifier::default();
    let meta = SymbolMeta::derive("600000", "浦发银行", &LimitRatios::default());
    let bar = DailyBar {
        date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        code: "600000".into(),
        open: 10.5,
        high: 11.0,
        low: 10.3,
        close: 10.9,
        pre_close: Some(10.0),
        volume: 1e6,
        amount: 1.09e7,
    };
    c.bench_function("classify_bar", |b| {
        b.iter(|| classifier.classify(black_box(&bar), black_box(&meta)))
    });
}

fn bench_accumulate(c: &mut Criterion) {
    let statuses: Vec<LimitStatus> = (0..5_000)
        .map(|i| match i % 7 {
            0 | 1 | 2 => LimitStatus::Up,
            3 => LimitStatus::Undefined,
            _ => LimitStatus::NotUp,
        })
        .collect();
    c.bench_function("accumulate_5000", |b| b.iter(|| accumulate(black_box(&statuses))));
}

fn bench_analyze_symbol(c: &mut Criterion) {
    let provider = SyntheticProvider::new(SyntheticConfig {
        symbols: 1,
        ..Default::default()
    });
    let stock = provider.stock_list().unwrap().remove(0);
    let meta = SymbolMeta::derive(&stock.code, &stock.name, &LimitRatios::default());
    let classifier = Classifier::default();

    let mut group = c.benchmark_group("analyze_symbol");
    for years in [1i64, 3] {
        let end = origin() + chrono::Duration::days(365 * years);
        let bars = provider.daily(&stock.code, origin(), end).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(bars.len()), &bars, |b, bars| {
            b.iter(|| {
                analyze_symbol(
                    &classifier,
                    &meta.code,
                    Some(&meta),
                    black_box(bars),
                    ChainState::default(),
                    &ZeroVolumeHeuristic,
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_classify, bench_accumulate, bench_analyze_symbol);
criterion_main!(benches);
