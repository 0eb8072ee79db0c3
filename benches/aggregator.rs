use criterion::{black_box, criterion_group, criterion_main, Criterion};
use llm_loadtest::metrics::{aggregate, latency_stats};
use llm_loadtest::model::{ErrorKind, GoodputThresholds, RequestResult};
use rand::Rng;

fn synthetic_results(n: usize) -> Vec<RequestResult> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|i| {
            if rng.gen_bool(0.05) {
                RequestResult::failure(i as u64, rng.gen_range(100.0..5000.0), 64, ErrorKind::Timeout)
            } else {
                let ttft = rng.gen_range(50.0..800.0);
                let e2e = ttft + rng.gen_range(200.0..4000.0);
                RequestResult::success(i as u64, ttft, e2e, 64, rng.gen_range(16..256), vec![])
            }
        })
        .collect()
}

fn bench_latency_stats(c: &mut Criterion) {
    let values: Vec<f64> = (0..10_000).map(|i| i as f64 * 0.37).collect();
    c.bench_function("latency_stats_10k", |b| {
        b.iter(|| latency_stats(black_box(&values)))
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let results = synthetic_results(5_000);
    let thresholds = GoodputThresholds {
        ttft_ms: Some(500.0),
        tpot_ms: Some(50.0),
        e2e_ms: Some(3000.0),
    };
    c.bench_function("aggregate_5k_with_goodput", |b| {
        b.iter(|| aggregate(black_box(&results), 30.0, 50, Some(&thresholds)))
    });
}

criterion_group!(benches, bench_latency_stats, bench_aggregate);
criterion_main!(benches);
