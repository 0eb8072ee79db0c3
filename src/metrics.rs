//! Metrics Aggregator (spec.md §4.2): pure, synchronous, deterministic
//! computation of percentile/throughput/goodput statistics over a batch
//! of [`RequestResult`]s. No I/O, no concurrency.

use crate::model::{
    ConcurrencyResult, GoodputResult, GoodputThresholds, LatencyStats, PerThresholdSatisfied,
    RequestResult,
};

/// Percentiles use linear interpolation between the two nearest ranks on
/// the sorted sample (the "R-7" method, matching numpy's default).
pub fn latency_stats(values: &[f64]) -> LatencyStats {
    if values.is_empty() {
        return LatencyStats::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let n = sorted.len();
    let sum: f64 = sorted.iter().sum();
    let mean = sum / n as f64;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

    LatencyStats {
        min: sorted[0],
        max: sorted[n - 1],
        mean,
        median: percentile(&sorted, 50.0),
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        std: variance.sqrt(),
    }
}

/// Linear-interpolation percentile over an already-sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (n as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Aggregate a batch of results produced at one concurrency level into a
/// [`ConcurrencyResult`].
pub fn aggregate(
    results: &[RequestResult],
    duration_s: f64,
    concurrency: usize,
    thresholds: Option<&GoodputThresholds>,
) -> ConcurrencyResult {
    let (successful, failed): (Vec<&RequestResult>, Vec<&RequestResult>) =
        results.iter().partition(|r| r.success);

    let ttft_values: Vec<f64> = successful.iter().map(|r| r.ttft_ms).collect();
    let e2e_values: Vec<f64> = successful.iter().map(|r| r.e2e_ms).collect();
    let tpot_values: Vec<f64> = successful.iter().filter_map(|r| r.tpot_ms).collect();
    let itl_values: Vec<f64> = successful
        .iter()
        .filter_map(|r| r.itl_ms.as_ref())
        .flatten()
        .copied()
        .collect();

    let total_input: u64 = successful.iter().map(|r| r.input_tokens).sum();
    let total_output: u64 = successful.iter().map(|r| r.output_tokens).sum();

    let throughput = if duration_s > 0.0 {
        total_output as f64 / duration_s
    } else {
        0.0
    };
    let request_rate = if duration_s > 0.0 {
        successful.len() as f64 / duration_s
    } else {
        0.0
    };
    let error_rate_percent = if results.is_empty() {
        0.0
    } else {
        failed.len() as f64 / results.len() as f64 * 100.0
    };

    let goodput = thresholds.map(|t| {
        let owned: Vec<RequestResult> = successful.iter().map(|r| (*r).clone()).collect();
        goodput(&owned, t)
    });

    ConcurrencyResult {
        concurrency,
        ttft: latency_stats(&ttft_values),
        tpot: if tpot_values.is_empty() {
            None
        } else {
            Some(latency_stats(&tpot_values))
        },
        itl: if itl_values.is_empty() {
            None
        } else {
            Some(latency_stats(&itl_values))
        },
        e2e: latency_stats(&e2e_values),
        throughput_tokens_per_sec: throughput,
        request_rate_per_sec: request_rate,
        total_requests: results.len() as u64,
        successful_requests: successful.len() as u64,
        failed_requests: failed.len() as u64,
        error_rate_percent,
        total_input_tokens: total_input,
        total_output_tokens: total_output,
        duration_s,
        goodput,
    }
}

/// Goodput (spec.md §3/§4.2): the percentage of successful requests that
/// satisfy every present SLO threshold, conjunctively.
pub fn goodput(successful: &[RequestResult], thresholds: &GoodputThresholds) -> GoodputResult {
    if successful.is_empty() {
        return GoodputResult {
            satisfied: 0,
            total: 0,
            percent: 0.0,
            per_threshold_satisfied: PerThresholdSatisfied::default(),
        };
    }

    let total = successful.len() as u64;

    let ttft = thresholds
        .ttft_ms
        .map(|max| successful.iter().filter(|r| r.ttft_ms <= max).count() as u64);
    let tpot = thresholds.tpot_ms.map(|max| {
        successful
            .iter()
            .filter(|r| r.tpot_ms.is_some_and(|v| v <= max))
            .count() as u64
    });
    let e2e = thresholds
        .e2e_ms
        .map(|max| successful.iter().filter(|r| r.e2e_ms <= max).count() as u64);

    let satisfied = successful
        .iter()
        .filter(|r| {
            thresholds.ttft_ms.map_or(true, |max| r.ttft_ms <= max)
                && thresholds
                    .tpot_ms
                    .map_or(true, |max| r.tpot_ms.is_some_and(|v| v <= max))
                && thresholds.e2e_ms.map_or(true, |max| r.e2e_ms <= max)
        })
        .count() as u64;

    GoodputResult {
        satisfied,
        total,
        percent: satisfied as f64 / total as f64 * 100.0,
        per_threshold_satisfied: PerThresholdSatisfied { ttft, tpot, e2e },
    }
}
