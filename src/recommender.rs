//! Infrastructure Recommender (spec.md §4.6): turns a profiling
//! [`BenchmarkResult`] into a GPU sizing recommendation for a target
//! [`WorkloadSpec`].

use crate::model::{ConcurrencyResult, InfraProfile, InfraRecommendation, WorkloadSpec};

/// Scan `results` (already sorted or not) for the highest concurrency
/// level whose p95 TTFT/TPOT stay within the workload's targets and whose
/// goodput clears the target, falling back to the lowest tested level if
/// none qualify.
pub fn find_max_concurrency_at_slo(results: &[ConcurrencyResult], workload: &WorkloadSpec) -> usize {
    if results.is_empty() {
        return 1;
    }

    let mut sorted: Vec<&ConcurrencyResult> = results.iter().collect();
    sorted.sort_by(|a, b| b.concurrency.cmp(&a.concurrency));

    for result in &sorted {
        let ttft_ok = result.ttft.p95 <= workload.ttft_target_ms;
        let tpot_ok = result.tpot.as_ref().within_target(workload.tpot_target_ms);
        let goodput_ok = result
            .goodput
            .as_ref()
            .map(|g| g.percent >= workload.goodput_target_percent)
            .unwrap_or(true);

        if ttft_ok && tpot_ok && goodput_ok {
            return result.concurrency;
        }
    }

    sorted.iter().map(|r| r.concurrency).min().unwrap_or(1)
}

/// Helper trait used only to keep `find_max_concurrency_at_slo` readable:
/// an absent TPOT sample never disqualifies a level on its own.
trait TpotWithinTarget {
    fn within_target(&self, target: f64) -> bool;
}

impl TpotWithinTarget for Option<&crate::model::LatencyStats> {
    fn within_target(&self, target: f64) -> bool {
        self.map(|t| t.p95 <= target).unwrap_or(true)
    }
}

/// Walk concurrency levels in ascending order and find where performance
/// starts degrading: a goodput drop of more than 10 points from the
/// previous level, an error rate above 5%, or goodput itself dipping
/// below 90%. Returns the last level *before* degradation, plus its
/// goodput.
pub fn find_saturation_point(results: &[ConcurrencyResult]) -> (usize, f64) {
    if results.is_empty() {
        return (1, 100.0);
    }
    if results.len() == 1 {
        let r = &results[0];
        return (r.concurrency, r.goodput.as_ref().map(|g| g.percent).unwrap_or(100.0));
    }

    let mut sorted: Vec<&ConcurrencyResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.concurrency);

    let mut prev_goodput = 100.0_f64;
    let mut saturation_concurrency = sorted.last().unwrap().concurrency;
    let mut saturation_goodput = 100.0_f64;

    for (i, result) in sorted.iter().enumerate() {
        let current_goodput = result.goodput.as_ref().map(|g| g.percent).unwrap_or(100.0);

        let is_saturated =
            prev_goodput - current_goodput > 10.0 || result.error_rate_percent > 5.0 || current_goodput < 90.0;

        if is_saturated {
            if i > 0 {
                let prev = sorted[i - 1];
                saturation_concurrency = prev.concurrency;
                saturation_goodput = prev.goodput.as_ref().map(|g| g.percent).unwrap_or(100.0);
            } else {
                saturation_concurrency = result.concurrency;
                saturation_goodput = current_goodput;
            }
            return (saturation_concurrency, saturation_goodput);
        }

        prev_goodput = current_goodput;
        saturation_concurrency = result.concurrency;
        saturation_goodput = current_goodput;
    }

    (saturation_concurrency, saturation_goodput)
}

/// Build an [`InfraProfile`] from a profiling run's per-level results.
/// `gpu` supplies the `(model, count, memory_gb)` triple; pass
/// [`crate::model::InfraProfile::unknown_gpu`] when no GPU probe is
/// wired in.
pub fn build_infra_profile(
    results: &[ConcurrencyResult],
    workload: &WorkloadSpec,
    gpu: (String, usize, f64),
) -> InfraProfile {
    let (gpu_model, gpu_count, gpu_memory_gb) = gpu;
    let max_concurrency_at_slo = find_max_concurrency_at_slo(results, workload);
    let (saturation_concurrency, saturation_goodput) = find_saturation_point(results);

    let mut throughput = 0.0;
    let mut goodput_at_max = 0.0;
    for result in results {
        if result.concurrency == max_concurrency_at_slo {
            throughput = result.throughput_tokens_per_sec;
            goodput_at_max = result.goodput.as_ref().map(|g| g.percent).unwrap_or(0.0);
            break;
        }
    }

    if throughput == 0.0 {
        if let Some(best) = results
            .iter()
            .max_by(|a, b| a.throughput_tokens_per_sec.total_cmp(&b.throughput_tokens_per_sec))
        {
            throughput = best.throughput_tokens_per_sec;
            goodput_at_max = best.goodput.as_ref().map(|g| g.percent).unwrap_or(0.0);
        }
    }

    InfraProfile {
        gpu_model,
        gpu_count,
        gpu_memory_gb,
        max_concurrency_at_slo,
        throughput_tokens_per_sec: throughput,
        goodput_at_max_concurrency: goodput_at_max,
        saturation_concurrency,
        saturation_goodput,
    }
}

/// Scale `profile` to meet `workload.peak_concurrency`, applying
/// `headroom` (e.g. `0.2` for 20%) on top of the raw ratio.
///
/// Formula: `ceil(target / max_concurrency_at_slo) * (1 + headroom)`,
/// never recommending fewer GPUs than are already in `profile`.
pub fn calculate_recommendation(
    model_name: &str,
    workload: &WorkloadSpec,
    profile: &InfraProfile,
    headroom: f64,
) -> InfraRecommendation {
    let target = workload.peak_concurrency as f64;
    let max_at_slo = if profile.max_concurrency_at_slo == 0 {
        1
    } else {
        profile.max_concurrency_at_slo
    };

    let scaling_factor = target / max_at_slo as f64;
    let raw_gpu_count = scaling_factor * (1.0 + headroom);
    let recommended_count = (raw_gpu_count.ceil() as usize).max(profile.gpu_count);

    let tensor_parallelism = if recommended_count >= 8 {
        4
    } else if recommended_count >= 4 {
        2
    } else {
        1
    };

    let estimated_max_concurrency = (max_at_slo * recommended_count) / profile.gpu_count.max(1);
    let estimated_throughput =
        profile.throughput_tokens_per_sec * recommended_count as f64 / profile.gpu_count.max(1) as f64;
    let estimated_goodput = (profile.goodput_at_max_concurrency + headroom * 10.0).min(99.9);

    let calculation_formula = format!(
        "ceil({target} / {max_at_slo}) * {:.1} = ceil({scaling_factor:.2}) * {:.1} = {} * {:.1} = {raw_gpu_count:.1} -> {recommended_count}",
        1.0 + headroom,
        1.0 + headroom,
        scaling_factor.ceil() as usize,
        1.0 + headroom,
    );

    let reasoning = build_reasoning(profile, workload, recommended_count, headroom);

    InfraRecommendation {
        model_name: model_name.to_string(),
        workload: workload.clone(),
        current_infra: profile.clone(),
        recommended_gpu: profile.gpu_model.clone(),
        recommended_count,
        tensor_parallelism,
        estimated_max_concurrency,
        estimated_goodput,
        estimated_throughput,
        headroom_percent: headroom * 100.0,
        calculation_formula,
        reasoning,
    }
}

fn build_reasoning(profile: &InfraProfile, workload: &WorkloadSpec, recommended_count: usize, headroom: f64) -> String {
    let max_at_slo = if profile.max_concurrency_at_slo == 0 {
        1
    } else {
        profile.max_concurrency_at_slo
    };
    let scale_factor = workload.peak_concurrency as f64 / max_at_slo as f64;

    format!(
        "Current: {} x{} sustains {} concurrent requests at SLO (goodput {:.1}%). \
         Target: {} concurrent requests (TTFT < {}ms, goodput > {}%). \
         Scaling ratio required: {:.2}x. Headroom applied: {:.0}%. \
         Recommendation: {} x {}.",
        profile.gpu_model,
        profile.gpu_count,
        profile.max_concurrency_at_slo,
        profile.goodput_at_max_concurrency,
        workload.peak_concurrency,
        workload.ttft_target_ms,
        workload.goodput_target_percent,
        scale_factor,
        headroom * 100.0,
        profile.gpu_model,
        recommended_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GoodputResult, LatencyStats, PerThresholdSatisfied};

    fn level(concurrency: usize, ttft_p95: f64, error_rate: f64, goodput_pct: f64) -> ConcurrencyResult {
        ConcurrencyResult {
            concurrency,
            ttft: LatencyStats {
                p95: ttft_p95,
                ..Default::default()
            },
            tpot: None,
            itl: None,
            e2e: LatencyStats::default(),
            throughput_tokens_per_sec: concurrency as f64 * 10.0,
            request_rate_per_sec: 1.0,
            total_requests: 100,
            successful_requests: 100,
            failed_requests: 0,
            error_rate_percent: error_rate,
            total_input_tokens: 1000,
            total_output_tokens: 1000,
            duration_s: 10.0,
            goodput: Some(GoodputResult {
                satisfied: (goodput_pct as u64),
                total: 100,
                percent: goodput_pct,
                per_threshold_satisfied: PerThresholdSatisfied::default(),
            }),
        }
    }

    fn workload() -> WorkloadSpec {
        WorkloadSpec {
            peak_concurrency: 500,
            ttft_target_ms: 500.0,
            tpot_target_ms: 50.0,
            goodput_target_percent: 95.0,
            avg_input_tokens: 128,
            avg_output_tokens: 128,
        }
    }

    #[test]
    fn max_concurrency_at_slo_picks_highest_qualifying_level() {
        let results = vec![level(1, 100.0, 0.0, 99.0), level(10, 200.0, 0.0, 98.0), level(50, 600.0, 0.0, 80.0)];
        assert_eq!(find_max_concurrency_at_slo(&results, &workload()), 10);
    }

    #[test]
    fn max_concurrency_at_slo_falls_back_to_lowest_when_none_qualify() {
        let results = vec![level(10, 900.0, 0.0, 80.0), level(50, 900.0, 0.0, 80.0)];
        assert_eq!(find_max_concurrency_at_slo(&results, &workload()), 10);
    }

    #[test]
    fn saturation_point_detects_goodput_cliff() {
        let results = vec![level(1, 100.0, 0.0, 99.0), level(10, 150.0, 0.0, 95.0), level(50, 200.0, 0.0, 60.0)];
        let (concurrency, goodput) = find_saturation_point(&results);
        assert_eq!(concurrency, 10);
        assert_eq!(goodput, 95.0);
    }

    #[test]
    fn saturation_point_single_level_returns_its_own_goodput() {
        let results = vec![level(5, 100.0, 0.0, 97.0)];
        assert_eq!(find_saturation_point(&results), (5, 97.0));
    }

    #[test]
    fn recommendation_never_scales_below_current_gpu_count() {
        let profile = InfraProfile {
            gpu_model: "H100".to_string(),
            gpu_count: 4,
            gpu_memory_gb: 320.0,
            max_concurrency_at_slo: 1000,
            throughput_tokens_per_sec: 500.0,
            goodput_at_max_concurrency: 99.0,
            saturation_concurrency: 1000,
            saturation_goodput: 99.0,
        };
        let rec = calculate_recommendation("my-model", &workload(), &profile, 0.2);
        assert!(rec.recommended_count >= 4);
    }

    #[test]
    fn recommendation_scales_up_for_undersized_infra() {
        let profile = InfraProfile {
            gpu_model: "A10".to_string(),
            gpu_count: 1,
            gpu_memory_gb: 24.0,
            max_concurrency_at_slo: 50,
            throughput_tokens_per_sec: 100.0,
            goodput_at_max_concurrency: 95.0,
            saturation_concurrency: 50,
            saturation_goodput: 95.0,
        };
        // peak_concurrency=500, max_at_slo=50 -> scaling_factor=10, *1.2=12
        let rec = calculate_recommendation("my-model", &workload(), &profile, 0.2);
        assert_eq!(rec.recommended_count, 12);
        assert_eq!(rec.tensor_parallelism, 4);
    }

    #[test]
    fn tensor_parallelism_tiers() {
        let mut profile = InfraProfile {
            gpu_model: "A10".to_string(),
            gpu_count: 1,
            gpu_memory_gb: 24.0,
            max_concurrency_at_slo: 500,
            throughput_tokens_per_sec: 100.0,
            goodput_at_max_concurrency: 95.0,
            saturation_concurrency: 500,
            saturation_goodput: 95.0,
        };
        let rec = calculate_recommendation("m", &workload(), &profile, 0.0);
        assert_eq!(rec.tensor_parallelism, 1);

        profile.max_concurrency_at_slo = 125;
        let rec = calculate_recommendation("m", &workload(), &profile, 0.0);
        assert_eq!(rec.tensor_parallelism, 2);
    }
}
