//! End-to-end coverage spanning adapters, the metrics aggregator, the
//! validator, and the recommender, grounded in the seed scenarios the
//! statistical invariants were checked against during design.

use std::time::Duration;

use llm_loadtest::adapter::{AdapterConfig, OpenAiAdapter, ServerAdapter};
use llm_loadtest::metrics::aggregate;
use llm_loadtest::model::{ErrorKind, GoodputThresholds, InfraProfile, RequestResult, WorkloadSpec};
use llm_loadtest::probe::PrometheusSnapshot;
use llm_loadtest::recommender::{build_infra_profile, calculate_recommendation, find_saturation_point};
use llm_loadtest::validator::{self, ClientTotals};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Ten-by-ten happy path, streaming: deterministic TTFT = 100 + 10*id ms,
/// inter-token gap = 20ms, output_len = 5.
#[test]
fn ten_by_ten_happy_path_streaming() {
    let results: Vec<RequestResult> = (0..10)
        .map(|id| {
            let ttft = 100.0 + 10.0 * id as f64;
            let gaps = vec![20.0, 20.0, 20.0, 20.0];
            let e2e = ttft + gaps.iter().sum::<f64>();
            RequestResult::success(id, ttft, e2e, 64, 5, gaps)
        })
        .collect();

    let total_itl_samples: usize = results.iter().filter_map(|r| r.itl_ms.as_ref()).map(|v| v.len()).sum();
    assert_eq!(total_itl_samples, 40);

    let duration_s = 10.0;
    let agg = aggregate(&results, duration_s, 2, None);

    assert_eq!(agg.ttft.min, 100.0);
    assert_eq!(agg.ttft.max, 190.0);
    assert_eq!(agg.successful_requests, 10);
    let tpot = agg.tpot.expect("tpot present when output_tokens > 1");
    assert!((tpot.mean - 20.0).abs() < 1e-9);
    assert!((agg.throughput_tokens_per_sec - 50.0 / duration_s).abs() < 1e-9);
}

/// Cross-validation within tolerance: client 100 requests / 12800 output
/// tokens, Prometheus delta 103 requests / 12700 tokens.
#[test]
fn cross_validation_within_default_tolerance() {
    let before = PrometheusSnapshot::default();
    let after = PrometheusSnapshot {
        request_success_total: 103,
        generation_tokens_total: 12700,
        ttft_sum_seconds: 20.0,
        ttft_count: 100,
    };
    let client = ClientTotals {
        total_requests: 100,
        successful_requests: 100,
        avg_ttft_ms: 200.0,
        total_output_tokens: 100 * 128,
    };

    let result = validator::validate(&before, &after, &client, 0.05);
    let request_cmp = result.comparisons.iter().find(|c| c.name == "Request Count").unwrap();
    let token_cmp = result.comparisons.iter().find(|c| c.name == "Total Tokens").unwrap();
    assert!(request_cmp.passed, "3% request drift should pass a 5% tolerance");
    assert!(token_cmp.passed, "0.78% token drift should pass a 5% tolerance");
}

/// Staircase goodput `[100, 98, 95.8, 84.4, 50.0]`: the drop from level 3
/// (95.8) to level 4 (84.4) exceeds 10 percentage points, so saturation
/// is pinned at level 3's concurrency.
#[test]
fn saturation_detection_staircase() {
    use llm_loadtest::model::{GoodputResult, LatencyStats, PerThresholdSatisfied};

    let goodputs = [100.0, 98.0, 95.8, 84.4, 50.0];
    let results: Vec<_> = goodputs
        .iter()
        .enumerate()
        .map(|(i, &pct)| llm_loadtest::model::ConcurrencyResult {
            concurrency: (i + 1) * 10,
            ttft: LatencyStats::default(),
            tpot: None,
            itl: None,
            e2e: LatencyStats::default(),
            throughput_tokens_per_sec: 100.0,
            request_rate_per_sec: 1.0,
            total_requests: 100,
            successful_requests: 100,
            failed_requests: 0,
            error_rate_percent: 0.0,
            total_input_tokens: 100,
            total_output_tokens: 100,
            duration_s: 10.0,
            goodput: Some(GoodputResult {
                satisfied: pct as u64,
                total: 100,
                percent: pct,
                per_threshold_satisfied: PerThresholdSatisfied::default(),
            }),
        })
        .collect();

    let (saturation_concurrency, saturation_goodput) = find_saturation_point(&results);
    assert_eq!(saturation_concurrency, 30);
    assert_eq!(saturation_goodput, 95.8);
}

/// `max_concurrency_at_slo=120, peak=500, headroom=0.2, current_gpu_count=1`.
#[test]
fn recommender_division_seed_scenario() {
    let profile = InfraProfile {
        gpu_model: "A100".to_string(),
        gpu_count: 1,
        gpu_memory_gb: 80.0,
        max_concurrency_at_slo: 120,
        throughput_tokens_per_sec: 1000.0,
        goodput_at_max_concurrency: 97.0,
        saturation_concurrency: 120,
        saturation_goodput: 97.0,
    };
    let workload = WorkloadSpec {
        peak_concurrency: 500,
        ttft_target_ms: 500.0,
        tpot_target_ms: 50.0,
        goodput_target_percent: 95.0,
        avg_input_tokens: 128,
        avg_output_tokens: 128,
    };

    let rec = calculate_recommendation("my-model", &workload, &profile, 0.2);
    assert_eq!(rec.recommended_count, 5);
    assert_eq!(rec.tensor_parallelism, 2);
}

#[tokio::test]
async fn openai_adapter_end_to_end_against_mock_server_feeds_the_aggregator() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "a response with six words total"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 6}
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(AdapterConfig {
        server_url: server.uri(),
        model: "test-model".to_string(),
        api_key: None,
        timeout: Duration::from_secs(5),
    });

    let mut results = Vec::new();
    for i in 0..5 {
        results.push(adapter.send(i, "prompt", 32, false).await);
    }

    let agg = aggregate(&results, 1.0, 5, None);
    assert_eq!(agg.successful_requests, 5);
    assert_eq!(agg.total_output_tokens, 30);
}

#[test]
fn goodput_threshold_defaults_are_empty() {
    assert!(GoodputThresholds::default().is_empty());
}

#[test]
fn error_kind_display_matches_http_status() {
    assert_eq!(ErrorKind::Http(503).to_string(), "HTTP_503");
}
