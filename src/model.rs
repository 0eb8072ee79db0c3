//! Core data model shared by every component: requests, latency
//! statistics, goodput, per-concurrency results, and the top-level
//! benchmark config/result pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attempt against the server under test.
///
/// Invariant: if `success` then `ttft_ms >= 0.0`, `e2e_ms >= ttft_ms`, and
/// `output_tokens >= 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResult {
    pub request_id: u64,
    pub ttft_ms: f64,
    pub tpot_ms: Option<f64>,
    pub e2e_ms: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Gaps between tokens 2..N, milliseconds. Absent if <=1 gap observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub itl_ms: Option<Vec<f64>>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RequestResult {
    /// Build a successful result, deriving `tpot_ms` from the event-based
    /// TTFT/E2E/output_tokens the way both bundled adapters do.
    pub fn success(
        request_id: u64,
        ttft_ms: f64,
        e2e_ms: f64,
        input_tokens: u64,
        output_tokens: u64,
        itl_ms: Vec<f64>,
    ) -> Self {
        let tpot_ms = if output_tokens > 1 {
            Some((e2e_ms - ttft_ms) / (output_tokens - 1) as f64)
        } else {
            None
        };
        Self {
            request_id,
            ttft_ms,
            tpot_ms,
            e2e_ms,
            input_tokens,
            output_tokens,
            itl_ms: if itl_ms.is_empty() { None } else { Some(itl_ms) },
            success: true,
            error_kind: None,
        }
    }

    /// Build a failed result. `e2e_ms` is the elapsed time up to failure.
    pub fn failure(request_id: u64, e2e_ms: f64, input_tokens: u64, error_kind: ErrorKind) -> Self {
        Self {
            request_id,
            ttft_ms: 0.0,
            tpot_ms: None,
            e2e_ms,
            input_tokens,
            output_tokens: 0,
            itl_ms: None,
            success: false,
            error_kind: Some(error_kind),
        }
    }
}

/// Error taxonomy for a failed [`RequestResult`] (see spec.md §7 and §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Http(u16),
    Timeout,
    Connect,
    Decode,
    Cancelled,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Http(code) => write!(f, "HTTP_{code}"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Connect => write!(f, "Connect"),
            ErrorKind::Decode => write!(f, "Decode"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::Other => write!(f, "Other"),
        }
    }
}

/// Min/max/mean/median/p50/p95/p99/std over a (possibly empty) sample.
/// Percentiles use linear interpolation between the two nearest ranks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub std: f64,
}

/// Optional upper bounds on TTFT/TPOT/E2E used to compute goodput.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GoodputThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpot_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2e_ms: Option<f64>,
}

impl GoodputThresholds {
    pub fn is_empty(&self) -> bool {
        self.ttft_ms.is_none() && self.tpot_ms.is_none() && self.e2e_ms.is_none()
    }
}

/// Per-threshold satisfaction counts, present only for thresholds that
/// were actually configured.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerThresholdSatisfied {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpot: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2e: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GoodputResult {
    pub satisfied: u64,
    pub total: u64,
    pub percent: f64,
    pub per_threshold_satisfied: PerThresholdSatisfied,
}

/// Aggregated statistics for one concurrency level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyResult {
    pub concurrency: usize,
    pub ttft: LatencyStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpot: Option<LatencyStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub itl: Option<LatencyStats>,
    pub e2e: LatencyStats,
    pub throughput_tokens_per_sec: f64,
    pub request_rate_per_sec: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate_percent: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goodput: Option<GoodputResult>,
}

/// Configuration for a single benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub server_url: String,
    pub model: String,
    pub adapter_kind: String,
    pub input_len: usize,
    pub output_len: usize,
    pub num_prompts: usize,
    pub concurrency: Vec<usize>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub warmup: usize,
    pub timeout_s: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// If present, supersedes `num_prompts`: each level runs for this many
    /// seconds instead of for a fixed request count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goodput_thresholds: Option<GoodputThresholds>,
}

/// Snapshot of the validator comparing client-observed totals against the
/// server's own counters. See [`crate::validator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub overall_passed: bool,
    pub tolerance: f64,
    pub validated_at: DateTime<Utc>,
    pub comparisons: Vec<MetricComparison>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricComparison {
    pub name: String,
    pub client: f64,
    pub server: f64,
    pub diff_percent: f64,
    pub passed: bool,
}

/// Top-level result of a full benchmark run across all configured
/// concurrency levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub run_id: Uuid,
    pub server_url: String,
    pub model: String,
    pub config: BenchmarkConfig,
    pub results: Vec<ConcurrencyResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_infra: Option<InfraProfile>,
}

/// Target workload the [`crate::recommender`] scales infrastructure for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub peak_concurrency: usize,
    pub ttft_target_ms: f64,
    pub tpot_target_ms: f64,
    pub goodput_target_percent: f64,
    pub avg_input_tokens: usize,
    pub avg_output_tokens: usize,
}

/// Measured performance characteristics of the infrastructure under test,
/// built from a profiling [`BenchmarkResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraProfile {
    pub gpu_model: String,
    pub gpu_count: usize,
    pub gpu_memory_gb: f64,
    pub max_concurrency_at_slo: usize,
    pub throughput_tokens_per_sec: f64,
    pub goodput_at_max_concurrency: f64,
    pub saturation_concurrency: usize,
    pub saturation_goodput: f64,
}

impl InfraProfile {
    /// Sentinel profile used when no GPU probe is wired in.
    pub fn unknown_gpu(gpu_count: usize) -> (String, usize, f64) {
        ("Unknown GPU".to_string(), gpu_count, 0.0)
    }
}

/// Recommended infrastructure sizing for a [`WorkloadSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraRecommendation {
    pub model_name: String,
    pub workload: WorkloadSpec,
    pub current_infra: InfraProfile,
    pub recommended_gpu: String,
    pub recommended_count: usize,
    pub tensor_parallelism: usize,
    pub estimated_max_concurrency: usize,
    pub estimated_goodput: f64,
    pub estimated_throughput: f64,
    pub headroom_percent: f64,
    pub calculation_formula: String,
    pub reasoning: String,
}
