//! Infrastructure probes (ports, spec.md §4.3 and §1 Non-goals).
//!
//! `PrometheusProbe` is a full implementation: scraping and parsing a
//! vLLM-style `/metrics` exposition is squarely in scope. GPU utilization
//! and container log scraping are explicitly out of scope (spec.md §1
//! treats them as external collaborators) — only their port traits are
//! defined here, so a caller can wire in an implementation without the
//! core depending on Docker or a GPU driver.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;

/// A point-in-time snapshot of the counters this crate cross-checks
/// against client-observed totals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrometheusSnapshot {
    pub request_success_total: u64,
    pub generation_tokens_total: u64,
    pub ttft_sum_seconds: f64,
    pub ttft_count: u64,
}

impl PrometheusSnapshot {
    pub fn avg_ttft_ms(&self) -> f64 {
        if self.ttft_count == 0 {
            0.0
        } else {
            self.ttft_sum_seconds / self.ttft_count as f64 * 1000.0
        }
    }
}

/// Scrapes and parses a Prometheus text exposition endpoint.
pub struct PrometheusProbe {
    client: reqwest::Client,
    server_url: String,
}

impl PrometheusProbe {
    pub fn new(server_url: String, timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            server_url,
        }
    }

    /// Fetch `/metrics` and parse it. Returns `None` on any transport or
    /// status failure — this probe is best-effort, matching the
    /// Prometheus-only fallback the validator degrades to.
    pub async fn snapshot(&self) -> Option<PrometheusSnapshot> {
        let url = format!("{}/metrics", self.server_url.trim_end_matches('/'));
        let resp = self.client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let text = resp.text().await.ok()?;
        Some(parse_prometheus_text(&text))
    }
}

/// `request_success_total` is reported per `finished_reason` label (stop,
/// length, abort, error) so every matching line must be summed, not just
/// the first. The other counters take their first match.
pub fn parse_prometheus_text(text: &str) -> PrometheusSnapshot {
    let request_success_total = sum_matches(
        text,
        &[
            r"vllm:request_success_total\{[^}]*\}\s+([\d.eE+-]+)",
            r"vllm_request_success_total\{[^}]*\}\s+([\d.eE+-]+)",
            r"vllm:request_success_total\s+([\d.eE+-]+)",
            r"vllm_request_success_total\s+([\d.eE+-]+)",
        ],
    ) as u64;

    let generation_tokens_total = first_match(
        text,
        &[
            r"vllm:generation_tokens_total\{[^}]*\}\s+([\d.eE+-]+)",
            r"vllm_generation_tokens_total\{[^}]*\}\s+([\d.eE+-]+)",
            r"vllm:generation_tokens_total\s+([\d.eE+-]+)",
            r"vllm_generation_tokens_total\s+([\d.eE+-]+)",
        ],
    )
    .unwrap_or(0.0) as u64;

    let ttft_sum_seconds = first_match(
        text,
        &[
            r"vllm:time_to_first_token_seconds_sum\{[^}]*\}\s+([\d.eE+-]+)",
            r"vllm_time_to_first_token_seconds_sum\{[^}]*\}\s+([\d.eE+-]+)",
            r"vllm:time_to_first_token_seconds_sum\s+([\d.eE+-]+)",
            r"vllm_time_to_first_token_seconds_sum\s+([\d.eE+-]+)",
        ],
    )
    .unwrap_or(0.0);

    let ttft_count = first_match(
        text,
        &[
            r"vllm:time_to_first_token_seconds_count\{[^}]*\}\s+([\d.eE+-]+)",
            r"vllm_time_to_first_token_seconds_count\{[^}]*\}\s+([\d.eE+-]+)",
            r"vllm:time_to_first_token_seconds_count\s+([\d.eE+-]+)",
            r"vllm_time_to_first_token_seconds_count\s+([\d.eE+-]+)",
        ],
    )
    .unwrap_or(0.0) as u64;

    PrometheusSnapshot {
        request_success_total,
        generation_tokens_total,
        ttft_sum_seconds,
        ttft_count,
    }
}

fn sum_matches(text: &str, patterns: &[&str]) -> f64 {
    for pattern in patterns {
        let Ok(re) = Regex::new(pattern) else { continue };
        let mut total = 0.0;
        let mut found = false;
        for cap in re.captures_iter(text) {
            if let Ok(v) = cap[1].parse::<f64>() {
                total += v;
                found = true;
            }
        }
        if found {
            return total;
        }
    }
    0.0
}

fn first_match(text: &str, patterns: &[&str]) -> Option<f64> {
    for pattern in patterns {
        let Ok(re) = Regex::new(pattern) else { continue };
        if let Some(cap) = re.captures(text) {
            if let Ok(v) = cap[1].parse::<f64>() {
                return Some(v);
            }
        }
    }
    None
}

/// Point-in-time GPU utilization/memory reading. Out of scope to collect
/// (spec.md §1): no implementation ships, only the capability a caller
/// can supply.
#[derive(Debug, Clone, Default)]
pub struct GpuReading {
    pub gpu_model: String,
    pub gpu_count: usize,
    pub gpu_memory_gb: f64,
    pub utilization_percent: f64,
    pub labels: HashMap<String, String>,
}

#[async_trait]
pub trait GpuProbe: Send + Sync {
    async fn read(&self) -> Option<GpuReading>;
}

/// Container-log-derived engine metrics (KV cache usage, prefix cache hit
/// rate, warning count). Out of scope to collect (spec.md §1): no
/// implementation ships, only the port.
#[derive(Debug, Clone, Default)]
pub struct ContainerLogMetrics {
    pub peak_kv_cache_usage_percent: f64,
    pub prefix_cache_hit_rate_percent: f64,
    pub warning_count: usize,
}

#[async_trait]
pub trait ContainerLogProbe: Send + Sync {
    async fn collect(&self) -> Option<ContainerLogMetrics>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# HELP vllm:request_success_total Count of successfully processed requests.
vllm:request_success_total{engine="0",finished_reason="stop",model_name="m"} 42
vllm:request_success_total{engine="0",finished_reason="length",model_name="m"} 8
vllm:generation_tokens_total{engine="0",model_name="m"} 12345
vllm:time_to_first_token_seconds_sum{engine="0",model_name="m"} 12.5
vllm:time_to_first_token_seconds_count{engine="0",model_name="m"} 50
"#;

    #[test]
    fn request_success_sums_across_finished_reasons() {
        let snap = parse_prometheus_text(SAMPLE);
        assert_eq!(snap.request_success_total, 50);
    }

    #[test]
    fn other_counters_take_first_match() {
        let snap = parse_prometheus_text(SAMPLE);
        assert_eq!(snap.generation_tokens_total, 12345);
        assert_eq!(snap.ttft_count, 50);
        assert!((snap.ttft_sum_seconds - 12.5).abs() < 1e-9);
    }

    #[test]
    fn avg_ttft_ms_converts_seconds_to_millis() {
        let snap = PrometheusSnapshot {
            ttft_sum_seconds: 2.0,
            ttft_count: 4,
            ..Default::default()
        };
        assert!((snap.avg_ttft_ms() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn avg_ttft_ms_zero_count_is_zero() {
        let snap = PrometheusSnapshot::default();
        assert_eq!(snap.avg_ttft_ms(), 0.0);
    }

    #[test]
    fn missing_metrics_parse_to_zero_snapshot() {
        let snap = parse_prometheus_text("# empty\n");
        assert_eq!(snap, PrometheusSnapshot::default());
    }
}
