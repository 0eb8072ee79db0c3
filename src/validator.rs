//! Cross-Validator (spec.md §4.3): compares client-observed totals
//! against the server's own Prometheus counters, sampled before and
//! after the run.

use chrono::Utc;

use crate::model::{MetricComparison, ValidationResult};
use crate::probe::PrometheusSnapshot;

/// Client-side totals to validate against the server's delta.
#[derive(Debug, Clone, Copy)]
pub struct ClientTotals {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub avg_ttft_ms: f64,
    pub total_output_tokens: u64,
}

/// Compare `before`/`after` Prometheus snapshots against `client`,
/// applying `tolerance` to request-count and token-count comparisons and
/// a fixed 10% tolerance to TTFT (the original system's stated rationale:
/// TTFT is measured differently enough client- vs server-side to warrant
/// a looser bound).
pub fn validate(before: &PrometheusSnapshot, after: &PrometheusSnapshot, client: &ClientTotals, tolerance: f64) -> ValidationResult {
    let delta_requests = after.request_success_total.saturating_sub(before.request_success_total);
    let delta_tokens = after.generation_tokens_total.saturating_sub(before.generation_tokens_total);

    let ttft_count_delta = after.ttft_count.saturating_sub(before.ttft_count);
    let ttft_sum_delta = after.ttft_sum_seconds - before.ttft_sum_seconds;
    let server_avg_ttft_ms = if ttft_count_delta > 0 {
        ttft_sum_delta / ttft_count_delta as f64 * 1000.0
    } else {
        0.0
    };

    let mut comparisons = Vec::with_capacity(3);
    let mut warnings = Vec::new();
    let mut overall_passed = true;

    let request_passed = within_tolerance(client.successful_requests as f64, delta_requests as f64, tolerance);
    comparisons.push(MetricComparison {
        name: "Request Count".to_string(),
        client: client.successful_requests as f64,
        server: delta_requests as f64,
        diff_percent: diff_percent(client.successful_requests as f64, delta_requests as f64),
        passed: request_passed,
    });
    if !request_passed {
        warnings.push(format!(
            "request count mismatch: client={}, server={delta_requests}",
            client.successful_requests
        ));
        overall_passed = false;
    }

    let ttft_passed = within_tolerance(client.avg_ttft_ms, server_avg_ttft_ms, 0.10);
    comparisons.push(MetricComparison {
        name: "Avg TTFT (ms)".to_string(),
        client: client.avg_ttft_ms,
        server: server_avg_ttft_ms,
        diff_percent: diff_percent(client.avg_ttft_ms, server_avg_ttft_ms),
        passed: ttft_passed,
    });
    if !ttft_passed {
        warnings.push(format!(
            "TTFT mismatch: client={:.1}ms, server={server_avg_ttft_ms:.1}ms",
            client.avg_ttft_ms
        ));
        overall_passed = false;
    }

    let token_passed = within_tolerance(client.total_output_tokens as f64, delta_tokens as f64, tolerance);
    comparisons.push(MetricComparison {
        name: "Total Tokens".to_string(),
        client: client.total_output_tokens as f64,
        server: delta_tokens as f64,
        diff_percent: diff_percent(client.total_output_tokens as f64, delta_tokens as f64),
        passed: token_passed,
    });
    if !token_passed {
        warnings.push(format!(
            "token count mismatch: client={}, server={delta_tokens}",
            client.total_output_tokens
        ));
        overall_passed = false;
    }

    ValidationResult {
        overall_passed,
        tolerance,
        validated_at: Utc::now(),
        comparisons,
        warnings,
    }
}

/// `server == 0` is only within tolerance if `client` is also exactly
/// zero — a plain percentage difference is undefined at zero and would
/// otherwise either always pass or always fail.
fn within_tolerance(client: f64, server: f64, tolerance: f64) -> bool {
    if server == 0.0 {
        return client == 0.0;
    }
    (client - server).abs() / server <= tolerance
}

fn diff_percent(client: f64, server: f64) -> f64 {
    if server == 0.0 {
        return if client == 0.0 { 0.0 } else { 100.0 };
    }
    (client - server).abs() / server * 100.0
}

/// Render a [`ValidationResult`] as a human-readable report, matching the
/// boxed-table layout the metrics dashboard already uses for run
/// summaries.
pub fn format_report(result: &ValidationResult) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&"=".repeat(65));
    out.push('\n');
    out.push_str("                    Validation Results\n");
    out.push_str(&"=".repeat(65));
    out.push('\n');
    out.push_str(&format!(
        "{:<20} {:<12} {:<12} {:<8} {}\n",
        "Metric", "Client", "Server", "Diff", "Status"
    ));
    out.push_str(&"-".repeat(65));
    out.push('\n');

    for comp in &result.comparisons {
        let status = if comp.passed { "PASS" } else { "FAIL" };
        out.push_str(&format!(
            "{:<20} {:<12.1} {:<12.1} {:<7.1}% {}\n",
            comp.name, comp.client, comp.server, comp.diff_percent, status
        ));
    }

    out.push_str(&"=".repeat(65));
    out.push('\n');
    out.push_str(&format!(
        "Overall: {}\n",
        if result.overall_passed { "PASSED" } else { "FAILED" }
    ));
    for warning in &result.warnings {
        out.push_str(&format!("  warning: {warning}\n"));
    }
    out
}
