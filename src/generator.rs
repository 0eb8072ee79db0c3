//! Load Generator (spec.md §4.4): drives a [`ServerAdapter`] at one or
//! more concurrency levels, either for a fixed request count or for a
//! fixed wall-clock duration, collecting [`RequestResult`]s and emitting
//! [`ProgressEvent`]s as it goes.
//!
//! Concurrency model mirrors the teacher's stress-test binary
//! (`src/bin/stress.rs`): a shared result buffer behind a single
//! `parking_lot::Mutex`, workers spawned with `tokio::spawn`, no I/O held
//! under the lock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::adapter::ServerAdapter;
use crate::metrics::aggregate;
use crate::model::{BenchmarkConfig, BenchmarkResult, ConcurrencyResult};
use crate::probe::PrometheusProbe;
use crate::progress::{MetricsSnapshot, ProgressEvent, ProgressSink, RequestLog};
use crate::validator::{self, ClientTotals};

/// Cooperative cancellation handle. Cloning shares the same underlying
/// flag; any clone can cancel all others.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called on this token or a clone.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic filler text used for synthetic prompts and warmup
/// requests; never counted against the configured `input_len` precisely
/// (exact tokenization is a non-goal), just close enough in word count.
pub fn synthetic_prompt(input_len: usize) -> String {
    const WORD: &str = "benchmark";
    std::iter::repeat(WORD)
        .take(input_len.max(1))
        .collect::<Vec<_>>()
        .join(" ")
}

struct SharedState {
    results: Mutex<Vec<crate::model::RequestResult>>,
    completed: AtomicUsize,
}

/// Optional validation bracketing: a Prometheus probe sampled before the
/// first concurrency level and after the last, plus the tolerance used to
/// compare the delta against client-observed totals.
struct Validation {
    probe: PrometheusProbe,
    tolerance: f64,
}

/// Drives a single [`ServerAdapter`] through a [`BenchmarkConfig`]'s
/// concurrency sweep.
pub struct Generator {
    adapter: Arc<dyn ServerAdapter>,
    sink: Arc<dyn ProgressSink>,
    validation: Option<Validation>,
}

impl Generator {
    pub fn new(adapter: Arc<dyn ServerAdapter>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            adapter,
            sink,
            validation: None,
        }
    }

    /// Bracket the run with a Prometheus snapshot before the first level
    /// and after the last, cross-validating client-observed totals against
    /// the server's own counters and attaching the result to the
    /// returned [`BenchmarkResult::validation`].
    pub fn with_validation(mut self, probe: PrometheusProbe, tolerance: f64) -> Self {
        self.validation = Some(Validation { probe, tolerance });
        self
    }

    /// Run every concurrency level in `config.concurrency`, in order, and
    /// assemble a [`BenchmarkResult`]. Honors `cancel` between and within
    /// levels: a cancelled run returns whatever completed so far.
    pub async fn run(&self, config: &BenchmarkConfig, cancel: &CancelToken) -> BenchmarkResult {
        let started_at = Utc::now();
        let overall_start = Instant::now();

        if config.warmup > 0 {
            self.adapter
                .warmup(config.warmup, config.input_len, config.output_len)
                .await;
        }

        let before_snapshot = match &self.validation {
            Some(v) => v.probe.snapshot().await,
            None => None,
        };

        let mut results = Vec::with_capacity(config.concurrency.len());
        for &concurrency in &config.concurrency {
            if cancel.is_cancelled() {
                break;
            }
            self.sink
                .on_progress(0, config.concurrency.len(), ProgressEvent::LevelStart { concurrency });
            let level_result = self.run_level(config, concurrency, cancel).await;
            results.push(level_result);
        }

        let validation = match (&self.validation, before_snapshot) {
            (Some(v), Some(before)) => match v.probe.snapshot().await {
                Some(after) => {
                    let total_requests: u64 = results.iter().map(|r| r.total_requests).sum();
                    let successful_requests: u64 = results.iter().map(|r| r.successful_requests).sum();
                    let total_output_tokens: u64 = results.iter().map(|r| r.total_output_tokens).sum();
                    let client = ClientTotals {
                        total_requests,
                        successful_requests,
                        avg_ttft_ms: weighted_mean_ttft_ms(&results),
                        total_output_tokens,
                    };
                    Some(validator::validate(&before, &after, &client, v.tolerance))
                }
                None => {
                    tracing::warn!("could not fetch post-run Prometheus snapshot; skipping validation");
                    None
                }
            },
            _ => None,
        };

        let completed_at = Utc::now();
        BenchmarkResult {
            run_id: Uuid::new_v4(),
            server_url: config.server_url.clone(),
            model: config.model.clone(),
            config: config.clone(),
            results,
            started_at,
            completed_at,
            duration_s: overall_start.elapsed().as_secs_f64(),
            validation,
            server_infra: None,
        }
    }

    async fn run_level(
        &self,
        config: &BenchmarkConfig,
        concurrency: usize,
        cancel: &CancelToken,
    ) -> ConcurrencyResult {
        let state = Arc::new(SharedState {
            results: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        });

        let level_start = Instant::now();

        if let Some(duration_s) = config.duration_s {
            self.run_duration_mode(config, concurrency, Duration::from_secs(duration_s), &state, cancel, level_start)
                .await;
        } else {
            self.run_count_mode(config, concurrency, &state, cancel, level_start).await;
        }

        let elapsed = level_start.elapsed().as_secs_f64();
        let results = state.results.lock().clone();
        aggregate(&results, elapsed, concurrency, config.goodput_thresholds.as_ref())
    }

    /// Fixed request count, fanned out through a counting semaphore —
    /// `concurrency` permits bound how many `send` calls are in flight at
    /// once, but all `num_prompts` requests are eventually issued.
    async fn run_count_mode(
        &self,
        config: &BenchmarkConfig,
        concurrency: usize,
        state: &Arc<SharedState>,
        cancel: &CancelToken,
        level_start: Instant,
    ) {
        let total = config.num_prompts;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let prompt = synthetic_prompt(config.input_len);

        let mut handles = Vec::with_capacity(total);
        for request_id in 0..total {
            if cancel.is_cancelled() {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let adapter = self.adapter.clone();
            let sink = self.sink.clone();
            let state = state.clone();
            let prompt = prompt.clone();
            let cancel = cancel.clone();
            let output_len = config.output_len;
            let stream = config.stream;

            handles.push(tokio::spawn(async move {
                let result = tokio::select! {
                    res = adapter.send(request_id as u64, &prompt, output_len, stream) => res,
                    _ = cancel.cancelled() => crate::model::RequestResult::failure(
                        request_id as u64,
                        0.0,
                        0,
                        crate::model::ErrorKind::Cancelled,
                    ),
                };
                drop(permit);
                record_and_report(&state, &sink, result, total, concurrency, level_start);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        // Emit a final snapshot even if `total` isn't a clean multiple of
        // the reporting cadence so the caller always sees the run's end state.
        emit_snapshot(state, &self.sink, concurrency, total, level_start);
    }

    /// Fixed wall-clock duration, driven by a static worker pool that each
    /// claims the next monotonic request id under a lock until the clock
    /// runs out or cancellation fires.
    async fn run_duration_mode(
        &self,
        config: &BenchmarkConfig,
        concurrency: usize,
        duration: Duration,
        state: &Arc<SharedState>,
        cancel: &CancelToken,
        level_start: Instant,
    ) {
        let next_id = Arc::new(AtomicUsize::new(0));
        let deadline = Instant::now() + duration;
        let prompt = synthetic_prompt(config.input_len);

        let mut handles = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let adapter = self.adapter.clone();
            let sink = self.sink.clone();
            let state = state.clone();
            let prompt = prompt.clone();
            let cancel = cancel.clone();
            let next_id = next_id.clone();
            let output_len = config.output_len;
            let stream = config.stream;

            handles.push(tokio::spawn(async move {
                loop {
                    if Instant::now() >= deadline || cancel.is_cancelled() {
                        break;
                    }
                    let request_id = next_id.fetch_add(1, Ordering::SeqCst) as u64;
                    let result = tokio::select! {
                        res = adapter.send(request_id, &prompt, output_len, stream) => res,
                        _ = cancel.cancelled() => crate::model::RequestResult::failure(
                            request_id,
                            0.0,
                            0,
                            crate::model::ErrorKind::Cancelled,
                        ),
                        _ = tokio::time::sleep_until(deadline.into()) => break,
                    };
                    record_and_report(&state, &sink, result, 0, concurrency, level_start);
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let completed = state.completed.load(Ordering::SeqCst);
        emit_snapshot(state, &self.sink, concurrency, completed, level_start);
    }
}

/// Combine each level's successful-request-weighted TTFT mean into one
/// overall figure. Levels with zero successes contribute nothing.
pub fn weighted_mean_ttft_ms(results: &[ConcurrencyResult]) -> f64 {
    let total_successful: u64 = results.iter().map(|r| r.successful_requests).sum();
    if total_successful == 0 {
        return 0.0;
    }
    let weighted_sum: f64 = results
        .iter()
        .map(|r| r.ttft.mean * r.successful_requests as f64)
        .sum();
    weighted_sum / total_successful as f64
}

fn record_and_report(
    state: &Arc<SharedState>,
    sink: &Arc<dyn ProgressSink>,
    result: crate::model::RequestResult,
    total: usize,
    concurrency: usize,
    level_start: Instant,
) {
    let log = RequestLog {
        request_id: result.request_id,
        success: result.success,
        error_kind: result.error_kind.clone(),
        ttft_ms: result.ttft_ms,
        e2e_ms: result.e2e_ms,
        output_tokens: result.output_tokens,
        timestamp: Utc::now(),
    };

    let completed = {
        let mut results = state.results.lock();
        results.push(result);
        state.completed.fetch_add(1, Ordering::SeqCst) + 1
    };

    sink.on_progress(completed, total, ProgressEvent::RequestLog(log));

    let cadence = total.div_ceil(20).max(10);
    if completed % cadence == 0 {
        emit_snapshot(state, sink, concurrency, total, level_start);
    }
}

fn emit_snapshot(
    state: &Arc<SharedState>,
    sink: &Arc<dyn ProgressSink>,
    concurrency: usize,
    total: usize,
    level_start: Instant,
) {
    let results = state.results.lock();
    let completed = results.len();
    let success_count = results.iter().filter(|r| r.success).count();
    let error_count = completed - success_count;

    let ttft_values: Vec<f64> = results.iter().filter(|r| r.success).map(|r| r.ttft_ms).collect();
    let e2e_values: Vec<f64> = results.iter().filter(|r| r.success).map(|r| r.e2e_ms).collect();
    let total_output: u64 = results.iter().filter(|r| r.success).map(|r| r.output_tokens).sum();

    let ttft_avg_ms = mean(&ttft_values);
    let ttft_median_ms = crate::metrics::latency_stats(&ttft_values).median;
    let e2e_avg_ms = mean(&e2e_values);

    let elapsed_s = level_start.elapsed().as_secs_f64();
    let throughput_tokens_per_sec = if elapsed_s > 0.0 { total_output as f64 / elapsed_s } else { 0.0 };

    let snapshot = MetricsSnapshot {
        concurrency,
        completed,
        success_count,
        error_count,
        ttft_avg_ms,
        ttft_median_ms,
        e2e_avg_ms,
        throughput_tokens_per_sec,
        timestamp: Utc::now(),
    };
    drop(results);

    sink.on_progress(completed, total, ProgressEvent::Snapshot(snapshot));
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
