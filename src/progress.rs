//! Progress Sink (port, spec.md §4.5). The source overloads a single
//! callback argument with three structurally distinct payloads; per the
//! DESIGN NOTES (§9) this is replaced with a tagged `ProgressEvent` enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ErrorKind;

/// A per-request terminal log, emitted once per completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub request_id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub ttft_ms: f64,
    pub e2e_ms: f64,
    pub output_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

/// Rolling partial-metrics snapshot, computed from the in-progress result
/// buffer every `max(10, N/20)` completions and at run end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub concurrency: usize,
    pub completed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub ttft_avg_ms: f64,
    pub ttft_median_ms: f64,
    pub e2e_avg_ms: f64,
    pub throughput_tokens_per_sec: f64,
    pub timestamp: DateTime<Utc>,
}

/// The three payload shapes a progress sink may receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    LevelStart { concurrency: usize },
    RequestLog(RequestLog),
    Snapshot(MetricsSnapshot),
}

/// Consumer of progress events. Implementations MUST be best-effort and
/// non-blocking: a slow or failing sink must never back-pressure or abort
/// measurement (spec.md §4.5, §5).
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, current: usize, total: usize, event: ProgressEvent);
}

/// A sink that drops every event. Used when no progress reporting is
/// wanted; satisfies the "bounded time even with no subscribers" contract
/// trivially.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _current: usize, _total: usize, _event: ProgressEvent) {}
}

/// Broadcast-backed sink: fans an event out to any number of subscribers
/// keyed implicitly by the shared channel. Send failures (no receivers,
/// full lagging receiver) are swallowed, matching the "fire-and-forget"
/// contract in spec.md §5.
pub struct BroadcastSink {
    tx: tokio::sync::broadcast::Sender<(usize, usize, ProgressEvent)>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<(usize, usize, ProgressEvent)> {
        self.tx.subscribe()
    }
}

impl ProgressSink for BroadcastSink {
    fn on_progress(&self, current: usize, total: usize, event: ProgressEvent) {
        // No subscribers, or a full lagging subscriber, is not an error
        // here: the sink is fire-and-forget by contract.
        let _ = self.tx.send((current, total, event));
    }
}
