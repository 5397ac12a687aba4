//! Runtime-owned metrics facade for stages and queues.
//!
//! The runners report into this trait; stages never see it. Implementations
//! must be cheap enough for hot paths and safe to call from any worker
//! thread. Exporter-backed implementations live with the observability
//! collaborator; the engine ships a no-op and a tracing-backed one.

use weir_core::clock::monotonic_ns;
use weir_core::payload::Payload;

use crate::queue_runtime::QueueRuntime;

/// Metrics hooks invoked by the stage runners.
pub trait StageMetrics: Send + Sync {
    /// Called when a payload is dequeued from a queue.
    fn record_queue_dequeue(&self, queue: &QueueRuntime, payload: &Payload);

    /// Called when a payload is enqueued into a queue.
    fn record_queue_enqueue(&self, queue: &QueueRuntime);

    /// Called after a stage call returns, with the wall-clock spent inside
    /// the stage only.
    fn record_stage_latency(&self, stage: &str, latency_ns: u64);

    /// Called when a stage fails or a payload is dropped on a schema
    /// mismatch.
    fn record_stage_error(&self, stage: &str);
}

/// Discards every measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl StageMetrics for NoopMetrics {
    fn record_queue_dequeue(&self, _queue: &QueueRuntime, _payload: &Payload) {}
    fn record_queue_enqueue(&self, _queue: &QueueRuntime) {}
    fn record_stage_latency(&self, _stage: &str, _latency_ns: u64) {}
    fn record_stage_error(&self, _stage: &str) {}
}

/// Emits measurements as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl StageMetrics for TracingMetrics {
    fn record_queue_dequeue(&self, queue: &QueueRuntime, payload: &Payload) {
        // Queue latency is only meaningful when the enqueue stamp exists.
        let queue_ns = (payload.meta.enqueue_ts_ns > 0)
            .then(|| monotonic_ns().saturating_sub(payload.meta.enqueue_ts_ns));
        tracing::debug!(
            queue = %queue.name,
            bytes = payload.len(),
            queue_latency_ns = queue_ns,
            "payload dequeued"
        );
    }

    fn record_queue_enqueue(&self, queue: &QueueRuntime) {
        tracing::debug!(queue = %queue.name, "payload enqueued");
    }

    fn record_stage_latency(&self, stage: &str, latency_ns: u64) {
        tracing::debug!(stage, latency_ns, "stage call finished");
    }

    fn record_stage_error(&self, stage: &str) {
        tracing::error!(stage, "stage error recorded");
    }
}
