//! Per-worker stage execution loops.
//!
//! One runner function per stage kind. Each runs on a dedicated worker
//! thread and owns everything stages should not have to think about:
//! looping, dequeue and enqueue, enqueue timestamps, schema contracts,
//! span propagation, latency measurement, and fault isolation.
//!
//! Failure policy: an error escaping a stage call is fatal for the whole
//! flow — the runner records an error metric, requests stop, closes its
//! output queue (for producing roles, to unblock downstream immediately)
//! and exits. A failed push is not an error; it means the queue closed or
//! stop was requested, and the runner exits quietly. On a normal loop
//! exit the runner never closes its output queue — closure is decided by
//! the orchestrator's per-queue producer count.

use weir_core::clock::monotonic_ns;
use weir_core::payload::{Payload, PayloadMeta};
use weir_core::stage::{SinkStage, SourceStage, StageContext, TransformStage};

use crate::metrics::StageMetrics;
use crate::queue_runtime::QueueRuntime;

/// Drive a source stage until stop, end-of-stream, or a fatal error.
pub fn run_source(
    stage: &mut dyn SourceStage,
    ctx: &StageContext,
    output: &QueueRuntime,
    metrics: &dyn StageMetrics,
) {
    let name = stage.name().to_string();

    while !ctx.stop.stop_requested() {
        let started = monotonic_ns();
        let produced = {
            let _span = stage_span(&name, "source", None);
            stage.produce(ctx)
        };
        let elapsed = monotonic_ns().saturating_sub(started);

        let mut payload = match produced {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(stage = %name, error = %err, "source stage failed; stopping flow");
                metrics.record_stage_error(&name);
                ctx.stop.request_stop();
                output.queue.close();
                return;
            }
        };
        metrics.record_stage_latency(&name, elapsed);

        if !apply_output_schema(&mut payload, output, metrics, &name) {
            continue;
        }

        payload.meta.enqueue_ts_ns = monotonic_ns();
        stamp_trace(&mut payload.meta);
        if !output.queue.push(payload, &ctx.stop) {
            break;
        }
        metrics.record_queue_enqueue(output);
    }
}

/// Drive a transform stage until stop, input exhaustion, or a fatal error.
pub fn run_transform(
    stage: &mut dyn TransformStage,
    ctx: &StageContext,
    input: &QueueRuntime,
    output: &QueueRuntime,
    metrics: &dyn StageMetrics,
) {
    let name = stage.name().to_string();

    while !ctx.stop.stop_requested() {
        let Some(payload) = input.queue.pop(&ctx.stop) else {
            break;
        };
        metrics.record_queue_dequeue(input, &payload);

        if !check_input_schema(input, &payload, metrics, &name) {
            continue;
        }

        let started = monotonic_ns();
        let processed = {
            let _span = stage_span(&name, "transform", Some(&payload.meta));
            stage.process(ctx, &payload)
        };
        let elapsed = monotonic_ns().saturating_sub(started);

        let mut out = match processed {
            Ok(out) => out,
            Err(err) => {
                tracing::error!(stage = %name, error = %err, "transform stage failed; stopping flow");
                metrics.record_stage_error(&name);
                ctx.stop.request_stop();
                output.queue.close();
                return;
            }
        };
        metrics.record_stage_latency(&name, elapsed);

        if !apply_output_schema(&mut out, output, metrics, &name) {
            continue;
        }

        out.meta.enqueue_ts_ns = monotonic_ns();
        stamp_trace(&mut out.meta);
        if !output.queue.push(out, &ctx.stop) {
            break;
        }
        metrics.record_queue_enqueue(output);
    }
}

/// Drive a sink stage until stop, input exhaustion, or a fatal error.
pub fn run_sink(
    stage: &mut dyn SinkStage,
    ctx: &StageContext,
    input: &QueueRuntime,
    metrics: &dyn StageMetrics,
) {
    let name = stage.name().to_string();

    while !ctx.stop.stop_requested() {
        let Some(payload) = input.queue.pop(&ctx.stop) else {
            break;
        };
        metrics.record_queue_dequeue(input, &payload);

        if !check_input_schema(input, &payload, metrics, &name) {
            continue;
        }

        let started = monotonic_ns();
        let consumed = {
            let _span = stage_span(&name, "sink", Some(&payload.meta));
            stage.consume(ctx, &payload)
        };
        let elapsed = monotonic_ns().saturating_sub(started);

        if let Err(err) = consumed {
            tracing::error!(stage = %name, error = %err, "sink stage failed; stopping flow");
            metrics.record_stage_error(&name);
            ctx.stop.request_stop();
            return;
        }
        metrics.record_stage_latency(&name, elapsed);
    }
}

/// Input-side schema contract: when the queue carries a schema id, the
/// payload must carry the same one. Mismatches drop the payload and the
/// loop continues.
fn check_input_schema(
    queue: &QueueRuntime,
    payload: &Payload,
    metrics: &dyn StageMetrics,
    stage: &str,
) -> bool {
    if !queue.has_schema() || payload.meta.schema_id == queue.schema_id {
        return true;
    }

    tracing::warn!(
        stage,
        queue = %queue.name,
        expected = %queue.schema_id,
        found = %payload.meta.schema_id,
        "dropping payload with mismatched schema"
    );
    metrics.record_stage_error(stage);
    false
}

/// Output-side schema contract: an unset payload schema id is stamped with
/// the queue's; a set but different one drops the payload.
fn apply_output_schema(
    payload: &mut Payload,
    queue: &QueueRuntime,
    metrics: &dyn StageMetrics,
    stage: &str,
) -> bool {
    if !queue.has_schema() {
        return true;
    }
    if payload.meta.schema_id.is_empty() {
        payload.meta.schema_id = queue.schema_id.clone();
        return true;
    }
    if payload.meta.schema_id == queue.schema_id {
        return true;
    }

    tracing::warn!(
        stage,
        queue = %queue.name,
        expected = %queue.schema_id,
        found = %payload.meta.schema_id,
        "dropping payload whose schema does not match its output queue"
    );
    metrics.record_stage_error(stage);
    false
}

/// Write span identity into outgoing metadata: keep an existing trace,
/// mint one otherwise, and always mint a fresh span id for this emission.
fn stamp_trace(meta: &mut PayloadMeta) {
    if !meta.has_trace() {
        meta.trace_id = rand::random();
    }
    meta.span_id = rand::random();
}

struct IdHex<'a>(&'a [u8]);

impl std::fmt::Display for IdHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Per-invocation span around the stage call. For transforms and sinks
/// the incoming payload's identifiers are linked as the remote parent
/// when present. Pure observability; skipped entirely below debug level.
fn stage_span(
    stage: &str,
    kind: &'static str,
    parent: Option<&PayloadMeta>,
) -> Option<tracing::span::EnteredSpan> {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return None;
    }

    let span = match parent.filter(|meta| meta.has_trace()) {
        Some(meta) => tracing::debug_span!(
            "stage_call",
            stage,
            kind,
            trace_id = %IdHex(&meta.trace_id),
            parent_span_id = %IdHex(&meta.span_id),
        ),
        None => tracing::debug_span!("stage_call", stage, kind),
    };
    Some(span.entered())
}
