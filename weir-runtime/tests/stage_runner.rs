//! Behavioural tests for the stage runners.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use weir_core::payload::{Payload, PayloadMeta};
use weir_core::queue::BoundedQueue;
use weir_core::stage::{
    SinkStage, SourceStage, Stage, StageContext, StageError, StageResult, TransformStage,
};
use weir_core::StopToken;
use weir_runtime::metrics::StageMetrics;
use weir_runtime::queue_runtime::QueueRuntime;
use weir_runtime::runner;

#[derive(Default)]
struct MetricsState {
    queue_dequeues: u32,
    queue_enqueues: u32,
    latency_calls: u32,
    error_calls: u32,
    last_queue: String,
    last_dequeue_meta: PayloadMeta,
}

#[derive(Default)]
struct RecordingMetrics {
    state: Mutex<MetricsState>,
}

impl RecordingMetrics {
    fn snapshot(&self) -> MetricsState {
        let state = self.state.lock();
        MetricsState {
            queue_dequeues: state.queue_dequeues,
            queue_enqueues: state.queue_enqueues,
            latency_calls: state.latency_calls,
            error_calls: state.error_calls,
            last_queue: state.last_queue.clone(),
            last_dequeue_meta: state.last_dequeue_meta.clone(),
        }
    }
}

impl StageMetrics for RecordingMetrics {
    fn record_queue_dequeue(&self, queue: &QueueRuntime, payload: &Payload) {
        let mut state = self.state.lock();
        state.queue_dequeues += 1;
        state.last_queue = queue.name.clone();
        state.last_dequeue_meta = payload.meta.clone();
    }

    fn record_queue_enqueue(&self, queue: &QueueRuntime) {
        let mut state = self.state.lock();
        state.queue_enqueues += 1;
        state.last_queue = queue.name.clone();
    }

    fn record_stage_latency(&self, _stage: &str, _latency_ns: u64) {
        self.state.lock().latency_calls += 1;
    }

    fn record_stage_error(&self, _stage: &str) {
        self.state.lock().error_calls += 1;
    }
}

fn make_queue_runtime(name: &str, capacity: u32, schema_id: &str) -> QueueRuntime {
    QueueRuntime {
        name: name.to_string(),
        capacity,
        queue: Arc::new(BoundedQueue::<Payload>::new(capacity as usize)),
        schema_id: schema_id.to_string(),
    }
}

struct FakeSource {
    payloads: Vec<Payload>,
    index: usize,
}

impl FakeSource {
    fn new(payloads: Vec<Payload>) -> Self {
        Self { payloads, index: 0 }
    }
}

impl Stage for FakeSource {
    fn name(&self) -> &str {
        "fake_source"
    }
}

impl SourceStage for FakeSource {
    fn produce(&mut self, _ctx: &StageContext) -> StageResult<Option<Payload>> {
        let payload = self.payloads.get(self.index).cloned();
        self.index += 1;
        Ok(payload)
    }
}

#[derive(Default)]
struct FakeTransform {
    seen_inputs: Vec<PayloadMeta>,
}

impl Stage for FakeTransform {
    fn name(&self) -> &str {
        "fake_transform"
    }
}

impl TransformStage for FakeTransform {
    fn process(&mut self, _ctx: &StageContext, input: &Payload) -> StageResult<Payload> {
        self.seen_inputs.push(input.meta.clone());
        Ok(input.clone())
    }
}

#[test]
fn source_enqueues_payloads_and_records_metrics() {
    let output = make_queue_runtime("out", 4, "");
    let ctx = StageContext::new(StopToken::new());
    let metrics = RecordingMetrics::default();

    let mut stage = FakeSource::new(vec![Payload::default(), Payload::default()]);
    runner::run_source(&mut stage, &ctx, &output, &metrics);
    output.queue.close();

    let first = output.queue.pop(&ctx.stop).expect("first payload");
    let second = output.queue.pop(&ctx.stop).expect("second payload");
    assert!(output.queue.pop(&ctx.stop).is_none());

    let state = metrics.snapshot();
    assert_eq!(state.queue_enqueues, 2);
    assert_eq!(state.latency_calls, 2);
    assert!(first.meta.enqueue_ts_ns > 0);
    assert!(second.meta.enqueue_ts_ns > 0);
    // The runner mints trace identity on emission.
    assert!(first.meta.has_trace());
    assert!(first.meta.span_id.iter().any(|b| *b != 0));
}

#[test]
fn source_applies_queue_schema_to_payloads() {
    let output = make_queue_runtime("out", 2, "schema-1");
    let ctx = StageContext::new(StopToken::new());
    let metrics = RecordingMetrics::default();

    let mut stage = FakeSource::new(vec![Payload::default()]);
    runner::run_source(&mut stage, &ctx, &output, &metrics);
    output.queue.close();

    let first = output.queue.pop(&ctx.stop).expect("payload");
    assert_eq!(first.meta.schema_id, "schema-1");
}

#[test]
fn source_respects_stop_token() {
    let output = make_queue_runtime("out", 2, "");
    let stop = StopToken::new();
    stop.request_stop();
    let ctx = StageContext::new(stop);
    let metrics = RecordingMetrics::default();

    let mut stage = FakeSource::new(vec![Payload::default()]);
    runner::run_source(&mut stage, &ctx, &output, &metrics);
    output.queue.close();

    let state = metrics.snapshot();
    assert_eq!(state.queue_enqueues, 0);
    assert_eq!(state.latency_calls, 0);
    assert!(output.queue.pop(&ctx.stop).is_none());
}

#[test]
fn transform_dequeues_transforms_and_records_metrics() {
    let input = make_queue_runtime("in", 2, "");
    let output = make_queue_runtime("out", 2, "");
    let ctx = StageContext::new(StopToken::new());
    let metrics = RecordingMetrics::default();

    let mut meta = PayloadMeta {
        flags: 3,
        enqueue_ts_ns: 123,
        ..PayloadMeta::default()
    };
    meta.trace_id[0] = 0xAA;
    assert!(input.queue.push(Payload::with_meta(b"x".to_vec(), meta), &ctx.stop));
    input.queue.close();

    let mut stage = FakeTransform::default();
    runner::run_transform(&mut stage, &ctx, &input, &output, &metrics);
    output.queue.close();

    let out = output.queue.pop(&ctx.stop).expect("transformed payload");
    assert!(output.queue.pop(&ctx.stop).is_none());

    let state = metrics.snapshot();
    assert_eq!(state.queue_dequeues, 1);
    assert_eq!(state.queue_enqueues, 1);
    assert_eq!(state.latency_calls, 1);
    assert_eq!(state.last_dequeue_meta.flags, 3);
    assert_eq!(out.meta.flags, 3);
    // Existing trace identity is preserved; a fresh span id is minted.
    assert_eq!(out.meta.trace_id[0], 0xAA);
    assert!(out.meta.enqueue_ts_ns > 0);
    assert_eq!(stage.seen_inputs.len(), 1);
    assert_eq!(stage.seen_inputs[0].trace_id[0], 0xAA);
}

#[test]
fn transform_drops_payloads_with_schema_mismatch() {
    let input = make_queue_runtime("in", 1, "schema-a");
    let output = make_queue_runtime("out", 1, "schema-b");
    let ctx = StageContext::new(StopToken::new());
    let metrics = RecordingMetrics::default();

    let meta = PayloadMeta {
        schema_id: "schema-wrong".to_string(),
        ..PayloadMeta::default()
    };
    assert!(input.queue.push(Payload::with_meta(Vec::new(), meta), &ctx.stop));
    input.queue.close();

    let mut stage = FakeTransform::default();
    runner::run_transform(&mut stage, &ctx, &input, &output, &metrics);
    output.queue.close();

    assert!(output.queue.pop(&ctx.stop).is_none());
    assert_eq!(metrics.snapshot().error_calls, 1);
}

struct FailingTransform;

impl Stage for FailingTransform {
    fn name(&self) -> &str {
        "failing_transform"
    }
}

impl TransformStage for FailingTransform {
    fn process(&mut self, _ctx: &StageContext, _input: &Payload) -> StageResult<Payload> {
        Err(StageError::new("boom"))
    }
}

#[test]
fn transform_failure_requests_global_stop_and_unblocks_peers() {
    let input = Arc::new(make_queue_runtime("in", 1, ""));
    let output = Arc::new(make_queue_runtime("out", 1, ""));
    let stop = StopToken::new();
    assert!(input.queue.push(Payload::default(), &stop));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let input = Arc::clone(&input);
            let output = Arc::clone(&output);
            let ctx = StageContext::new(stop.clone());
            thread::spawn(move || {
                let mut stage = FailingTransform;
                runner::run_transform(
                    &mut stage,
                    &ctx,
                    &input,
                    &output,
                    &weir_runtime::NoopMetrics,
                );
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker exits after failure");
    }
    assert!(stop.stop_requested());
}

#[test]
fn transform_stops_when_cancelled_before_work() {
    let input = make_queue_runtime("in", 1, "");
    let output = make_queue_runtime("out", 1, "");
    let stop = StopToken::new();
    stop.request_stop();
    let ctx = StageContext::new(stop);
    let metrics = RecordingMetrics::default();

    let mut stage = FakeTransform::default();
    runner::run_transform(&mut stage, &ctx, &input, &output, &metrics);
    output.queue.close();

    let state = metrics.snapshot();
    assert_eq!(state.queue_dequeues, 0);
    assert_eq!(state.queue_enqueues, 0);
    assert!(output.queue.pop(&ctx.stop).is_none());
}

#[derive(Default)]
struct Gate {
    state: Mutex<(bool, bool)>,
    cond: Condvar,
}

impl Gate {
    fn arrive(&self) {
        let mut state = self.state.lock();
        state.0 = true;
        self.cond.notify_all();
        while !state.1 {
            self.cond.wait(&mut state);
        }
    }

    fn wait_for_arrival(&self) {
        let mut state = self.state.lock();
        while !state.0 {
            self.cond.wait(&mut state);
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.1 = true;
        self.cond.notify_all();
    }
}

struct GatedSource {
    gate: Arc<Gate>,
    emitted: bool,
}

impl Stage for GatedSource {
    fn name(&self) -> &str {
        "gated_source"
    }
}

impl SourceStage for GatedSource {
    fn produce(&mut self, _ctx: &StageContext) -> StageResult<Option<Payload>> {
        if self.emitted {
            return Ok(None);
        }
        self.gate.arrive();
        self.emitted = true;
        Ok(Some(Payload::new(b"late".to_vec())))
    }
}

struct EmptySource;

impl Stage for EmptySource {
    fn name(&self) -> &str {
        "empty_source"
    }
}

impl SourceStage for EmptySource {
    fn produce(&mut self, _ctx: &StageContext) -> StageResult<Option<Payload>> {
        Ok(None)
    }
}

/// The producer-count protocol: a shared output queue closes only when the
/// last producing worker exits, never while a sibling is still running.
#[test]
fn last_source_worker_closes_the_shared_output_queue() {
    let output = Arc::new(make_queue_runtime("out", 4, ""));
    let stop = StopToken::new();
    let remaining = Arc::new(AtomicU32::new(2));
    let gate = Arc::new(Gate::default());

    let spawn_worker = |mut stage: Box<dyn SourceStage>| {
        let output = Arc::clone(&output);
        let remaining = Arc::clone(&remaining);
        let ctx = StageContext::new(stop.clone());
        thread::spawn(move || {
            runner::run_source(stage.as_mut(), &ctx, &output, &weir_runtime::NoopMetrics);
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                output.queue.close();
            }
        })
    };

    let early = spawn_worker(Box::new(EmptySource));
    let late = spawn_worker(Box::new(GatedSource {
        gate: Arc::clone(&gate),
        emitted: false,
    }));

    // The late worker is mid-produce; the early worker may have exited,
    // but the queue must still accept pushes.
    gate.wait_for_arrival();
    early.join().unwrap();
    assert!(output.queue.push(Payload::new(b"external".to_vec()), &stop));

    gate.release();
    late.join().unwrap();

    let mut drained = 0;
    while output.queue.pop(&stop).is_some() {
        drained += 1;
    }
    assert_eq!(drained, 2);
}

struct CountingSink {
    consumed: Arc<AtomicU32>,
}

impl Stage for CountingSink {
    fn name(&self) -> &str {
        "counting_sink"
    }
}

impl SinkStage for CountingSink {
    fn consume(&mut self, _ctx: &StageContext, _input: &Payload) -> StageResult<()> {
        self.consumed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[test]
fn sink_consumes_until_queue_closes() {
    let input = make_queue_runtime("in", 4, "");
    let ctx = StageContext::new(StopToken::new());
    let consumed = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        assert!(input.queue.push(Payload::default(), &ctx.stop));
    }
    input.queue.close();

    let mut sink = CountingSink {
        consumed: Arc::clone(&consumed),
    };
    runner::run_sink(&mut sink, &ctx, &input, &weir_runtime::NoopMetrics);

    assert_eq!(consumed.load(Ordering::Relaxed), 3);
}

#[test]
fn blocked_source_push_unblocks_on_queue_close() {
    let output = Arc::new(make_queue_runtime("out", 1, ""));
    let stop = StopToken::new();
    assert!(output.queue.push(Payload::default(), &stop));

    let worker = {
        let output = Arc::clone(&output);
        let ctx = StageContext::new(stop.clone());
        thread::spawn(move || {
            let mut stage = FakeSource::new(vec![Payload::default()]);
            runner::run_source(&mut stage, &ctx, &output, &weir_runtime::NoopMetrics);
        })
    };

    thread::sleep(Duration::from_millis(20));
    output.queue.close();
    worker.join().expect("runner exits when its push fails");
}
