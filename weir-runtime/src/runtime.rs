//! Topology orchestrator.
//!
//! Owns every lifetime in a flow run: validates the specification,
//! materialises queues, instantiates stage workers, maintains the
//! per-queue producer counts, relays shutdown and joins the workers.
//!
//! Queue-closure protocol: a queue's producer count starts at the sum of
//! `threads` over every stage declaring it as output. Each producing
//! worker decrements the count when its loop exits and closes the queue
//! only on reaching zero, so a queue closes exactly once, by the last
//! producer, and never while a producer is still running. The shutdown
//! path also closes every queue to unblock waiters; both closures are
//! safe to race because `close()` is idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use weir_core::error::{Result, WeirError};
use weir_core::flow::{ExecMode, FlowSpec, StageSpec};
use weir_core::payload::Payload;
use weir_core::queue::BoundedQueue;
use weir_core::stage::{StageContext, StageKind, StageRole};
use weir_core::token::StopToken;

use crate::affinity;
use crate::metrics::{StageMetrics, TracingMetrics};
use crate::queue_runtime::QueueRuntime;
use crate::registry::StageRegistry;
use crate::runner;
use crate::signal;

/// How often the main loop polls for stop and relays signals.
const MAIN_LOOP_INTERVAL: Duration = Duration::from_millis(50);

/// The flow runtime. One instance drives one flow run: it owns the stage
/// registry, the metrics facade and the flow-wide stop token.
pub struct Runtime {
    registry: Arc<StageRegistry>,
    metrics: Arc<dyn StageMetrics>,
    token: StopToken,
}

impl Runtime {
    /// Create a runtime reporting metrics through `tracing`.
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self::with_metrics(registry, Arc::new(TracingMetrics))
    }

    /// Create a runtime with a custom metrics facade.
    pub fn with_metrics(registry: Arc<StageRegistry>, metrics: Arc<dyn StageMetrics>) -> Self {
        Self {
            registry,
            metrics,
            token: StopToken::new(),
        }
    }

    /// The flow-wide stop token. Requesting stop on it shuts the flow
    /// down the same way a signal would.
    pub fn stop_token(&self) -> StopToken {
        self.token.clone()
    }

    /// Run the flow to completion.
    ///
    /// Blocks until the flow stops: on signal, on an external stop
    /// request, on natural completion in JOB mode, or on a fatal stage
    /// error. The registry is shut down before returning, so a runtime is
    /// one-shot.
    pub fn run(&self, spec: &FlowSpec) -> Result<()> {
        tracing::info!(
            flow = %spec.name,
            stages = spec.stages.len(),
            queues = spec.queues.len(),
            "runtime starting"
        );

        spec.validate()
            .map_err(|errors| WeirError::SpecValidation { errors })?;

        signal::install();

        let queues = build_queues(spec);
        let producer_counts = build_producer_counts(spec);
        let job_mode = spec.execution.mode == ExecMode::Job;
        let active_workers = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::new();

        let spawned = self.spawn_stages(
            spec,
            &queues,
            &producer_counts,
            &active_workers,
            job_mode,
            &mut workers,
        );

        if let Err(err) = spawned {
            tracing::error!(flow = %spec.name, error = %err, "flow setup failed; unwinding");
            self.token.request_stop();
            close_all_queues(&queues);
            join_workers(&mut workers);
            self.registry.shutdown();
            return Err(err);
        }

        tracing::info!(workers = workers.len(), "runtime started worker threads");

        // A JOB flow with no workers left has already completed.
        if job_mode && active_workers.load(Ordering::Acquire) == 0 {
            self.token.request_stop();
        }

        while !self.token.stop_requested() {
            if signal::relay(&self.token) {
                tracing::info!("stop signal received");
                break;
            }
            thread::sleep(MAIN_LOOP_INTERVAL);
        }

        // Closing every queue unblocks producers stuck in push; workers
        // then observe the token and unwind.
        close_all_queues(&queues);
        join_workers(&mut workers);
        self.registry.shutdown();

        tracing::info!(flow = %spec.name, "runtime exited cleanly");
        Ok(())
    }

    /// Pick the module name a stage resolves to: explicit plugin first,
    /// then a registered builtin under the bare type name, then the
    /// conventional `libstage_<type>.so`.
    fn resolve_plugin(&self, stage: &StageSpec) -> String {
        if stage.plugin.is_none() && self.registry.has_builtin(&stage.stage_type) {
            stage.stage_type.clone()
        } else {
            stage.plugin_ref()
        }
    }

    fn spawn_stages(
        &self,
        spec: &FlowSpec,
        queues: &HashMap<String, Arc<QueueRuntime>>,
        producer_counts: &HashMap<String, Arc<AtomicU32>>,
        active_workers: &Arc<AtomicUsize>,
        job_mode: bool,
        workers: &mut Vec<JoinHandle<()>>,
    ) -> Result<()> {
        for stage_spec in &spec.stages {
            tracing::info!(
                stage = %stage_spec.name,
                stage_type = %stage_spec.stage_type,
                threads = stage_spec.threads,
                "initializing stage"
            );

            // Placement hints are validated before any instance exists so
            // a bad hint cannot leak instances.
            let pinning = spec
                .kubernetes
                .as_ref()
                .and_then(|k| k.cpu_pinning.get(&stage_spec.name))
                .cloned();
            if let Some(cpus) = &pinning {
                affinity::validate_cpu_pinning(&stage_spec.name, cpus)?;
            }
            if let Some(priority) = stage_spec.realtime_priority {
                affinity::validate_realtime_priority(&stage_spec.name, priority)?;
            }

            let plugin_name = self.resolve_plugin(stage_spec);
            let config = stage_spec.config.as_ref();

            // The first instance is the probe: its role decides the stage
            // kind, which the declared wiring must match.
            let probe = self.registry.create_stage(&plugin_name, config)?;
            let kind = probe.kind();
            if let Some(cause) = wiring_error(kind, stage_spec) {
                self.registry.destroy_stage(probe);
                return Err(WeirError::InvalidWiring {
                    stage: stage_spec.name.clone(),
                    kind: kind.label(),
                    cause: cause.to_string(),
                });
            }

            let mut handles = vec![probe];
            for _ in 1..stage_spec.threads {
                match self.registry.create_stage(&plugin_name, config) {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        for sibling in handles {
                            self.registry.destroy_stage(sibling);
                        }
                        return Err(err);
                    }
                }
            }

            let input = stage_spec
                .input_queue
                .as_ref()
                .map(|name| Arc::clone(&queues[name.as_str()]));
            let output = stage_spec
                .output_queue
                .as_ref()
                .map(|name| Arc::clone(&queues[name.as_str()]));
            let producers = stage_spec
                .output_queue
                .as_ref()
                .map(|name| Arc::clone(&producer_counts[name.as_str()]));

            for (worker_index, mut handle) in handles.into_iter().enumerate() {
                let stage_name = stage_spec.name.clone();
                let token = self.token.clone();
                let registry = Arc::clone(&self.registry);
                let metrics = Arc::clone(&self.metrics);
                let worker_gauge = Arc::clone(active_workers);
                let input = input.clone();
                let output = output.clone();
                let producers = producers.clone();
                let pinning = pinning.clone();
                let realtime_priority = stage_spec.realtime_priority;

                active_workers.fetch_add(1, Ordering::AcqRel);
                let spawn_result = thread::Builder::new()
                    .name(format!("{}-{}", stage_spec.name, worker_index))
                    .spawn(move || {
                        if let Some(cpus) = &pinning {
                            affinity::apply_cpu_pinning(&stage_name, worker_index, cpus);
                        }
                        if let Some(priority) = realtime_priority {
                            affinity::apply_realtime_priority(&stage_name, worker_index, priority);
                        }
                        tracing::debug!(stage = %stage_name, worker = worker_index, "worker started");

                        let ctx = StageContext::new(token.clone());
                        match handle.role_mut() {
                            StageRole::Source(stage) => {
                                if let Some(output) = output.as_deref() {
                                    runner::run_source(stage.as_mut(), &ctx, output, metrics.as_ref());
                                }
                            }
                            StageRole::Transform(stage) => {
                                if let (Some(input), Some(output)) =
                                    (input.as_deref(), output.as_deref())
                                {
                                    runner::run_transform(
                                        stage.as_mut(),
                                        &ctx,
                                        input,
                                        output,
                                        metrics.as_ref(),
                                    );
                                }
                            }
                            StageRole::Sink(stage) => {
                                if let Some(input) = input.as_deref() {
                                    runner::run_sink(stage.as_mut(), &ctx, input, metrics.as_ref());
                                }
                            }
                        }

                        if let Some(producers) = &producers {
                            if producers.fetch_sub(1, Ordering::AcqRel) == 1 {
                                if let Some(output) = &output {
                                    tracing::debug!(
                                        stage = %stage_name,
                                        worker = worker_index,
                                        queue = %output.name,
                                        "last producer closing output queue"
                                    );
                                    output.queue.close();
                                }
                            }
                        }

                        registry.destroy_stage(handle);
                        tracing::debug!(stage = %stage_name, worker = worker_index, "worker stopped");

                        if worker_gauge.fetch_sub(1, Ordering::AcqRel) == 1 && job_mode {
                            token.request_stop();
                        }
                    });

                match spawn_result {
                    Ok(worker) => workers.push(worker),
                    Err(err) => {
                        // The un-started closure dropped its handle; the
                        // registry still tracks the instance and shutdown
                        // will reclaim it.
                        active_workers.fetch_sub(1, Ordering::AcqRel);
                        return Err(WeirError::WorkerSpawn {
                            stage: stage_spec.name.clone(),
                            cause: err.to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

fn wiring_error(kind: StageKind, stage: &StageSpec) -> Option<&'static str> {
    let has_input = stage.input_queue.is_some();
    let has_output = stage.output_queue.is_some();
    match kind {
        StageKind::Source if has_input || !has_output => {
            Some("source stages declare an output queue and no input queue")
        }
        StageKind::Transform if !has_input || !has_output => {
            Some("transform stages declare both an input and an output queue")
        }
        StageKind::Sink if !has_input || has_output => {
            Some("sink stages declare an input queue and no output queue")
        }
        _ => None,
    }
}

/// Materialise the validated queue specs. Only the in-memory queue can be
/// declared in a flow; the durable variant is constructed directly by
/// embedders.
fn build_queues(spec: &FlowSpec) -> HashMap<String, Arc<QueueRuntime>> {
    let mut queues = HashMap::with_capacity(spec.queues.len());
    for queue_spec in &spec.queues {
        tracing::debug!(
            queue = %queue_spec.name,
            capacity = queue_spec.capacity,
            schema = %queue_spec.schema_id(),
            "configuring queue"
        );
        queues.insert(
            queue_spec.name.clone(),
            Arc::new(QueueRuntime {
                name: queue_spec.name.clone(),
                capacity: queue_spec.capacity,
                queue: Arc::new(BoundedQueue::<Payload>::new(queue_spec.capacity as usize)),
                schema_id: queue_spec.schema_id().to_string(),
            }),
        );
    }
    queues
}

/// One atomic producer count per queue: the sum of `threads` over every
/// stage declaring the queue as output.
fn build_producer_counts(spec: &FlowSpec) -> HashMap<String, Arc<AtomicU32>> {
    let mut counts: HashMap<String, Arc<AtomicU32>> = HashMap::new();
    for stage in &spec.stages {
        if let Some(output) = &stage.output_queue {
            counts
                .entry(output.clone())
                .or_insert_with(|| Arc::new(AtomicU32::new(0)))
                .fetch_add(stage.threads, Ordering::Relaxed);
        }
    }
    counts
}

fn close_all_queues(queues: &HashMap<String, Arc<QueueRuntime>>) {
    for queue in queues.values() {
        queue.queue.close();
    }
}

fn join_workers(workers: &mut Vec<JoinHandle<()>>) {
    for worker in workers.drain(..) {
        if let Err(err) = worker.join() {
            tracing::error!(?err, "worker thread panicked");
        }
    }
}
