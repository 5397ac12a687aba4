//! Weir execution engine.
//!
//! This crate turns a validated [`FlowSpec`](weir_core::FlowSpec) into a
//! running topology: it materialises the queues, loads stage plugins,
//! spawns one worker thread per stage thread, relays OS signals into the
//! cancellation token, and joins everything on shutdown.
//!
//! The pieces, bottom-up:
//!
//! - [`registry`] — loads plugins and owns stage instance lifecycles
//! - [`runner`] — the per-worker dequeue → process → enqueue loops
//! - [`metrics`] — the facade runners report into
//! - [`runtime`] — the topology orchestrator
//! - [`signal`] — SIGINT/SIGTERM relay into the stop token
//! - [`stages`] — builtin stages available without a plugin library

pub mod affinity;
pub mod metrics;
pub mod observability;
pub mod plugin;
pub mod queue_runtime;
pub mod registry;
pub mod runner;
pub mod runtime;
pub mod signal;
pub mod stages;

pub use metrics::{NoopMetrics, StageMetrics, TracingMetrics};
pub use queue_runtime::QueueRuntime;
pub use registry::{StageHandle, StageRegistry};
pub use runtime::Runtime;
