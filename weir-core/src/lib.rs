//! Weir Core Library
//!
//! This crate provides the foundational types and primitives for the weir
//! dataflow runtime.
//!
//! # Overview
//!
//! Weir executes a declarative flow specification: named bounded queues
//! wired between named processing stages. Stages come in three roles —
//! source, transform, sink — and each stage worker runs on a dedicated OS
//! thread, moving [`Payload`] records through [`BoundedQueue`]s under a
//! cooperative [`StopToken`].
//!
//! # Key Components
//!
//! - **Queues**: bounded, closable FIFOs ([`queue`]), with an optional
//!   file-backed durable variant
//! - **Payload**: a shared-ownership byte buffer plus per-record metadata
//! - **Flow**: the specification model, its YAML/JSON loader and validator
//! - **Stage**: the role traits implemented by in-tree and plugin stages
//!
//! # Example
//!
//! ```
//! use weir_core::{BoundedQueue, Payload, PayloadQueue, StopToken};
//!
//! let queue = BoundedQueue::new(4);
//! let stop = StopToken::new();
//!
//! assert!(queue.push(Payload::new("hello"), &stop));
//! let record = queue.pop(&stop).expect("one record queued");
//! assert_eq!(record.bytes(), b"hello");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod flow;
pub mod payload;
pub mod queue;
pub mod stage;
pub mod token;

// Re-export key types at crate root for convenience
pub use error::{Result, WeirError};
pub use flow::{ExecMode, FlowSpec, QueueSpec, StageSpec};
pub use payload::{Payload, PayloadMeta};
pub use queue::{BoundedQueue, DurableQueue, PayloadQueue};
pub use stage::{
    SinkStage, SourceStage, Stage, StageConfig, StageContext, StageError, StageKind, StageResult,
    StageRole,
};
pub use token::StopToken;
