//! Runtime representation of a declared queue.

use std::sync::Arc;

use weir_core::queue::PayloadQueue;

/// A queue materialised from a [`QueueSpec`](weir_core::QueueSpec).
///
/// Created by the orchestrator before any worker starts and dropped after
/// all workers have joined. Producers and consumers share the handle; the
/// schema id (empty when unconstrained) drives the runners' schema checks.
pub struct QueueRuntime {
    /// Logical queue name, unique within the flow.
    pub name: String,

    /// Capacity from the spec.
    pub capacity: u32,

    /// The queue shared by producers and consumers.
    pub queue: Arc<dyn PayloadQueue>,

    /// Schema identifier payloads must carry; empty means no check.
    pub schema_id: String,
}

impl QueueRuntime {
    /// True when this queue enforces a schema contract.
    pub fn has_schema(&self) -> bool {
        !self.schema_id.is_empty()
    }
}
