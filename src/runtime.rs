//! Node-level capabilities injected into a task.
//!
//! The original system reached these through a process-wide node context; here each
//! capability is a small trait handed to the task at construction, which keeps the
//! orchestrator testable with in-memory fakes.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::types::{SwimlaneId, TaskId};

/// Process-wide execution-slot pool shared across tasks.
///
/// A slot must be acquired before the task registers with the cluster and must be
/// released unconditionally when the task stops, even on error paths.
pub trait ResourceManager: Send + Sync {
    /// Attempts to acquire one execution slot. Returns false when none is available.
    fn acquire_slot(&self) -> bool;

    /// Releases one execution slot.
    fn release_slot(&self);
}

/// Supervising controller that owns task lifecycles on this node.
#[async_trait]
pub trait TaskController: Send + Sync {
    /// Requests that the given task/swimlane be stopped.
    async fn stop_task(&self, task_id: &TaskId, swimlane_id: &SwimlaneId) -> SyncResult<()>;
}

/// Node health registry consulted by node-level scheduling decisions.
pub trait NodeHealth: Send + Sync {
    /// Marks the node's health/error state for the given task.
    fn mark_task_error(&self, task_id: &TaskId, notice: &str);
}
