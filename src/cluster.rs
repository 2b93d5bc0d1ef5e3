//! Contract of the distributed coordination substrate consumed by a task.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::stats::{TaskPerformance, TaskStatSnapshot};
use crate::types::{Position, SwimlaneId, TaskId};

/// Client of the cluster membership/broadcast layer.
///
/// The orchestrator never talks to the cluster through a process-wide singleton; an
/// implementation of this trait is injected at construction so tests can substitute an
/// in-memory fake. Timeout and retry semantics live inside the implementation.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Registers the task/swimlane pair on this node.
    ///
    /// Fails with [`crate::error::ErrorKind::LockPreempted`] when another node already
    /// owns the distributed lock for the pair; that failure is fatal to `start()`.
    async fn register_task(&self, task_id: &TaskId, swimlane_id: &SwimlaneId) -> SyncResult<()>;

    /// Queries the last committed checkpoint position for the swimlane.
    ///
    /// Returns `None` when the cluster has no record; a blank token is treated the
    /// same by the caller.
    async fn query_last_position(
        &self,
        task_id: &TaskId,
        swimlane_id: &SwimlaneId,
    ) -> SyncResult<Option<Position>>;

    /// Queries the per-table stat records the cluster currently holds for the
    /// swimlane, used to seed the local stat store at construction.
    async fn query_task_stats(
        &self,
        task_id: &TaskId,
        swimlane_id: &SwimlaneId,
    ) -> SyncResult<Vec<TaskStatSnapshot>>;

    /// Submits one stat snapshot and returns the record the cluster accepted, which
    /// the caller merges back into the live record.
    async fn submit_stat(&self, snapshot: TaskStatSnapshot) -> SyncResult<TaskStatSnapshot>;

    /// Uploads derived performance metrics. Best-effort.
    async fn upload_performance(&self, performance: TaskPerformance) -> SyncResult<()>;

    /// Broadcasts that the task stopped normally. Best-effort.
    async fn mark_task_stopped(&self, task_id: &TaskId, swimlane_id: &SwimlaneId)
    -> SyncResult<()>;

    /// Broadcasts that the task stopped because of a fatal error, carrying the alarm
    /// notice for other nodes and operators to observe. Best-effort.
    async fn mark_task_stopped_by_error(
        &self,
        task_id: &TaskId,
        swimlane_id: &SwimlaneId,
        notice: &str,
    ) -> SyncResult<()>;
}
