//! Contracts of the source consumer and target loader a task supervises.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::types::{Position, SwimlaneId, TaskId};

/// Outcome of initializing the consumer's starting position.
///
/// The original position-initialization path could request task shutdown through a
/// control-flow exception; that signal is modeled here as an explicit variant so the
/// caller branches on it instead of catching and rethrowing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// The consumer accepted the position and the select stage can proceed.
    Initialized,
    /// Position initialization itself requests the task be shut down.
    ///
    /// This is an intentional halt, not an operational fault: no alarm is raised.
    StopRequested { reason: String },
}

/// Source-side consumer of one swimlane of change data.
#[async_trait]
pub trait DataConsumer: Send + Sync {
    /// Identifier of the swimlane this consumer feeds from.
    fn swimlane_id(&self) -> SwimlaneId;

    /// Whether the source supports metadata queries; gates the metadata-check stage.
    fn supports_metadata_query(&self) -> bool;

    /// The configured position to start from when the cluster has no committed one.
    fn initial_position(&self) -> Position;

    /// Pushes the resolved starting position into the consumer/select stage.
    async fn initialize_position(
        &self,
        task_id: &TaskId,
        swimlane_id: &SwimlaneId,
        position: Position,
    ) -> SyncResult<InitOutcome>;

    /// Human-readable connection/client diagnostics, appended to alarm notices.
    fn client_info(&self) -> String;
}

/// Target-side loader written to by the load stage.
pub trait DataLoader: Send + Sync {
    /// Human-readable connection/client diagnostics, appended to alarm notices.
    fn client_info(&self) -> String;
}
