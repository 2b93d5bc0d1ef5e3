//! Static configuration for one replication task.

use serde::{Deserialize, Serialize};

use crate::alerts::AlertReceiver;
use crate::types::TaskId;

/// Configuration for a swimlane task.
///
/// Contains the settings the orchestrator needs beyond its injected collaborators:
/// the task identity, the statistics-upload toggle, and the alert routing list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// The externally assigned, stable identifier of this task.
    pub task_id: TaskId,
    /// When true, each stat submission also uploads derived performance metrics.
    ///
    /// Mirrors the node-wide statistics toggle of the surrounding service; it is
    /// plumbed in as task configuration so the orchestrator stays free of global
    /// state.
    #[serde(default)]
    pub upload_statistics: bool,
    /// Receivers notified when the task stops because of a fatal error.
    #[serde(default)]
    pub receivers: Vec<AlertReceiver>,
}

impl TaskConfig {
    pub fn new(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            upload_statistics: false,
            receivers: Vec::new(),
        }
    }
}
