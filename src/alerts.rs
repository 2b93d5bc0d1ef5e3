//! Operational log entries, alert receivers, and the delivery contract.

use std::net::UdpSocket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::types::{SwimlaneId, TaskId};

/// Classification of operational log entries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Routine task-scoped operational message.
    TaskLog,
    /// Alarm raised when a task stops because of a fatal error.
    TaskAlarm,
}

/// A receiver configured to be notified of task alarms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertReceiver {
    pub name: String,
    pub address: String,
}

/// One entry destined for the operational log sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub alert_type: AlertType,
    pub task_id: TaskId,
    pub swimlane_id: SwimlaneId,
    pub message: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AlertEntry {
    pub fn new(
        alert_type: AlertType,
        task_id: TaskId,
        swimlane_id: SwimlaneId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            task_id,
            swimlane_id,
            message: message.into(),
            title: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Sink for task-scoped operational messages and alert deliveries.
///
/// Delivery transport is external to this crate; both methods are best-effort from the
/// orchestrator's point of view and failures are logged, never propagated further.
#[async_trait]
pub trait OperationalLog: Send + Sync {
    /// Uploads a plain task-scoped message.
    async fn upload(
        &self,
        alert_type: AlertType,
        task_id: &TaskId,
        swimlane_id: &SwimlaneId,
        message: &str,
    ) -> SyncResult<()>;

    /// Uploads a full entry and routes it to the given receivers.
    async fn upload_alert(&self, entry: AlertEntry, receivers: &[AlertReceiver])
    -> SyncResult<()>;
}

/// Best-effort identity of the host running this task, used in alarm titles.
///
/// Resolved by opening an unconnected UDP socket toward a public address; no traffic
/// is sent. Falls back to a fixed marker when the lookup fails.
pub fn host_identity() -> String {
    local_ip().unwrap_or_else(|| "unknown-host".to_owned())
}

fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}
