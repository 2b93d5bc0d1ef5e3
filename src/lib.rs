//! Per-task orchestration for a change-data-capture synchronization pipeline.
//!
//! One [`task::SyncTask`] owns a single replication task bound to one source
//! swimlane. It drives the ordered pipeline stages (select, extract, transform, load,
//! and an optional metadata check), coordinates checkpoint and registration state with
//! a cluster membership layer, aggregates per-table statistics that a periodic caller
//! flushes with [`task::SyncTask::submit_stat`], and fails fast with a single-fire
//! alert workflow when any stage reports an unrecoverable error.
//!
//! All external collaborators (the cluster substrate, the resource-slot pool, the
//! supervising controller, node health, and the operational log sink) are injected as
//! trait objects, so the orchestrator can be exercised end to end with in-memory
//! fakes.

pub mod alerts;
pub mod cluster;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod macros;
pub mod mapper;
pub mod runtime;
pub mod stage;
pub mod stats;
pub mod task;
pub mod types;

pub use crate::error::{ErrorKind, SyncError, SyncResult};
pub use crate::task::{SyncTask, TaskRuntime};
