//! Per-table checkpoint statistics and the snapshot/merge protocol.
//!
//! Every (schema, table) pair touched by a task owns one [`TaskStat`] record. Stage
//! threads mutate the record's counters while a periodic submitter snapshots and
//! resets them; the cluster's accepted record is merged back at most once per
//! submission cycle. Snapshot+reset and remote merge are mutually exclusive through a
//! record-scoped mutex, so different records can be processed concurrently while a
//! single record never observes a torn update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SwimlaneId, TableRef, TaskId};

/// Immutable snapshot of a [`TaskStat`] record, taken at submission time.
///
/// This is the shape that travels to the cluster layer, both as the submitted record
/// and as the remote's accepted record handed back for merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatSnapshot {
    pub task_id: TaskId,
    pub swimlane_id: SwimlaneId,
    pub schema: String,
    pub table: String,
    pub insert_rows: u64,
    pub update_rows: u64,
    pub delete_rows: u64,
    pub error_rows: u64,
    pub last_loaded_data_time: Option<DateTime<Utc>>,
    pub last_checked_time: Option<DateTime<Utc>>,
    pub registered_time: Option<DateTime<Utc>>,
}

/// Derived performance metrics built from a stat snapshot.
///
/// Uploaded separately from the stat record when process-wide statistics upload is
/// enabled, so operators can chart throughput without replaying checkpoint records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPerformance {
    pub task_id: TaskId,
    pub swimlane_id: SwimlaneId,
    pub schema: String,
    pub table: String,
    pub total_rows: u64,
    pub error_rows: u64,
    pub last_loaded_data_time: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

impl From<&TaskStatSnapshot> for TaskPerformance {
    fn from(snapshot: &TaskStatSnapshot) -> Self {
        Self {
            task_id: snapshot.task_id.clone(),
            swimlane_id: snapshot.swimlane_id.clone(),
            schema: snapshot.schema.clone(),
            table: snapshot.table.clone(),
            total_rows: snapshot.insert_rows + snapshot.update_rows + snapshot.delete_rows,
            error_rows: snapshot.error_rows,
            last_loaded_data_time: snapshot.last_loaded_data_time,
            recorded_at: Utc::now(),
        }
    }
}

/// Mutable fields of a [`TaskStat`], guarded by the record mutex.
#[derive(Debug)]
struct StatFields {
    insert_rows: u64,
    update_rows: u64,
    delete_rows: u64,
    error_rows: u64,
    last_loaded_data_time: Option<DateTime<Utc>>,
    last_checked_time: Option<DateTime<Utc>>,
    registered_time: Option<DateTime<Utc>>,
    /// Gates the remote merge to at most one application per submission cycle.
    /// Cleared by the reset that accompanies every snapshot.
    update_in_progress: bool,
}

/// Checkpoint/statistics record for one (schema, table) pair of a task.
///
/// Created lazily on first reference and never removed for the task's lifetime. All
/// mutation goes through the internal mutex; none of the methods hold it across an
/// await point, so stage threads and the submitter can call them freely.
#[derive(Debug)]
pub struct TaskStat {
    task_id: TaskId,
    swimlane_id: SwimlaneId,
    table: TableRef,
    fields: Mutex<StatFields>,
}

impl TaskStat {
    pub fn new(task_id: TaskId, swimlane_id: SwimlaneId, table: TableRef) -> Self {
        Self {
            task_id,
            swimlane_id,
            table,
            fields: Mutex::new(StatFields {
                insert_rows: 0,
                update_rows: 0,
                delete_rows: 0,
                error_rows: 0,
                last_loaded_data_time: None,
                last_checked_time: None,
                registered_time: Some(Utc::now()),
                update_in_progress: false,
            }),
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn record_inserts(&self, rows: u64) {
        self.fields.lock().unwrap().insert_rows += rows;
    }

    pub fn record_updates(&self, rows: u64) {
        self.fields.lock().unwrap().update_rows += rows;
    }

    pub fn record_deletes(&self, rows: u64) {
        self.fields.lock().unwrap().delete_rows += rows;
    }

    pub fn record_errors(&self, rows: u64) {
        self.fields.lock().unwrap().error_rows += rows;
    }

    /// Records the time data was last loaded into the target.
    pub fn mark_loaded(&self, at: DateTime<Utc>) {
        self.fields.lock().unwrap().last_loaded_data_time = Some(at);
    }

    /// Records the time the metadata-check stage last verified this table.
    pub fn mark_checked(&self, at: DateTime<Utc>) {
        self.fields.lock().unwrap().last_checked_time = Some(at);
    }

    /// Takes an immutable snapshot and resets the mutable counters to baseline.
    ///
    /// The snapshot and the reset happen under one critical section, so a concurrent
    /// counter update lands either entirely in this snapshot or entirely in the next
    /// one. The reset zeroes the row counters and reopens the merge gate; timestamps
    /// are carried over unchanged.
    pub fn snapshot_and_reset(&self) -> TaskStatSnapshot {
        let mut fields = self.fields.lock().unwrap();

        let snapshot = TaskStatSnapshot {
            task_id: self.task_id.clone(),
            swimlane_id: self.swimlane_id.clone(),
            schema: self.table.schema.clone(),
            table: self.table.table.clone(),
            insert_rows: fields.insert_rows,
            update_rows: fields.update_rows,
            delete_rows: fields.delete_rows,
            error_rows: fields.error_rows,
            last_loaded_data_time: fields.last_loaded_data_time,
            last_checked_time: fields.last_checked_time,
            registered_time: fields.registered_time,
        };

        fields.insert_rows = 0;
        fields.update_rows = 0;
        fields.delete_rows = 0;
        fields.error_rows = 0;
        fields.update_in_progress = false;

        snapshot
    }

    /// Applies the cluster's accepted record back onto this one.
    ///
    /// Runs at most once per submission cycle: the first call after a reset flips the
    /// merge gate and applies the remote fields, later calls in the same cycle are
    /// no-ops. A record that has never been metadata-checked adopts the remote's
    /// last-loaded time; a remote-provided registration time always wins.
    pub fn merge_remote(&self, remote: &TaskStatSnapshot) {
        let mut fields = self.fields.lock().unwrap();

        if fields.update_in_progress {
            return;
        }
        fields.update_in_progress = true;

        if fields.last_checked_time.is_none() {
            fields.last_loaded_data_time = remote.last_loaded_data_time;
        }
        if remote.registered_time.is_some() {
            fields.registered_time = remote.registered_time;
        }
    }

    /// Returns a point-in-time view of the record without resetting anything.
    pub fn peek(&self) -> TaskStatSnapshot {
        let fields = self.fields.lock().unwrap();

        TaskStatSnapshot {
            task_id: self.task_id.clone(),
            swimlane_id: self.swimlane_id.clone(),
            schema: self.table.schema.clone(),
            table: self.table.table.clone(),
            insert_rows: fields.insert_rows,
            update_rows: fields.update_rows,
            delete_rows: fields.delete_rows,
            error_rows: fields.error_rows,
            last_loaded_data_time: fields.last_loaded_data_time,
            last_checked_time: fields.last_checked_time,
            registered_time: fields.registered_time,
        }
    }
}

/// Concurrent store of [`TaskStat`] records keyed by `schema.table`.
///
/// Records are created lazily and idempotently: concurrent first access for the same
/// key from multiple threads yields exactly one stored record. Entries are never
/// removed during the task's lifetime.
#[derive(Debug)]
pub struct StatStore {
    task_id: TaskId,
    swimlane_id: SwimlaneId,
    records: Mutex<HashMap<String, Arc<TaskStat>>>,
}

impl StatStore {
    pub fn new(task_id: TaskId, swimlane_id: SwimlaneId) -> Self {
        Self {
            task_id,
            swimlane_id,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the record for the given (schema, table) pair, creating it on first
    /// reference.
    pub fn get(&self, schema: &str, table: &str) -> Arc<TaskStat> {
        let table_ref = TableRef::new(schema, table);
        let mut records = self.records.lock().unwrap();

        records
            .entry(table_ref.key())
            .or_insert_with(|| {
                Arc::new(TaskStat::new(
                    self.task_id.clone(),
                    self.swimlane_id.clone(),
                    table_ref,
                ))
            })
            .clone()
    }

    /// Lists every record currently in the store, in no particular order.
    pub fn records(&self) -> Vec<Arc<TaskStat>> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }
}
