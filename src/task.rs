//! The per-task orchestrator for one swimlane of change data.
//!
//! A [`SyncTask`] drives the ordered pipeline stages of a single replication task,
//! coordinates checkpoint and registration state with the cluster layer, aggregates
//! per-table statistics, and tears the task down with an alert when a stage reports a
//! fatal error. Its lifecycle transitions are guarded by atomic one-shot flags rather
//! than locks, so racing callers never block each other: at most one `start()`, one
//! `stop()`, and one alarm firing happen per task lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{Instrument, debug, error, info, warn};

use crate::alerts::{AlertEntry, AlertReceiver, AlertType, OperationalLog, host_identity};
use crate::bail;
use crate::cluster::ClusterClient;
use crate::config::TaskConfig;
use crate::endpoints::{DataConsumer, DataLoader, InitOutcome};
use crate::error::{ErrorKind, SyncResult};
use crate::mapper::{MapperConfig, TableMapper};
use crate::runtime::{NodeHealth, ResourceManager, TaskController};
use crate::stage::{StageRegistry, StageSet, StageType};
use crate::stats::{StatStore, TaskPerformance, TaskStat};
use crate::types::{SwimlaneId, TableRef, TaskId};

/// The node-level collaborators a task talks to, bundled for construction.
pub struct TaskRuntime {
    pub cluster: Arc<dyn ClusterClient>,
    pub resources: Arc<dyn ResourceManager>,
    pub controller: Arc<dyn TaskController>,
    pub health: Arc<dyn NodeHealth>,
    pub oplog: Arc<dyn OperationalLog>,
}

struct TaskInner {
    config: TaskConfig,
    swimlane_id: SwimlaneId,
    consumer: Arc<dyn DataConsumer>,
    loader: Arc<dyn DataLoader>,
    stages: StageRegistry,
    stats: StatStore,
    mapper_config: MapperConfig,
    /// Memoized mapper resolutions per `schema.table`, including absent results.
    /// Entries are never invalidated for the task's lifetime.
    mapper_cache: Mutex<HashMap<String, Option<Arc<TableMapper>>>>,
    cluster: Arc<dyn ClusterClient>,
    resources: Arc<dyn ResourceManager>,
    controller: Arc<dyn TaskController>,
    health: Arc<dyn NodeHealth>,
    oplog: Arc<dyn OperationalLog>,
    running: AtomicBool,
    alarm_fired: AtomicBool,
}

impl TaskInner {
    /// Uploads a task-scoped message to the operational log, best-effort.
    async fn upload_task_log(&self, message: String) {
        if let Err(err) = self
            .oplog
            .upload(
                AlertType::TaskLog,
                &self.config.task_id,
                &self.swimlane_id,
                &message,
            )
            .await
        {
            warn!(error = %err, "failed to upload task log entry");
        }
    }
}

/// Orchestrator of one replication task bound to one source swimlane.
///
/// Cheaply cloneable; every clone shares the same task state. Stage worker threads,
/// the periodic stat submitter, and the supervising controller each hold a clone and
/// coordinate exclusively through the task's atomic guards and record-scoped locks.
#[derive(Clone)]
pub struct SyncTask {
    inner: Arc<TaskInner>,
}

impl SyncTask {
    /// Creates a task and performs its constructor-time cluster bootstrap.
    ///
    /// The stage registry is built in the fixed pipeline order, installing the
    /// metadata-check stage only when the consumer supports metadata queries. The
    /// local stat store is then seeded with the per-table records the cluster already
    /// holds for this swimlane, so the first submission cycle covers tables the task
    /// touched in a previous run. A failing stat query fails construction.
    pub async fn new(
        config: TaskConfig,
        consumer: Arc<dyn DataConsumer>,
        loader: Arc<dyn DataLoader>,
        stage_set: StageSet,
        mapper_config: MapperConfig,
        runtime: TaskRuntime,
    ) -> SyncResult<Self> {
        let swimlane_id = consumer.swimlane_id();
        let stages = StageRegistry::build(stage_set, consumer.supports_metadata_query());
        let stats = StatStore::new(config.task_id.clone(), swimlane_id.clone());

        let seeded = runtime
            .cluster
            .query_task_stats(&config.task_id, &swimlane_id)
            .await?;
        for snapshot in &seeded {
            let _ = stats.get(&snapshot.schema, &snapshot.table);
        }

        debug!(
            task_id = %config.task_id,
            swimlane_id = %swimlane_id,
            seeded = seeded.len(),
            stages = stages.len(),
            "task created"
        );

        Ok(Self {
            inner: Arc::new(TaskInner {
                config,
                swimlane_id,
                consumer,
                loader,
                stages,
                stats,
                mapper_config,
                mapper_cache: Mutex::new(HashMap::new()),
                cluster: runtime.cluster,
                resources: runtime.resources,
                controller: runtime.controller,
                health: runtime.health,
                oplog: runtime.oplog,
                running: AtomicBool::new(false),
                alarm_fired: AtomicBool::new(false),
            }),
        })
    }

    pub fn task_id(&self) -> &TaskId {
        &self.inner.config.task_id
    }

    pub fn swimlane_id(&self) -> &SwimlaneId {
        &self.inner.swimlane_id
    }

    pub fn consumer(&self) -> &Arc<dyn DataConsumer> {
        &self.inner.consumer
    }

    pub fn loader(&self) -> &Arc<dyn DataLoader> {
        &self.inner.loader
    }

    pub fn receivers(&self) -> &[AlertReceiver] {
        &self.inner.config.receivers
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Whether the error-triggered stop-and-alarm sequence has fired.
    pub fn alarm_triggered(&self) -> bool {
        self.inner.alarm_fired.load(Ordering::Acquire)
    }

    /// Starts the task: acquires an execution slot, registers with the cluster, and
    /// starts every stage in registry order.
    ///
    /// A redundant call while the task is running is a no-op. Failures are not
    /// isolated here: the first failure aborts the sequence and propagates to the
    /// caller, which owns cleanup/retry policy for a partially started task.
    ///
    /// Position recovery runs asynchronously after this method returns; callers must
    /// not assume the select stage has a position yet.
    pub async fn start(&self) -> SyncResult<()> {
        let inner = &self.inner;
        if inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(task_id = %inner.config.task_id, "task already running, start is a no-op");
            return Ok(());
        }

        info!(
            task_id = %inner.config.task_id,
            swimlane_id = %inner.swimlane_id,
            "starting task"
        );

        if !inner.resources.acquire_slot() {
            bail!(
                ErrorKind::ResourceExhausted,
                "No execution slot available",
                format!(
                    "task {} could not acquire a process-wide execution slot",
                    inner.config.task_id
                )
            );
        }

        // May fail with a lock-preemption error when another node owns the pair;
        // that propagates to the caller uncaught.
        inner
            .cluster
            .register_task(&inner.config.task_id, &inner.swimlane_id)
            .await?;

        for stage in inner.stages.iter() {
            info!(stage = %stage.stage_type(), "starting stage");
            stage.start().await?;
        }

        self.spawn_position_recovery();

        Ok(())
    }

    /// Stops the task: stops every stage in registry order, flushes final statistics,
    /// broadcasts the stop notification, and releases the execution slot.
    ///
    /// A redundant call, or a call on a task that never started, is a no-op. Every
    /// sub-step is fault-isolated: a failing stage or broadcast is logged and the
    /// remaining steps still run, with the slot release always executing last.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(task_id = %inner.config.task_id, "task not running, stop is a no-op");
            return;
        }

        info!(
            task_id = %inner.config.task_id,
            swimlane_id = %inner.swimlane_id,
            "stopping task"
        );

        for stage in inner.stages.iter() {
            info!(stage = %stage.stage_type(), "stopping stage");
            if let Err(err) = stage.stop().await {
                error!(
                    stage = %stage.stage_type(),
                    error = %err,
                    "failed to stop stage, continuing with remaining stages"
                );
            }
        }

        // Flush final consumption progress; per-record failures are logged inside.
        self.submit_stat().await;

        if let Err(err) = inner
            .cluster
            .mark_task_stopped(&inner.config.task_id, &inner.swimlane_id)
            .await
        {
            inner
                .upload_task_log(format!("failed to broadcast task stop: {err}"))
                .await;
        }

        // The slot release is the unconditional final step of shutdown.
        inner.resources.release_slot();

        info!(task_id = %inner.config.task_id, "task stopped");
    }

    /// Submits every stat record currently in the store to the cluster.
    ///
    /// For each record the snapshot and the counter reset happen atomically with
    /// respect to concurrent stage updates, then the snapshot is submitted and the
    /// cluster's accepted record is merged back through the once-per-cycle gate. When
    /// statistics upload is enabled, derived performance metrics are uploaded as well.
    /// Both uploads are best-effort; failures go to the task log and never abort the
    /// remaining records.
    pub async fn submit_stat(&self) {
        let inner = &self.inner;

        for record in inner.stats.records() {
            let snapshot = record.snapshot_and_reset();
            if let Ok(json) = serde_json::to_string(&snapshot) {
                debug!(stat = %json, "submitting stat snapshot");
            }

            match inner.cluster.submit_stat(snapshot.clone()).await {
                Ok(remote) => record.merge_remote(&remote),
                Err(err) => {
                    inner
                        .upload_task_log(format!(
                            "failed to submit stat for {}: {err}",
                            record.table()
                        ))
                        .await;
                }
            }

            if inner.config.upload_statistics {
                let performance = TaskPerformance::from(&snapshot);
                if let Err(err) = inner.cluster.upload_performance(performance).await {
                    inner
                        .upload_task_log(format!(
                            "failed to upload performance metrics for {}: {err}",
                            record.table()
                        ))
                        .await;
                }
            }
        }
    }

    /// Waits for the named stage to produce output and downcasts it to `T`.
    ///
    /// May suspend the calling task until the stage has output available; the
    /// suspension contract belongs to the stage.
    pub async fn wait_event<T: Send + 'static>(&self, stage_type: StageType) -> SyncResult<T> {
        let Some(stage) = self.inner.stages.get(stage_type) else {
            bail!(
                ErrorKind::InvalidState,
                "Stage not registered",
                format!(
                    "task {} has no {stage_type} stage",
                    self.inner.config.task_id
                )
            );
        };

        let output = stage.next_output().await?;
        match output.downcast::<T>() {
            Ok(event) => Ok(*event),
            Err(_) => bail!(
                ErrorKind::StageOutputMismatch,
                "Stage output has unexpected type",
                format!("stage {stage_type} produced an output of a different type")
            ),
        }
    }

    /// Returns the extract stage's next-sequence-number cursor.
    pub async fn wait_sequence(&self) -> SyncResult<u64> {
        let Some(stage) = self.inner.stages.get(StageType::Extract) else {
            bail!(
                ErrorKind::InvalidState,
                "Extract stage not registered",
                format!("task {} has no extract stage", self.inner.config.task_id)
            );
        };

        stage.next_sequence().await
    }

    /// Returns whether the named stage's queue holds no pending data.
    pub async fn is_pool_empty(&self, stage_type: StageType) -> SyncResult<bool> {
        let Some(stage) = self.inner.stages.get(stage_type) else {
            bail!(
                ErrorKind::InvalidState,
                "Stage not registered",
                format!(
                    "task {} has no {stage_type} stage",
                    self.inner.config.task_id
                )
            );
        };

        Ok(stage.is_queue_empty().await)
    }

    /// Returns the stat record for the pair, creating it on first reference.
    pub fn task_stat(&self, schema: &str, table: &str) -> Arc<TaskStat> {
        self.inner.stats.get(schema, table)
    }

    /// Lists every stat record currently in the store.
    pub fn stat_records(&self) -> Vec<Arc<TaskStat>> {
        self.inner.stats.records()
    }

    /// Resolves the table mapper for the pair through the wildcard fallback chain,
    /// memoizing the result (including absence) for the task's remaining lifetime.
    pub fn table_mapper(&self, schema: &str, table: &str) -> Option<Arc<TableMapper>> {
        let key = TableRef::new(schema, table).key();
        let mut cache = self.inner.mapper_cache.lock().unwrap();

        cache
            .entry(key)
            .or_insert_with(|| {
                self.inner
                    .mapper_config
                    .resolve(&self.inner.config.task_id, schema, table)
            })
            .clone()
    }

    /// Fires the single-shot error-triggered stop-and-alarm workflow.
    ///
    /// The first caller wins; every later call, from any stage thread, is a no-op.
    /// The workflow runs on a detached background job so the triggering call site is
    /// never blocked and never observes a failure. Each step of the workflow is
    /// fault-isolated and merely logged on failure.
    pub fn stop_and_alarm(&self, notice: &str) {
        let inner = &self.inner;
        if inner
            .alarm_fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                task_id = %inner.config.task_id,
                "stop-and-alarm already fired for this task"
            );
            return;
        }

        let alarm_span = tracing::info_span!(
            "task_alarm",
            task_id = %inner.config.task_id,
            swimlane_id = %inner.swimlane_id
        );

        let task = self.clone();
        let notice = notice.to_owned();
        tokio::spawn(async move { task.run_alarm(notice).await }.instrument(alarm_span));
    }

    fn spawn_position_recovery(&self) {
        let recovery_span = tracing::info_span!(
            "position_recovery",
            task_id = %self.inner.config.task_id,
            swimlane_id = %self.inner.swimlane_id
        );

        let task = self.clone();
        tokio::spawn(async move { task.recover_position().await }.instrument(recovery_span));
    }

    /// Fetches the last committed position and pushes the effective starting position
    /// into the consumer. Runs detached from `start()`.
    async fn recover_position(&self) {
        let inner = &self.inner;
        let task_id = &inner.config.task_id;
        let swimlane_id = &inner.swimlane_id;

        info!("querying last committed position");

        let committed = match inner.cluster.query_last_position(task_id, swimlane_id).await {
            Ok(committed) => committed,
            Err(err) => {
                error!(error = %err, "failed to query last committed position");
                self.stop_and_alarm(&format!(
                    "failed to query the last committed position: {err}"
                ));
                return;
            }
        };

        let position = committed
            .filter(|position| !position.is_blank())
            .unwrap_or_else(|| inner.consumer.initial_position());

        info!(position = %position, "resolved effective starting position");

        match inner
            .consumer
            .initialize_position(task_id, swimlane_id, position)
            .await
        {
            Ok(InitOutcome::Initialized) => {}
            Ok(InitOutcome::StopRequested { reason }) => {
                // An intentional halt requested from inside position initialization,
                // not an operational fault: stop without alarming.
                info!(reason = %reason, "position initialization requested task stop");
                if let Err(err) = inner.controller.stop_task(task_id, swimlane_id).await {
                    error!(error = %err, "failed to request task stop");
                }
            }
            Err(err) => {
                error!(error = %err, "failed to initialize starting position");
                self.stop_and_alarm(&format!("failed to initialize starting position: {err}"));
            }
        }
    }

    /// The detached alarm workflow: broadcast the error-stop marker, request the task
    /// be stopped, mark node health, and deliver the alert to the receivers.
    async fn run_alarm(&self, notice: String) {
        let inner = &self.inner;
        let task_id = &inner.config.task_id;
        let swimlane_id = &inner.swimlane_id;

        error!(notice = %notice, "task raised a fatal error, running stop-and-alarm");

        let full_notice = format!(
            "{notice}\nconsumer: {}\nloader: {}",
            inner.consumer.client_info(),
            inner.loader.client_info()
        );

        if let Err(err) = inner
            .cluster
            .mark_task_stopped_by_error(task_id, swimlane_id, &full_notice)
            .await
        {
            error!(error = %err, "failed to broadcast error-stop marker");
        }

        if let Err(err) = inner.controller.stop_task(task_id, swimlane_id).await {
            error!(error = %err, "failed to request task stop");
        }

        inner.health.mark_task_error(task_id, &full_notice);

        let title = format!(
            "[alarm][{}] task {}-{} stopped by error",
            host_identity(),
            task_id,
            swimlane_id
        );
        let entry = AlertEntry::new(
            AlertType::TaskAlarm,
            task_id.clone(),
            swimlane_id.clone(),
            full_notice,
        )
        .with_title(title);

        if let Err(err) = inner.oplog.upload_alert(entry, &inner.config.receivers).await {
            warn!(error = %err, "failed to deliver alarm notification");
        }

        info!("stop-and-alarm workflow completed");
    }
}

impl std::fmt::Debug for SyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTask")
            .field("task_id", &self.inner.config.task_id)
            .field("swimlane_id", &self.inner.swimlane_id)
            .field("stages", &self.inner.stages)
            .field("running", &self.is_running())
            .field("alarm_triggered", &self.alarm_triggered())
            .finish()
    }
}
