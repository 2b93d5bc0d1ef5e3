//! In-memory fakes for every collaborator of a [`SyncTask`], plus a fixture that
//! wires a fully fake task together for the integration tests.

// Each integration-test binary compiles this module separately and uses a different
// subset of it.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use syncline::alerts::{AlertEntry, AlertReceiver, AlertType, OperationalLog};
use syncline::cluster::ClusterClient;
use syncline::config::TaskConfig;
use syncline::endpoints::{DataConsumer, DataLoader, InitOutcome};
use syncline::error::{ErrorKind, SyncResult};
use syncline::mapper::MapperConfig;
use syncline::runtime::{NodeHealth, ResourceManager, TaskController};
use syncline::stage::{Stage, StageOutput, StageSet, StageType};
use syncline::stats::{TaskPerformance, TaskStatSnapshot};
use syncline::sync_error;
use syncline::task::{SyncTask, TaskRuntime};
use syncline::types::{Position, SwimlaneId, TaskId};

pub const TASK_ID: &str = "t1";
pub const SWIMLANE_ID: &str = "l1";

static TRACING: std::sync::Once = std::sync::Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Polls a condition until it holds, panicking after two seconds.
pub async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s: {description}");
}

/// A stage that records start/stop attempts into a shared chronological log.
pub struct MockStage {
    stage_type: StageType,
    events: Arc<Mutex<Vec<String>>>,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub queue_empty: AtomicBool,
    pub sequence: AtomicU64,
    outputs: Mutex<VecDeque<StageOutput>>,
    output_ready: tokio::sync::Notify,
}

impl MockStage {
    pub fn new(stage_type: StageType, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            stage_type,
            events,
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            queue_empty: AtomicBool::new(true),
            sequence: AtomicU64::new(0),
            outputs: Mutex::new(VecDeque::new()),
            output_ready: tokio::sync::Notify::new(),
        })
    }

    pub fn push_output(&self, output: StageOutput) {
        self.outputs.lock().unwrap().push_back(output);
        self.output_ready.notify_one();
    }
}

#[async_trait]
impl Stage for MockStage {
    fn stage_type(&self) -> StageType {
        self.stage_type
    }

    async fn start(&self) -> SyncResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("start:{}", self.stage_type));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(sync_error!(
                ErrorKind::StageStartFailed,
                "Stage start failed",
                format!("{} refused to start", self.stage_type)
            ));
        }
        Ok(())
    }

    async fn stop(&self) -> SyncResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("stop:{}", self.stage_type));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(sync_error!(
                ErrorKind::StageStopFailed,
                "Stage stop failed",
                format!("{} refused to stop", self.stage_type)
            ));
        }
        Ok(())
    }

    async fn next_output(&self) -> SyncResult<StageOutput> {
        loop {
            if let Some(output) = self.outputs.lock().unwrap().pop_front() {
                return Ok(output);
            }
            self.output_ready.notified().await;
        }
    }

    async fn next_sequence(&self) -> SyncResult<u64> {
        Ok(self.sequence.load(Ordering::SeqCst))
    }

    async fn is_queue_empty(&self) -> bool {
        self.queue_empty.load(Ordering::SeqCst)
    }
}

/// In-memory cluster substrate recording every broadcast.
#[derive(Default)]
pub struct MockCluster {
    pub registered: Mutex<Vec<(TaskId, SwimlaneId)>>,
    pub register_preempted: AtomicBool,
    pub committed_position: Mutex<Option<Position>>,
    pub seed_stats: Mutex<Vec<TaskStatSnapshot>>,
    pub submitted: Mutex<Vec<TaskStatSnapshot>>,
    pub submit_failure: AtomicBool,
    pub merged_registered_time: Mutex<Option<DateTime<Utc>>>,
    pub performance: Mutex<Vec<TaskPerformance>>,
    pub stopped: AtomicUsize,
    pub stop_failure: AtomicBool,
    pub stopped_by_error: Mutex<Vec<String>>,
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn register_task(&self, task_id: &TaskId, swimlane_id: &SwimlaneId) -> SyncResult<()> {
        if self.register_preempted.load(Ordering::SeqCst) {
            return Err(sync_error!(
                ErrorKind::LockPreempted,
                "Task already owned by another node",
                format!("{task_id}-{swimlane_id} is locked elsewhere")
            ));
        }
        self.registered
            .lock()
            .unwrap()
            .push((task_id.clone(), swimlane_id.clone()));
        Ok(())
    }

    async fn query_last_position(
        &self,
        _task_id: &TaskId,
        _swimlane_id: &SwimlaneId,
    ) -> SyncResult<Option<Position>> {
        Ok(self.committed_position.lock().unwrap().clone())
    }

    async fn query_task_stats(
        &self,
        _task_id: &TaskId,
        _swimlane_id: &SwimlaneId,
    ) -> SyncResult<Vec<TaskStatSnapshot>> {
        Ok(self.seed_stats.lock().unwrap().clone())
    }

    async fn submit_stat(&self, snapshot: TaskStatSnapshot) -> SyncResult<TaskStatSnapshot> {
        if self.submit_failure.load(Ordering::SeqCst) {
            return Err(sync_error!(
                ErrorKind::StatSubmissionFailed,
                "Stat submission rejected"
            ));
        }

        self.submitted.lock().unwrap().push(snapshot.clone());

        let mut remote = snapshot;
        if let Some(registered_time) = *self.merged_registered_time.lock().unwrap() {
            remote.registered_time = Some(registered_time);
        }
        Ok(remote)
    }

    async fn upload_performance(&self, performance: TaskPerformance) -> SyncResult<()> {
        self.performance.lock().unwrap().push(performance);
        Ok(())
    }

    async fn mark_task_stopped(
        &self,
        _task_id: &TaskId,
        _swimlane_id: &SwimlaneId,
    ) -> SyncResult<()> {
        if self.stop_failure.load(Ordering::SeqCst) {
            return Err(sync_error!(
                ErrorKind::BroadcastFailed,
                "Stop broadcast rejected"
            ));
        }
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_task_stopped_by_error(
        &self,
        _task_id: &TaskId,
        _swimlane_id: &SwimlaneId,
        notice: &str,
    ) -> SyncResult<()> {
        self.stopped_by_error.lock().unwrap().push(notice.to_owned());
        Ok(())
    }
}

/// Consumer fake with a scriptable position-initialization outcome.
pub struct MockConsumer {
    pub supports_metadata: AtomicBool,
    pub initial: Mutex<Position>,
    pub initialized: Mutex<Vec<Position>>,
    pub stop_requested_reason: Mutex<Option<String>>,
    pub fail_init: AtomicBool,
}

impl Default for MockConsumer {
    fn default() -> Self {
        Self {
            supports_metadata: AtomicBool::new(false),
            initial: Mutex::new(Position::new("pos-0")),
            initialized: Mutex::new(Vec::new()),
            stop_requested_reason: Mutex::new(None),
            fail_init: AtomicBool::new(false),
        }
    }
}

impl MockConsumer {
    pub fn initialized_positions(&self) -> Vec<Position> {
        self.initialized.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataConsumer for MockConsumer {
    fn swimlane_id(&self) -> SwimlaneId {
        SWIMLANE_ID.to_owned()
    }

    fn supports_metadata_query(&self) -> bool {
        self.supports_metadata.load(Ordering::SeqCst)
    }

    fn initial_position(&self) -> Position {
        self.initial.lock().unwrap().clone()
    }

    async fn initialize_position(
        &self,
        _task_id: &TaskId,
        _swimlane_id: &SwimlaneId,
        position: Position,
    ) -> SyncResult<InitOutcome> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(sync_error!(
                ErrorKind::PositionInitFailed,
                "Position initialization failed"
            ));
        }
        if let Some(reason) = self.stop_requested_reason.lock().unwrap().clone() {
            return Ok(InitOutcome::StopRequested { reason });
        }
        self.initialized.lock().unwrap().push(position);
        Ok(InitOutcome::Initialized)
    }

    fn client_info(&self) -> String {
        "mock-consumer@source:1234".to_owned()
    }
}

pub struct MockLoader;

impl DataLoader for MockLoader {
    fn client_info(&self) -> String {
        "mock-loader@target:5678".to_owned()
    }
}

/// Counting slot pool.
pub struct MockResources {
    available: AtomicI64,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl MockResources {
    pub fn with_slots(slots: i64) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicI64::new(slots),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }
}

impl ResourceManager for MockResources {
    fn acquire_slot(&self) -> bool {
        if self.available.fetch_sub(1, Ordering::SeqCst) > 0 {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            self.available.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn release_slot(&self) {
        self.available.fetch_add(1, Ordering::SeqCst);
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockController {
    pub stops: Mutex<Vec<(TaskId, SwimlaneId)>>,
}

#[async_trait]
impl TaskController for MockController {
    async fn stop_task(&self, task_id: &TaskId, swimlane_id: &SwimlaneId) -> SyncResult<()> {
        self.stops
            .lock()
            .unwrap()
            .push((task_id.clone(), swimlane_id.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockHealth {
    pub errors: Mutex<Vec<(TaskId, String)>>,
}

impl NodeHealth for MockHealth {
    fn mark_task_error(&self, task_id: &TaskId, notice: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((task_id.clone(), notice.to_owned()));
    }
}

#[derive(Default)]
pub struct MockOpLog {
    pub task_logs: Mutex<Vec<String>>,
    pub alerts: Mutex<Vec<(AlertEntry, Vec<AlertReceiver>)>>,
}

#[async_trait]
impl OperationalLog for MockOpLog {
    async fn upload(
        &self,
        _alert_type: AlertType,
        _task_id: &TaskId,
        _swimlane_id: &SwimlaneId,
        message: &str,
    ) -> SyncResult<()> {
        self.task_logs.lock().unwrap().push(message.to_owned());
        Ok(())
    }

    async fn upload_alert(
        &self,
        entry: AlertEntry,
        receivers: &[AlertReceiver],
    ) -> SyncResult<()> {
        self.alerts
            .lock()
            .unwrap()
            .push((entry, receivers.to_vec()));
        Ok(())
    }
}

/// Wires a fully fake task together; individual fakes stay reachable for scripting
/// failures and asserting side effects.
pub struct Fixture {
    pub events: Arc<Mutex<Vec<String>>>,
    pub select: Arc<MockStage>,
    pub extract: Arc<MockStage>,
    pub transform: Arc<MockStage>,
    pub load: Arc<MockStage>,
    pub metadata_check: Arc<MockStage>,
    pub consumer: Arc<MockConsumer>,
    pub cluster: Arc<MockCluster>,
    pub resources: Arc<MockResources>,
    pub controller: Arc<MockController>,
    pub health: Arc<MockHealth>,
    pub oplog: Arc<MockOpLog>,
    pub config: TaskConfig,
    pub mapper_config: MapperConfig,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut config = TaskConfig::new(TASK_ID);
        config.receivers = vec![AlertReceiver {
            name: "oncall".to_owned(),
            address: "oncall@example.com".to_owned(),
        }];

        Self {
            select: MockStage::new(StageType::Select, events.clone()),
            extract: MockStage::new(StageType::Extract, events.clone()),
            transform: MockStage::new(StageType::Transform, events.clone()),
            load: MockStage::new(StageType::Load, events.clone()),
            metadata_check: MockStage::new(StageType::MetadataCheck, events.clone()),
            events,
            consumer: Arc::new(MockConsumer::default()),
            cluster: Arc::new(MockCluster::default()),
            resources: MockResources::with_slots(8),
            controller: Arc::new(MockController::default()),
            health: Arc::new(MockHealth::default()),
            oplog: Arc::new(MockOpLog::default()),
            config,
            mapper_config: MapperConfig::new(),
        }
    }

    pub fn stage_set(&self) -> StageSet {
        StageSet {
            select: self.select.clone(),
            extract: self.extract.clone(),
            transform: self.transform.clone(),
            load: self.load.clone(),
            metadata_check: Some(self.metadata_check.clone()),
        }
    }

    pub async fn task(&self) -> SyncTask {
        SyncTask::new(
            self.config.clone(),
            self.consumer.clone(),
            Arc::new(MockLoader),
            self.stage_set(),
            self.mapper_config.clone(),
            TaskRuntime {
                cluster: self.cluster.clone(),
                resources: self.resources.clone(),
                controller: self.controller.clone(),
                health: self.health.clone(),
                oplog: self.oplog.clone(),
            },
        )
        .await
        .expect("task construction failed")
    }

    pub fn stage_events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}
