//! Stage contract and the ordered stage registry.
//!
//! A task drives an ordered sequence of pipeline stages. The concrete stage
//! implementations live outside this crate; the orchestrator only relies on the
//! [`Stage`] contract and on the fixed iteration order of the [`StageRegistry`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ErrorKind, SyncResult};

/// Classification of pipeline stages in their fixed execution order.
///
/// The order of the variants is significant: it is the order in which stages are
/// started and also the order in which they are stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StageType {
    /// Selects change events from the source swimlane.
    Select,
    /// Extracts and decodes raw change events.
    Extract,
    /// Applies table routing and value transformation.
    Transform,
    /// Loads transformed batches into the target.
    Load,
    /// Periodically checks metadata consistency against the source.
    ///
    /// Only present when the source supports metadata queries.
    MetadataCheck,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Select => "select",
            StageType::Extract => "extract",
            StageType::Transform => "transform",
            StageType::Load => "load",
            StageType::MetadataCheck => "metadata_check",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque output produced by a stage.
///
/// Stages exchange data among themselves through their own contract; the orchestrator
/// only forwards outputs, so the payload stays untyped here and is downcast by the
/// requesting stage via [`crate::task::SyncTask::wait_event`].
pub type StageOutput = Box<dyn Any + Send>;

/// Trait for a single pipeline stage supervised by a task.
///
/// Implementations own their worker threads and queues. Start and stop failures are
/// reported through the returned result; the orchestrator decides whether they are
/// fatal (during start) or logged and skipped (during stop).
#[async_trait]
pub trait Stage: Send + Sync {
    /// Returns the kind of this stage.
    fn stage_type(&self) -> StageType;

    /// Starts the stage's background processing.
    async fn start(&self) -> SyncResult<()>;

    /// Stops the stage's background processing.
    async fn stop(&self) -> SyncResult<()>;

    /// Waits until the stage has output available and returns it.
    ///
    /// May suspend the calling task indefinitely; the suspension contract belongs to
    /// the stage, not to the orchestrator.
    async fn next_output(&self) -> SyncResult<StageOutput>;

    /// Returns the stage's next-sequence-number cursor.
    ///
    /// Only the extract stage maintains a sequence cursor; the default implementation
    /// reports [`ErrorKind::InvalidState`].
    async fn next_sequence(&self) -> SyncResult<u64> {
        crate::bail!(
            ErrorKind::InvalidState,
            "Stage has no sequence cursor",
            format!("stage {} does not expose a sequence", self.stage_type())
        )
    }

    /// Returns true when the stage's internal queue holds no pending data.
    async fn is_queue_empty(&self) -> bool;
}

/// The stage implementations handed to a task at construction.
///
/// The metadata-check stage is optional; it is only installed when the data consumer
/// supports metadata queries.
pub struct StageSet {
    pub select: Arc<dyn Stage>,
    pub extract: Arc<dyn Stage>,
    pub transform: Arc<dyn Stage>,
    pub load: Arc<dyn Stage>,
    pub metadata_check: Option<Arc<dyn Stage>>,
}

/// Ordered collection of the stages owned by one task.
///
/// Built once at task construction; the insertion order (select, extract, transform,
/// load, optional metadata-check) defines both start order and stop order. Stop order
/// is intentionally not reversed so that every stage is attempted even when an earlier
/// one fails.
pub struct StageRegistry {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageRegistry {
    /// Builds the registry in the fixed stage order.
    ///
    /// `include_metadata_check` reflects whether the consumer supports metadata
    /// queries; when false, a provided metadata-check stage is dropped.
    pub(crate) fn build(set: StageSet, include_metadata_check: bool) -> Self {
        let mut stages: Vec<Arc<dyn Stage>> =
            vec![set.select, set.extract, set.transform, set.load];

        if include_metadata_check
            && let Some(metadata_check) = set.metadata_check
        {
            stages.push(metadata_check);
        }

        Self { stages }
    }

    /// Retrieves a stage by kind, if registered.
    pub fn get(&self, stage_type: StageType) -> Option<&Arc<dyn Stage>> {
        self.stages
            .iter()
            .find(|stage| stage.stage_type() == stage_type)
    }

    /// Iterates stages in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.stage_type()))
            .finish()
    }
}
