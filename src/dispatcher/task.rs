//! Task definitions for the dispatcher.
//!
//! - `Priority`: queue ordering class of a task
//! - `TaskStatus`: lifecycle state of a task
//! - `TaskRecord`: bookkeeping kept by the dispatcher for each task
//! - `TaskHandle`: what a submitter holds to await a task's result

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::content::ItemId;
use crate::error::{DispatchError, StageError};
use crate::stages::{Stage, StageOutput};

/// Ordering class of a task. Higher priorities leave the queue first; equal
/// priorities leave in submission order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn value(self) -> i32 {
        match self {
            Priority::Normal => 5,
            Priority::High => 10,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Dispatcher-owned record of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: Uuid,
    pub stage: Stage,
    pub item_id: ItemId,
    pub priority: Priority,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure detail once the task has failed.
    pub error: Option<StageError>,
}

impl TaskRecord {
    pub(crate) fn queued(id: Uuid, stage: Stage, item_id: ItemId, priority: Priority) -> Self {
        Self {
            id,
            stage,
            item_id,
            priority,
            status: TaskStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn succeed(&mut self) {
        self.status = TaskStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: StageError) {
        self.status = TaskStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Time spent running, once finished.
    pub fn run_duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        (finished - started).to_std().ok()
    }
}

/// Handle to a submitted task. Pass it to
/// [`Dispatcher::wait`](super::Dispatcher::wait) to obtain the result.
#[derive(Debug)]
pub struct TaskHandle {
    pub id: Uuid,
    pub stage: Stage,
    pub item_id: ItemId,
    pub(crate) receiver: oneshot::Receiver<Result<StageOutput, DispatchError>>,
}
