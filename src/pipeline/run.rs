//! Run options and the handle returned when a run starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::outcome::FinalizedRecord;
use crate::collaborators::Destination;
use crate::content::{ItemId, PipelineState};
use crate::dispatcher::Priority;
use crate::error::PipelineError;

/// Per-run options.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Priority of every task this run submits.
    pub priority: Priority,
    /// Push Accepted and Degraded records downstream.
    pub enable_push: bool,
    /// Overrides the configured destinations.
    pub destinations: Option<Vec<Destination>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            enable_push: true,
            destinations: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_push(mut self, enabled: bool) -> Self {
        self.enable_push = enabled;
        self
    }

    pub fn with_destinations(mut self, destinations: Vec<Destination>) -> Self {
        self.destinations = Some(destinations);
        self
    }
}

/// Cooperative cancellation flag shared between a handle and its run.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a started run.
///
/// Dropping the handle does not stop the run.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub item_id: ItemId,
    state: watch::Receiver<PipelineState>,
    cancel: CancelFlag,
    task: JoinHandle<FinalizedRecord>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: Uuid,
        item_id: ItemId,
        state: watch::Receiver<PipelineState>,
        cancel: CancelFlag,
        task: JoinHandle<FinalizedRecord>,
    ) -> Self {
        Self {
            run_id,
            item_id,
            state,
            cancel,
            task,
        }
    }

    /// Current state of the run's item.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Requests cancellation. Takes effect before the next stage is
    /// dispatched; a stage already running finishes first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the finalized record.
    pub async fn wait(self) -> Result<FinalizedRecord, PipelineError> {
        self.task
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))
    }
}
