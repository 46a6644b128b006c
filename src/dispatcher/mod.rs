//! Task dispatch for stage executors.
//!
//! The pipeline controller never calls a stage directly. It submits a
//! [`Stage`](crate::stages::Stage) together with an item snapshot to the
//! [`Dispatcher`], which owns the resulting task for its whole lifetime and
//! hands back a [`TaskHandle`] to await.

pub mod pool;
pub mod queue;
pub mod task;

pub use pool::{DispatchStats, Dispatcher, DEFAULT_CAPACITY};
pub use queue::TaskQueue;
pub use task::{Priority, TaskHandle, TaskRecord, TaskStatus};
