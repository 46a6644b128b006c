//! Bounded pool of concurrently executing stage tasks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Notify};
use tracing::{debug, info};
use uuid::Uuid;

use super::queue::TaskQueue;
use super::task::{Priority, TaskHandle, TaskRecord, TaskStatus};
use crate::content::ItemId;
use crate::error::{DispatchError, StageError};
use crate::metrics::MetricsCollector;
use crate::stages::{Stage, StageOutput, StageRequest, StageSet};

/// Finished task records kept for status queries after their result was
/// consumed.
const ARCHIVE_LIMIT: usize = 256;

/// Default number of concurrently running tasks.
pub const DEFAULT_CAPACITY: usize = 5;

/// Point-in-time statistics of the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchStats {
    pub capacity: usize,
    pub running: usize,
    pub queued: usize,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub average_task_duration: Duration,
}

impl DispatchStats {
    pub fn total_processed(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            0.0
        } else {
            (self.tasks_succeeded as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct SharedDispatchStats {
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedDispatchStats {
    fn record(&self, succeeded: bool, duration: Duration) {
        if succeeded {
            self.tasks_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

struct PendingTask {
    id: Uuid,
    stage: Stage,
    request: StageRequest,
    reply: oneshot::Sender<Result<StageOutput, DispatchError>>,
}

/// Everything guarded by the dispatcher's single lock.
#[derive(Default)]
struct DispatchState {
    running: usize,
    queue: TaskQueue<PendingTask>,
    busy_items: HashSet<ItemId>,
    records: HashMap<Uuid, TaskRecord>,
    archive: VecDeque<TaskRecord>,
}

struct Inner {
    stages: Arc<StageSet>,
    capacity: usize,
    max_queued: usize,
    state: Mutex<DispatchState>,
    space_freed: Notify,
    stats: SharedDispatchStats,
    shut_down: AtomicBool,
    metrics: MetricsCollector,
}

/// Routes stage work to the stage executors through a bounded pool.
///
/// At most `capacity` tasks run at once. Excess tasks wait in a priority
/// queue (FIFO within a priority); once `max_queued` tasks are waiting,
/// [`submit`](Self::submit) suspends until space frees up. No two tasks of
/// the same item ever run at the same time. A failed task is reported to its
/// submitter and never retried here.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(stages: Arc<StageSet>, capacity: usize, max_queued: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                stages,
                capacity: capacity.max(1),
                max_queued: max_queued.max(1),
                state: Mutex::new(DispatchState::default()),
                space_freed: Notify::new(),
                stats: SharedDispatchStats::default(),
                shut_down: AtomicBool::new(false),
                metrics: MetricsCollector::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Queues `stage` for the item carried by `request`.
    ///
    /// Suspends while the queue is full; fails only after shutdown.
    pub async fn submit(
        &self,
        stage: Stage,
        request: StageRequest,
        priority: Priority,
    ) -> Result<TaskHandle, DispatchError> {
        let id = Uuid::new_v4();
        let item_id = request.item.id;
        let (reply, receiver) = oneshot::channel();
        let mut pending = Some(PendingTask {
            id,
            stage,
            request,
            reply,
        });

        loop {
            // Register for wakeups before looking at the queue.
            let space_freed = self.inner.space_freed.notified();
            tokio::pin!(space_freed);
            space_freed.as_mut().enable();

            if self.inner.shut_down.load(Ordering::SeqCst) {
                return Err(DispatchError::ShutDown);
            }

            {
                let mut state = self.inner.lock();
                if state.queue.len() < self.inner.max_queued {
                    if let Some(task) = pending.take() {
                        state
                            .records
                            .insert(id, TaskRecord::queued(id, stage, item_id, priority));
                        state.queue.push(priority.value(), task);
                    }
                    break;
                }
            }

            debug!(task_id = %id, stage = %stage, "Dispatch queue full, waiting for space");
            space_freed.await;
        }

        debug!(task_id = %id, stage = %stage, item_id = %item_id, priority = %priority, "Task queued");
        self.inner.pump();

        Ok(TaskHandle {
            id,
            stage,
            item_id,
            receiver,
        })
    }

    /// Waits for a task's result and archives its record, including when the
    /// task was lost.
    pub async fn wait(&self, handle: TaskHandle) -> Result<StageOutput, DispatchError> {
        let result = match handle.receiver.await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::TaskLost(handle.id)),
        };

        let mut state = self.inner.lock();
        if let Some(mut record) = state.records.remove(&handle.id) {
            if !record.status.is_terminal() {
                record.fail(StageError::Fault("task lost before reporting".into()));
            }
            if state.archive.len() >= ARCHIVE_LIMIT {
                state.archive.pop_front();
            }
            state.archive.push_back(record);
        }
        drop(state);

        result
    }

    /// Submits a task and waits for its result.
    pub async fn execute(
        &self,
        stage: Stage,
        request: StageRequest,
        priority: Priority,
    ) -> Result<StageOutput, DispatchError> {
        let handle = self.submit(stage, request, priority).await?;
        self.wait(handle).await
    }

    pub fn task_status(&self, id: Uuid) -> Option<TaskStatus> {
        self.task_record(id).map(|r| r.status)
    }

    pub fn task_record(&self, id: Uuid) -> Option<TaskRecord> {
        let state = self.inner.lock();
        state
            .records
            .get(&id)
            .or_else(|| state.archive.iter().rev().find(|r| r.id == id))
            .cloned()
    }

    /// Tasks currently running for `item_id`; never more than one.
    pub fn running_for(&self, item_id: ItemId) -> usize {
        self.inner
            .lock()
            .records
            .values()
            .filter(|r| r.item_id == item_id && r.status == TaskStatus::Running)
            .count()
    }

    pub fn stats(&self) -> DispatchStats {
        let (running, queued) = {
            let state = self.inner.lock();
            (state.running, state.queue.len())
        };
        let succeeded = self.inner.stats.tasks_succeeded.load(Ordering::SeqCst);
        let failed = self.inner.stats.tasks_failed.load(Ordering::SeqCst);
        let total = succeeded + failed;
        let total_ms = self.inner.stats.total_duration_ms.load(Ordering::SeqCst);

        DispatchStats {
            capacity: self.inner.capacity,
            running,
            queued,
            tasks_succeeded: succeeded,
            tasks_failed: failed,
            average_task_duration: if total == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(total_ms / total)
            },
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Stops accepting work. Queued tasks fail with
    /// [`DispatchError::ShutDown`]; running tasks finish normally.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained = {
            let mut state = self.inner.lock();
            let drained = state.queue.drain();
            for task in &drained {
                state.records.remove(&task.id);
            }
            drained
        };

        info!(cancelled = drained.len(), "Dispatcher shutting down");
        for task in drained {
            let _ = task.reply.send(Err(DispatchError::ShutDown));
        }
        self.inner.space_freed.notify_waiters();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts queued tasks while there is spare capacity.
    fn pump(self: &Arc<Self>) {
        loop {
            let task = {
                let mut guard = self.lock();
                let state = &mut *guard;
                if state.running >= self.capacity {
                    self.metrics.set_dispatcher_load(state.queue.len(), state.running);
                    return;
                }

                let busy = &state.busy_items;
                let Some(task) = state
                    .queue
                    .pop_where(|t| !busy.contains(&t.request.item.id))
                else {
                    self.metrics.set_dispatcher_load(state.queue.len(), state.running);
                    return;
                };

                state.running += 1;
                state.busy_items.insert(task.request.item.id);
                if let Some(record) = state.records.get_mut(&task.id) {
                    record.start();
                }
                self.metrics.set_dispatcher_load(state.queue.len(), state.running);
                task
            };

            self.space_freed.notify_waiters();
            self.spawn(task);
        }
    }

    fn spawn(self: &Arc<Self>, task: PendingTask) {
        let inner = Arc::clone(self);

        tokio::spawn(async move {
            let PendingTask {
                id,
                stage,
                request,
                reply,
            } = task;
            let item_id = request.item.id;
            let started = Instant::now();
            debug!(task_id = %id, stage = %stage, item_id = %item_id, "Task started");

            // A panicking executor takes down only this inner task.
            let stages = Arc::clone(&inner.stages);
            let execution =
                tokio::spawn(async move { stages.executor(stage).execute(&request).await });
            let result = match execution.await {
                Ok(result) => result,
                Err(e) => Err(StageError::Fault(format!("{} executor panicked: {}", stage, e))),
            };
            let elapsed = started.elapsed();

            {
                let mut state = inner.lock();
                state.running = state.running.saturating_sub(1);
                state.busy_items.remove(&item_id);
                if let Some(record) = state.records.get_mut(&id) {
                    match &result {
                        Ok(_) => record.succeed(),
                        Err(e) => record.fail(e.clone()),
                    }
                }
            }
            inner.stats.record(result.is_ok(), elapsed);

            debug!(
                task_id = %id,
                stage = %stage,
                item_id = %item_id,
                succeeded = result.is_ok(),
                duration_ms = elapsed.as_millis() as u64,
                "Task finished"
            );

            // The submitter may have stopped listening.
            let _ = reply.send(result.map_err(|source| DispatchError::TaskFailed {
                task_id: id,
                stage,
                source,
            }));

            inner.pump();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        Classification, ContentFetcher, FetchedContent, SentimentReading, SummaryRequest,
        TextAnalyzer,
    };
    use crate::content::{ArticleMetadata, ContentItem, SourceRef};
    use crate::error::CollaboratorError;
    use crate::stages::StageSettings;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    /// Fetcher that blocks until the test releases permits.
    struct GatedFetcher {
        gate: Arc<Semaphore>,
        panic_on: Option<String>,
    }

    #[async_trait]
    impl ContentFetcher for GatedFetcher {
        async fn fetch_content(&self, source: &SourceRef) -> Result<FetchedContent, CollaboratorError> {
            if self.panic_on.as_deref() == Some(source.as_str()) {
                panic!("fetcher blew up");
            }
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            Ok(FetchedContent {
                title: "Title".into(),
                body: "Body text of the article.".into(),
                metadata: ArticleMetadata::default(),
            })
        }
    }

    struct IdleAnalyzer;

    #[async_trait]
    impl TextAnalyzer for IdleAnalyzer {
        async fn classify(
            &self,
            _text: &str,
            _candidates: &[String],
        ) -> Result<Classification, CollaboratorError> {
            Ok(Classification::default())
        }

        async fn analyze_sentiment(&self, _text: &str) -> Result<SentimentReading, CollaboratorError> {
            Err(CollaboratorError::Unreachable("idle".into()))
        }

        async fn summarize(
            &self,
            _text: &str,
            _request: SummaryRequest,
        ) -> Result<String, CollaboratorError> {
            Err(CollaboratorError::Unreachable("idle".into()))
        }
    }

    fn dispatcher(gate: Arc<Semaphore>, capacity: usize, panic_on: Option<&str>) -> Dispatcher {
        let stages = StageSet::new(
            Arc::new(GatedFetcher {
                gate,
                panic_on: panic_on.map(str::to_string),
            }),
            Arc::new(IdleAnalyzer),
            StageSettings {
                fetch_timeout: Duration::from_secs(5),
                collaborator_timeout: Duration::from_secs(5),
                relevant_categories: vec!["news".into()],
            },
        );
        Dispatcher::new(Arc::new(stages), capacity, 64)
    }

    fn request(n: usize) -> StageRequest {
        let source = SourceRef::parse(&format!("https://news.example.com/{}", n)).unwrap();
        StageRequest::new(ContentItem::new(source, 3))
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_sixth_task_waits_for_a_free_slot() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = dispatcher(Arc::clone(&gate), 5, None);

        let mut handles = Vec::new();
        for n in 0..6 {
            handles.push(
                dispatcher
                    .submit(Stage::Fetch, request(n), Priority::Normal)
                    .await
                    .unwrap(),
            );
        }
        settle().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.running, 5);
        assert_eq!(stats.queued, 1);
        assert_eq!(dispatcher.task_status(handles[5].id), Some(TaskStatus::Queued));

        gate.add_permits(6);
        for handle in handles {
            let id = handle.id;
            assert!(matches!(
                dispatcher.wait(handle).await,
                Ok(StageOutput::Fetched(_))
            ));
            assert_eq!(dispatcher.task_status(id), Some(TaskStatus::Succeeded));
        }

        let stats = dispatcher.stats();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.tasks_succeeded, 6);
        assert_eq!(stats.success_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_same_item_never_runs_twice() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = dispatcher(Arc::clone(&gate), 5, None);

        let first = dispatcher
            .submit(Stage::Fetch, request(1), Priority::Normal)
            .await
            .unwrap();
        let second = dispatcher
            .submit(Stage::Fetch, request(1), Priority::Normal)
            .await
            .unwrap();
        settle().await;

        assert_eq!(dispatcher.running_for(first.item_id), 1);
        assert_eq!(dispatcher.task_status(second.id), Some(TaskStatus::Queued));

        gate.add_permits(2);
        assert!(dispatcher.wait(first).await.is_ok());
        assert!(dispatcher.wait(second).await.is_ok());
    }

    #[tokio::test]
    async fn test_high_priority_dequeued_first() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = dispatcher(Arc::clone(&gate), 1, None);

        let blocker = dispatcher
            .submit(Stage::Fetch, request(0), Priority::Normal)
            .await
            .unwrap();
        let normal = dispatcher
            .submit(Stage::Fetch, request(1), Priority::Normal)
            .await
            .unwrap();
        let high = dispatcher
            .submit(Stage::Fetch, request(2), Priority::High)
            .await
            .unwrap();
        settle().await;

        gate.add_permits(1);
        let normal_id = normal.id;
        let high_id = high.id;
        assert!(dispatcher.wait(blocker).await.is_ok());
        settle().await;

        assert_eq!(dispatcher.task_status(high_id), Some(TaskStatus::Running));
        assert_eq!(dispatcher.task_status(normal_id), Some(TaskStatus::Queued));

        gate.add_permits(2);
        assert!(dispatcher.wait(high).await.is_ok());
        assert!(dispatcher.wait(normal).await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_executor_becomes_fault() {
        let gate = Arc::new(Semaphore::new(10));
        let dispatcher = dispatcher(gate, 2, Some("https://news.example.com/7"));

        let handle = dispatcher
            .submit(Stage::Fetch, request(7), Priority::Normal)
            .await
            .unwrap();
        let id = handle.id;
        let err = dispatcher.wait(handle).await.unwrap_err();

        assert!(err.stage_error().is_some_and(StageError::is_fault));
        let record = dispatcher.task_record(id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.is_some());
        assert_eq!(dispatcher.stats().tasks_failed, 1);

        // The pool keeps serving after a fault.
        assert!(dispatcher
            .execute(Stage::Fetch, request(8), Priority::Normal)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_queued_and_new_tasks() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = dispatcher(Arc::clone(&gate), 1, None);

        let running = dispatcher
            .submit(Stage::Fetch, request(0), Priority::Normal)
            .await
            .unwrap();
        let queued = dispatcher
            .submit(Stage::Fetch, request(1), Priority::Normal)
            .await
            .unwrap();
        settle().await;

        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());
        assert_eq!(dispatcher.wait(queued).await, Err(DispatchError::ShutDown));
        assert!(matches!(
            dispatcher.submit(Stage::Fetch, request(2), Priority::Normal).await,
            Err(DispatchError::ShutDown)
        ));

        gate.add_permits(1);
        assert!(dispatcher.wait(running).await.is_ok());
    }

    #[tokio::test]
    async fn test_lost_task_is_archived() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = dispatcher(gate, 1, None);

        let id = Uuid::new_v4();
        let item_id = request(0).item.id;
        let (sender, receiver) = oneshot::channel();
        dispatcher.inner.lock().records.insert(
            id,
            TaskRecord::queued(id, Stage::Fetch, item_id, Priority::Normal),
        );
        drop(sender);

        let handle = TaskHandle {
            id,
            stage: Stage::Fetch,
            item_id,
            receiver,
        };
        assert_eq!(dispatcher.wait(handle).await, Err(DispatchError::TaskLost(id)));

        assert!(!dispatcher.inner.lock().records.contains_key(&id));
        let record = dispatcher.task_record(id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().is_fault());
    }
}
