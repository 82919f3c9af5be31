//! Single background worker for everything the decision path must not wait
//! on: blocked-call notifications and list mutations.
//!
//! Notifications go through a bounded queue and are dropped when it is full.
//! List mutations and flush barriers go through their own unbounded queue and
//! are never dropped for capacity. The worker takes mutations first, runs one
//! task at a time, and is the only writer of the lists.

use crate::cache::DecisionCache;
use crate::list_store::ListStore;
use crate::normalization::NormalizedNumber;
use crate::notify::NotificationSink;
use crate::statistics::{StatEvent, StatisticsCollector};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum Task {
    Notify { number: String, reason: String },
    AddBlocked(String),
    AddAllowed(String),
    /// Completes once every task queued before it has run.
    Barrier(oneshot::Sender<()>),
}

impl Task {
    fn label(&self) -> &'static str {
        match self {
            Task::Notify { .. } => "notification",
            Task::AddBlocked(_) => "block-list update",
            Task::AddAllowed(_) => "allow-list update",
            Task::Barrier(_) => "barrier",
        }
    }
}

/// What the worker needs to carry out tasks.
pub struct WorkerContext {
    pub lists: Arc<ListStore>,
    pub cache: Arc<DecisionCache>,
    pub sink: Arc<dyn NotificationSink>,
    pub stats: Arc<StatisticsCollector>,
}

impl WorkerContext {
    fn handle(&self, task: Task) {
        match task {
            Task::Notify { number, reason } => {
                let delivered = catch_unwind(AssertUnwindSafe(|| {
                    self.sink.notify_blocked(&number, &reason)
                }));
                if delivered.is_err() {
                    log::error!("Notification sink panicked for {number}");
                }
            }
            Task::AddBlocked(raw) => {
                if let Some(number) = self.lists.add_blocked(&raw) {
                    self.after_mutation(&number);
                }
            }
            Task::AddAllowed(raw) => {
                if let Some(number) = self.lists.add_allowed(&raw) {
                    self.after_mutation(&number);
                }
            }
            Task::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    fn after_mutation(&self, number: &NormalizedNumber) {
        let removed = self.cache.invalidate(number);
        self.stats.record_event(StatEvent::ListMutation);
        log::debug!("Invalidated {removed} cached decisions for {number}");
    }
}

pub struct TaskQueue {
    notices: mpsc::Sender<Task>,
    control: mpsc::UnboundedSender<Task>,
    stats: Arc<StatisticsCollector>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TaskQueue {
    /// Start the worker on the current tokio runtime.
    ///
    /// Panics when called outside a runtime; use [`TaskQueue::spawn_on`] there.
    pub fn spawn(capacity: usize, context: WorkerContext) -> Self {
        Self::spawn_on(&Handle::current(), capacity, context)
    }

    /// Start the worker on `runtime`. `capacity` bounds pending notifications.
    pub fn spawn_on(runtime: &Handle, capacity: usize, context: WorkerContext) -> Self {
        let (notices, notice_rx) = mpsc::channel(capacity.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();
        let stats = context.stats.clone();
        let handle = runtime.spawn(Self::worker(control_rx, notice_rx, context));

        Self {
            notices,
            control,
            stats,
            _handle: handle,
        }
    }

    async fn worker(
        mut control: mpsc::UnboundedReceiver<Task>,
        mut notices: mpsc::Receiver<Task>,
        context: WorkerContext,
    ) {
        loop {
            let task = tokio::select! {
                biased;
                Some(task) = control.recv() => task,
                Some(task) = notices.recv() => task,
                else => break,
            };

            if let Task::Barrier(done) = task {
                // Notifications queued before the barrier are already waiting
                while let Ok(notice) = notices.try_recv() {
                    context.handle(notice);
                }
                let _ = done.send(());
                continue;
            }
            context.handle(task);
        }
        log::debug!("Background worker stopped");
    }

    /// Queue `task` without waiting.
    ///
    /// A notification is dropped when the notification queue is full. Other
    /// tasks are only lost if the worker has stopped.
    pub fn submit(&self, task: Task) -> bool {
        if let Task::Notify { .. } = task {
            return self.submit_notification(task);
        }
        match self.control.send(task) {
            Ok(()) => true,
            Err(mpsc::error::SendError(task)) => {
                self.stats.record_event(StatEvent::TaskDropped);
                log::error!("Background worker gone, dropping {}", task.label());
                false
            }
        }
    }

    fn submit_notification(&self, task: Task) -> bool {
        match self.notices.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.stats.record_event(StatEvent::TaskDropped);
                log::warn!("Notification queue full, dropping {}", task.label());
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                self.stats.record_event(StatEvent::TaskDropped);
                log::error!("Background worker gone, dropping {}", task.label());
                false
            }
        }
    }

    /// Wait until everything queued so far has been processed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.control.send(Task::Barrier(done)).is_err() {
            log::error!("Background worker gone, nothing to flush");
            return;
        }
        let _ = wait.await;
    }
}
