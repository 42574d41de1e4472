//! Task queues and the worker pool draining them.
//!
//! Each [`QueueClass`] has its own bounded channel. Workers are tokio tasks
//! that hand each job to the blocking [`TaskRunner`] on the blocking pool.

use async_channel as chan;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{PoolConfig, QueueClass};
use crate::error::{TaskError, TaskResult};
use crate::executor::{Invocation, TaskOutcome};
use crate::lock::InvocationId;
use crate::runner::{TaskReport, TaskRequest, TaskRunner};

/// Accepts task requests for asynchronous execution.
pub trait TaskSink: Send + Sync {
    /// Enqueues `request`. Returns the id of the new invocation.
    fn dispatch(&self, request: TaskRequest) -> TaskResult<InvocationId>;
}

/// A sink that only records what it was given.
#[derive(Default)]
pub struct RecordingSink {
    requests: Mutex<Vec<TaskRequest>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<TaskRequest> {
        self.requests.lock().clone()
    }

    /// Drains the received requests.
    pub fn take(&self) -> Vec<TaskRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

impl TaskSink for RecordingSink {
    fn dispatch(&self, request: TaskRequest) -> TaskResult<InvocationId> {
        self.requests.lock().push(request);
        Ok(InvocationId::new())
    }
}

/// A queued invocation.
#[derive(Debug, Clone)]
pub struct Job {
    /// What to run.
    pub request: TaskRequest,
    /// Identity and enqueue time.
    pub invocation: Invocation,
}

struct Queue {
    tx: chan::Sender<Job>,
    rx: chan::Receiver<Job>,
}

/// Routes task requests to their queue.
#[derive(Clone)]
pub struct Dispatcher {
    queues: Arc<BTreeMap<QueueClass, Queue>>,
}

impl Dispatcher {
    /// Creates one queue per class, each holding at most `capacity` jobs.
    pub fn new(capacity: usize) -> Self {
        let queues = QueueClass::ALL
            .iter()
            .map(|&class| {
                let (tx, rx) = chan::bounded(capacity.max(1));
                (class, Queue { tx, rx })
            })
            .collect();
        Self {
            queues: Arc::new(queues),
        }
    }

    /// Creates the queues sized by `config`.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.queue_capacity)
    }

    /// Enqueues an existing invocation.
    pub fn enqueue(&self, job: Job) -> TaskResult<()> {
        let class = job.request.kind().spec().queue;
        let queue = self.queue(class);
        queue.tx.try_send(job).map_err(|e| match e {
            chan::TrySendError::Full(_) => TaskError::Dispatch(format!("queue {} is full", class)),
            chan::TrySendError::Closed(_) => {
                TaskError::Dispatch(format!("queue {} is closed", class))
            }
        })
    }

    /// Receiving end of a queue.
    pub fn receiver(&self, class: QueueClass) -> chan::Receiver<Job> {
        self.queue(class).rx.clone()
    }

    /// Jobs waiting in a queue.
    pub fn len(&self, class: QueueClass) -> usize {
        self.queue(class).tx.len()
    }

    /// Closes every queue. Jobs already queued are still delivered.
    pub fn close(&self) {
        for queue in self.queues.values() {
            queue.tx.close();
        }
    }

    fn queue(&self, class: QueueClass) -> &Queue {
        // Every class gets a queue in `new`.
        &self.queues[&class]
    }
}

impl TaskSink for Dispatcher {
    fn dispatch(&self, request: TaskRequest) -> TaskResult<InvocationId> {
        let invocation = Invocation::new();
        let id = invocation.id();
        let task = request.kind().name();
        self.enqueue(Job {
            request,
            invocation,
        })?;
        tracing::debug!(task, invocation = %id, "task enqueued");
        Ok(id)
    }
}

/// Counters of finished invocations.
#[derive(Debug, Default)]
pub struct PoolStats {
    completed: AtomicU64,
    skipped: AtomicU64,
    expired: AtomicU64,
    failed: AtomicU64,
}

impl PoolStats {
    /// Invocations that ran to completion.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Invocations skipped because their lock was held.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Invocations discarded past their expiration.
    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    /// Invocations that failed for good.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// All finished invocations.
    pub fn total(&self) -> u64 {
        self.completed() + self.skipped() + self.expired() + self.failed()
    }

    fn record(&self, outcome: &TaskResult<TaskOutcome<TaskReport>>) {
        let counter = match outcome {
            Ok(TaskOutcome::Completed(_)) => &self.completed,
            Ok(TaskOutcome::Skipped) => &self.skipped,
            Ok(TaskOutcome::Expired) => &self.expired,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Workers draining the dispatcher's queues.
pub struct WorkerPool {
    dispatcher: Dispatcher,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Starts the workers. Must be called from within a tokio runtime.
    pub fn start(dispatcher: &Dispatcher, runner: Arc<TaskRunner>, config: &PoolConfig) -> Self {
        let stats = Arc::new(PoolStats::default());
        let mut handles = Vec::new();

        for class in QueueClass::ALL {
            for worker in 0..config.workers_for(class) {
                handles.push(tokio::spawn(work(
                    class,
                    worker,
                    dispatcher.receiver(class),
                    Arc::clone(&runner),
                    Arc::clone(&stats),
                )));
            }
        }
        tracing::info!(workers = handles.len(), "worker pool started");

        Self {
            dispatcher: dispatcher.clone(),
            handles,
            stats,
        }
    }

    /// Invocation counters.
    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Closes the queues and waits for the workers to drain them.
    pub async fn shutdown(self) {
        self.dispatcher.close();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker terminated abnormally");
            }
        }
        tracing::info!(completed = self.stats.completed(), failed = self.stats.failed(), "worker pool stopped");
    }
}

async fn work(
    class: QueueClass,
    worker: usize,
    rx: chan::Receiver<Job>,
    runner: Arc<TaskRunner>,
    stats: Arc<PoolStats>,
) {
    while let Ok(job) = rx.recv().await {
        let task = job.request.kind().name();
        let invocation = job.invocation.id();
        let runner = Arc::clone(&runner);
        let joined =
            tokio::task::spawn_blocking(move || runner.execute(&job.request, &job.invocation))
                .await;

        match joined {
            Ok(outcome) => {
                if let Err(e) = &outcome {
                    tracing::error!(queue = %class, worker, task, %invocation, error = %e, "task gave up");
                }
                stats.record(&outcome);
            }
            Err(e) => {
                tracing::error!(queue = %class, worker, task, %invocation, error = %e, "task panicked");
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    tracing::debug!(queue = %class, worker, "worker stopped");
}
