//! Lock-guarded task execution with retry and expiration.

use std::time::{Duration, Instant};

use crate::config::TaskSpec;
use crate::error::{TaskError, TaskResult};
use crate::lock::{InvocationId, TaskLock};

/// How a task invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    /// The body ran to completion.
    Completed(T),
    /// Another holder owned the invocation lock; nothing ran.
    Skipped,
    /// The invocation expired while queued; nothing ran.
    Expired,
}

impl<T> TaskOutcome<T> {
    /// Returns true if the body ran to completion.
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    /// Returns the body's value, if it ran.
    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Maps the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskOutcome<U> {
        match self {
            TaskOutcome::Completed(value) => TaskOutcome::Completed(f(value)),
            TaskOutcome::Skipped => TaskOutcome::Skipped,
            TaskOutcome::Expired => TaskOutcome::Expired,
        }
    }
}

/// One enqueued execution of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    id: InvocationId,
    enqueued_at: Instant,
}

impl Invocation {
    /// A fresh invocation enqueued now.
    pub fn new() -> Self {
        Self::with_id(InvocationId::new())
    }

    /// An invocation with a known ID, enqueued now.
    pub fn with_id(id: InvocationId) -> Self {
        Self {
            id,
            enqueued_at: Instant::now(),
        }
    }

    /// Overrides the enqueue time.
    #[must_use]
    pub fn enqueued_at(mut self, at: Instant) -> Self {
        self.enqueued_at = at;
        self
    }

    /// Invocation ID.
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Time spent since enqueueing.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Returns true once `expires` has elapsed since enqueueing.
    pub fn is_expired(&self, expires: Duration) -> bool {
        self.age() >= expires
    }
}

impl Default for Invocation {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs task bodies under the invocation lock with the task's retry policy.
#[derive(Clone)]
pub struct TaskExecutor {
    lock: TaskLock,
}

impl TaskExecutor {
    /// Creates an executor.
    pub fn new(lock: TaskLock) -> Self {
        Self { lock }
    }

    /// The lock used to guard invocations.
    pub fn lock(&self) -> &TaskLock {
        &self.lock
    }

    /// Runs `body` for `invocation`.
    ///
    /// Every attempt acquires the invocation lock first; if it is held
    /// elsewhere the invocation is skipped. Retryable errors are retried with
    /// backoff until the retry ceiling or the expiration is reached.
    pub fn run<T, F>(
        &self,
        spec: &TaskSpec,
        invocation: &Invocation,
        mut body: F,
    ) -> TaskResult<TaskOutcome<T>>
    where
        F: FnMut() -> TaskResult<T>,
    {
        let task = spec.name();
        if invocation.is_expired(spec.expires) {
            tracing::info!(task, invocation = %invocation.id(), "discarding expired task");
            return Ok(TaskOutcome::Expired);
        }

        let max_attempts = spec.retry.max_attempts();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                std::thread::sleep(spec.retry.delay_for_attempt(attempt));
                if invocation.is_expired(spec.expires) {
                    tracing::warn!(task, invocation = %invocation.id(), attempt, "task expired between retries");
                    break;
                }
            }

            match self.attempt(invocation, &mut body) {
                Ok(outcome) => {
                    tracing::debug!(task, invocation = %invocation.id(), attempt, "task finished");
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    tracing::warn!(task, invocation = %invocation.id(), attempt, error = %e, "task failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::error!(task, invocation = %invocation.id(), attempt, error = %e, "task failed");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or(TaskError::Expired { task }))
    }

    fn attempt<T, F>(&self, invocation: &Invocation, body: &mut F) -> TaskResult<TaskOutcome<T>>
    where
        F: FnMut() -> TaskResult<T>,
    {
        let Some(mut guard) = self.lock.acquire(&invocation.id().lock_key())? else {
            return Ok(TaskOutcome::Skipped);
        };
        let result = body();
        if let Err(e) = guard.release() {
            tracing::warn!(key = guard.key(), error = %e, "failed to release lock");
        }
        result.map(TaskOutcome::Completed)
    }
}
