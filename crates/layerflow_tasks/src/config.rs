//! Task scheduling configuration.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to randomize delays (full jitter).
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration with the standard backoff window.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(700),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration that retries without waiting.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::no_retry()
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Total number of attempts, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculates the delay for a given attempt (0-indexed).
    ///
    /// With jitter enabled the delay is drawn uniformly from `[0, backoff]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=delay_secs))
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Queue class a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    /// Catalog read/write operations.
    Catalog,
    /// Event-driven follow-ups (upload completion, thumbnails).
    Events,
    /// Deletions.
    Cleanup,
}

impl QueueClass {
    /// All queue classes.
    pub const ALL: [QueueClass; 3] = [QueueClass::Catalog, QueueClass::Events, QueueClass::Cleanup];

    /// Broker queue name.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Catalog => "layerflow.catalog",
            QueueClass::Events => "layerflow.events",
            QueueClass::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The task classes known to the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Bulk import of catalog layers into the registry.
    UpdateLayers,
    /// Apply an uploaded style file.
    SetStyle,
    /// Create or derive a style from an upload session.
    CreateStyle,
    /// Finalize an upload.
    FinalizeUpload,
    /// Reconcile a resource after it was saved.
    PostSaveLayers,
    /// Render a thumbnail.
    CreateThumbnail,
    /// Delete a resource and its catalog artifacts.
    CascadingDelete,
}

impl TaskKind {
    /// All task kinds.
    pub const ALL: [TaskKind; 7] = [
        TaskKind::UpdateLayers,
        TaskKind::SetStyle,
        TaskKind::CreateStyle,
        TaskKind::FinalizeUpload,
        TaskKind::PostSaveLayers,
        TaskKind::CreateThumbnail,
        TaskKind::CascadingDelete,
    ];

    /// Stable task name.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::UpdateLayers => "layerflow.tasks.update_layers",
            TaskKind::SetStyle => "layerflow.tasks.set_style",
            TaskKind::CreateStyle => "layerflow.tasks.create_style",
            TaskKind::FinalizeUpload => "layerflow.tasks.finalize_upload",
            TaskKind::PostSaveLayers => "layerflow.tasks.post_save_layers",
            TaskKind::CreateThumbnail => "layerflow.tasks.create_thumbnail",
            TaskKind::CascadingDelete => "layerflow.tasks.cascading_delete",
        }
    }

    /// Default scheduling spec for this task.
    pub fn spec(&self) -> TaskSpec {
        let (queue, expires) = match self {
            TaskKind::UpdateLayers => (QueueClass::Catalog, 600),
            TaskKind::SetStyle => (QueueClass::Catalog, 30),
            TaskKind::CreateStyle => (QueueClass::Catalog, 30),
            TaskKind::FinalizeUpload => (QueueClass::Events, 600),
            TaskKind::PostSaveLayers => (QueueClass::Catalog, 3600),
            TaskKind::CreateThumbnail => (QueueClass::Events, 30),
            TaskKind::CascadingDelete => (QueueClass::Cleanup, 600),
        };
        TaskSpec {
            kind: *self,
            queue,
            expires: Duration::from_secs(expires),
            retry: RetryConfig::default(),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduling spec of a task class.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    /// Task class.
    pub kind: TaskKind,
    /// Queue the task is routed to.
    pub queue: QueueClass,
    /// Time after enqueueing past which the task is discarded.
    pub expires: Duration,
    /// Retry policy.
    pub retry: RetryConfig,
}

impl TaskSpec {
    /// Stable task name.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the expiration.
    #[must_use]
    pub fn with_expires(mut self, expires: Duration) -> Self {
        self.expires = expires;
        self
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Workers for the catalog queue.
    pub catalog_workers: usize,
    /// Workers for the events queue.
    pub events_workers: usize,
    /// Workers for the cleanup queue.
    pub cleanup_workers: usize,
    /// Capacity of each queue.
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// Creates a pool configuration with the default sizes.
    pub fn new() -> Self {
        Self {
            catalog_workers: 4,
            events_workers: 2,
            cleanup_workers: 1,
            queue_capacity: 1024,
        }
    }

    /// Sets the number of workers for a queue.
    #[must_use]
    pub fn with_workers(mut self, queue: QueueClass, workers: usize) -> Self {
        match queue {
            QueueClass::Catalog => self.catalog_workers = workers,
            QueueClass::Events => self.events_workers = workers,
            QueueClass::Cleanup => self.cleanup_workers = workers,
        }
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Number of workers for a queue. Never zero.
    pub fn workers_for(&self, queue: QueueClass) -> usize {
        let workers = match queue {
            QueueClass::Catalog => self.catalog_workers,
            QueueClass::Events => self.events_workers,
            QueueClass::Cleanup => self.cleanup_workers,
        };
        workers.max(1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_catalogue() {
        let spec = TaskKind::PostSaveLayers.spec();
        assert_eq!(spec.name(), "layerflow.tasks.post_save_layers");
        assert_eq!(spec.queue, QueueClass::Catalog);
        assert_eq!(spec.expires, Duration::from_secs(3600));

        assert_eq!(TaskKind::FinalizeUpload.spec().queue, QueueClass::Events);
        assert_eq!(TaskKind::CreateThumbnail.spec().expires, Duration::from_secs(30));
        assert_eq!(TaskKind::CascadingDelete.spec().queue, QueueClass::Cleanup);

        for kind in TaskKind::ALL {
            assert_eq!(kind.spec().retry.max_retries, 3);
            assert!(kind.name().starts_with("layerflow.tasks."));
        }
    }

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_attempts(), 4);
        assert_eq!(config.initial_delay, Duration::from_secs(10));
        assert_eq!(config.max_delay, Duration::from_secs(700));
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5).with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(40));
        // 10 * 2^7 = 1280 is capped.
        assert_eq!(config.delay_for_attempt(8), Duration::from_secs(700));
    }

    #[test]
    fn jitter_stays_within_window() {
        let config = RetryConfig::default();
        for attempt in 1..10 {
            let unjittered = config.clone().with_jitter(false).delay_for_attempt(attempt);
            assert!(config.delay_for_attempt(attempt) <= unjittered);
        }
    }

    #[test]
    fn pool_config_builder() {
        let config = PoolConfig::new()
            .with_workers(QueueClass::Events, 8)
            .with_workers(QueueClass::Cleanup, 0)
            .with_queue_capacity(16);

        assert_eq!(config.workers_for(QueueClass::Events), 8);
        assert_eq!(config.workers_for(QueueClass::Cleanup), 1);
        assert_eq!(config.workers_for(QueueClass::Catalog), 4);
        assert_eq!(config.queue_capacity, 16);
    }
}
