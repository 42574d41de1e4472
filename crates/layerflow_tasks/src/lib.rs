//! # LayerFlow Tasks
//!
//! Background tasks that keep the local layer registry and the remote map
//! catalog consistent.
//!
//! This crate provides:
//! - A catalog client interface with an in-memory catalog
//! - Catalog lookup, publishing and enrichment (`CatalogSynchronizer`)
//! - Style upload, derivation and default-style switching (`StyleManager`)
//! - Upload finalization (`UploadFinalizer`)
//! - Post-save reconciliation (`PostSaveReconciler`)
//! - Cascading deletion of catalog artifacts (`CascadingDeleter`)
//! - Invocation locks, retry with backoff and expiration (`TaskExecutor`)
//! - Bounded queues and a tokio worker pool (`Dispatcher`, `WorkerPool`)
//!
//! ## Execution Model
//!
//! Every task invocation runs under a lock keyed by its invocation id. An
//! invocation whose lock is held elsewhere is skipped. Retryable errors are
//! retried with exponential backoff and jitter until the retry ceiling or the
//! task's expiration is reached.
//!
//! ## Key Invariants
//!
//! - At most one worker executes a given invocation at a time
//! - A style is created before it becomes a layer's default, and a superseded
//!   default is only deleted after the switch
//! - Enrichment failures are reported, never fatal; identity fields are
//!   written back only after the catalog resource was found
//! - Registry records are deleted before the catalog artifacts they refer to

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod deleter;
mod error;
mod executor;
mod finalizer;
mod lock;
mod queue;
mod reconciler;
mod report;
mod runner;
mod services;
mod style;
mod sync;

pub use catalog::{
    split_qualified, Attribution, Catalog, CatalogLayer, CatalogResource, CatalogStore,
    MemoryCatalog, PublishRequest, Style, StyleRef,
};
pub use config::{PoolConfig, QueueClass, RetryConfig, TaskKind, TaskSpec};
pub use deleter::{CascadingDeleter, DeleteTarget};
pub use error::{
    CatalogError, CatalogResult, LockError, LockResult, ServiceError, ServiceResult, TaskError,
    TaskResult,
};
pub use executor::{Invocation, TaskExecutor, TaskOutcome};
pub use finalizer::{FinalizeUpload, MetadataFile, UploadFinalizer};
pub use lock::{InvocationId, LockBackend, LockGuard, MemoryLockBackend, TaskLock};
pub use queue::{Dispatcher, Job, PoolStats, RecordingSink, TaskSink, WorkerPool};
pub use reconciler::PostSaveReconciler;
pub use report::{
    DeleteReport, FinalizeReport, OperationReport, ReconcileOutcome, ReconcileReport,
    SkipReason, Step, StepWarning, StyleReport,
};
pub use runner::{
    Components, CreateStyle, CreateThumbnail, SetStyle, TaskReport, TaskRequest, TaskRunner,
};
pub use services::{
    ImportLayersRequest, RecordingServices, ResourceServices, ServiceCall, ServiceStep,
};
pub use style::{default_style_body, resolve_style_file, StyleManager, StyleSource};
pub use sync::{
    keyword_union, store_type_for_file, Candidate, CatalogSynchronizer, CatalogValues,
    FetchResult,
};
