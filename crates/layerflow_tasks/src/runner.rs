//! Task requests and the runner that executes them.
//!
//! A [`TaskRequest`] is the serialized form of one task invocation, routed by
//! its [`TaskKind`]. The [`TaskRunner`] wires the task components together and
//! executes requests under the invocation lock with the task's retry policy.

use layerflow_core::{
    NotificationFeed, Registry, Resource, ResourceId, ResourceUpdate, Settings,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::{RetryConfig, TaskKind, TaskSpec};
use crate::deleter::{CascadingDeleter, DeleteTarget};
use crate::error::{TaskError, TaskResult};
use crate::executor::{Invocation, TaskExecutor, TaskOutcome};
use crate::finalizer::{FinalizeUpload, UploadFinalizer};
use crate::lock::{LockBackend, TaskLock};
use crate::queue::TaskSink;
use crate::reconciler::PostSaveReconciler;
use crate::report::{DeleteReport, FinalizeReport, ReconcileReport, StyleReport};
use crate::services::{ImportLayersRequest, ResourceServices};
use crate::style::{StyleManager, StyleSource};
use crate::sync::CatalogSynchronizer;

/// Arguments of a set-style task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStyle {
    /// Target resource.
    pub resource: ResourceId,
    /// The uploaded style.
    pub source: StyleSource,
}

/// Arguments of a create-style task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStyle {
    /// Target resource.
    pub resource: ResourceId,
    /// Style name.
    pub name: String,
    /// Style shipped with the upload, if any.
    #[serde(default)]
    pub source: Option<StyleSource>,
    /// Directory relative style files are resolved against.
    #[serde(default)]
    pub tempdir: Option<PathBuf>,
}

/// Arguments of a thumbnail task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateThumbnail {
    /// Target resource.
    pub resource: ResourceId,
    /// Replace an existing thumbnail.
    #[serde(default)]
    pub overwrite: bool,
    /// Only render when the resource has a usable extent.
    #[serde(default)]
    pub check_bbox: bool,
}

/// A serialized task invocation.
///
/// Encoded as `{"task": "<kind>", "args": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum TaskRequest {
    /// Bulk import of catalog layers.
    UpdateLayers(ImportLayersRequest),
    /// Apply an uploaded style.
    SetStyle(SetStyle),
    /// Create or derive a style.
    CreateStyle(CreateStyle),
    /// Finalize an upload.
    FinalizeUpload(FinalizeUpload),
    /// Reconcile a saved resource with the catalog.
    PostSaveLayers {
        /// Target resource.
        resource: ResourceId,
    },
    /// Render a thumbnail.
    CreateThumbnail(CreateThumbnail),
    /// Delete a resource and its catalog artifacts.
    CascadingDelete(DeleteTarget),
}

impl TaskRequest {
    /// Task class of the request.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::UpdateLayers(_) => TaskKind::UpdateLayers,
            TaskRequest::SetStyle(_) => TaskKind::SetStyle,
            TaskRequest::CreateStyle(_) => TaskKind::CreateStyle,
            TaskRequest::FinalizeUpload(_) => TaskKind::FinalizeUpload,
            TaskRequest::PostSaveLayers { .. } => TaskKind::PostSaveLayers,
            TaskRequest::CreateThumbnail(_) => TaskKind::CreateThumbnail,
            TaskRequest::CascadingDelete(_) => TaskKind::CascadingDelete,
        }
    }

    /// Resource the request targets. Bulk imports target none.
    pub fn resource(&self) -> Option<ResourceId> {
        match self {
            TaskRequest::UpdateLayers(_) => None,
            TaskRequest::SetStyle(t) => Some(t.resource),
            TaskRequest::CreateStyle(t) => Some(t.resource),
            TaskRequest::FinalizeUpload(t) => Some(t.resource),
            TaskRequest::PostSaveLayers { resource } => Some(*resource),
            TaskRequest::CreateThumbnail(t) => Some(t.resource),
            TaskRequest::CascadingDelete(t) => Some(t.resource),
        }
    }

    /// Encodes the request.
    pub fn to_json(&self) -> TaskResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a request.
    pub fn from_json(json: &str) -> TaskResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Result of a completed task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskReport {
    /// Number of layers imported.
    Imported(usize),
    /// Style task result.
    Style(StyleReport),
    /// Upload finalization result.
    Finalized(FinalizeReport),
    /// Reconciliation result.
    Reconciled(ReconcileReport),
    /// URL of the rendered thumbnail.
    Thumbnail(String),
    /// Deletion result.
    Deleted(DeleteReport),
}

/// Collaborators a [`TaskRunner`] is built from.
#[derive(Clone)]
pub struct Components {
    /// Local registry.
    pub registry: Arc<dyn Registry>,
    /// Catalog client.
    pub catalog: Arc<dyn Catalog>,
    /// External services.
    pub services: Arc<dyn ResourceServices>,
    /// Lock storage.
    pub locks: Arc<dyn LockBackend>,
    /// Where follow-up tasks are sent.
    pub sink: Arc<dyn TaskSink>,
    /// Notification feed.
    pub feed: Arc<NotificationFeed>,
}

/// Executes task requests.
pub struct TaskRunner {
    executor: TaskExecutor,
    registry: Arc<dyn Registry>,
    services: Arc<dyn ResourceServices>,
    styles: StyleManager,
    finalizer: UploadFinalizer,
    reconciler: PostSaveReconciler,
    deleter: CascadingDeleter,
    retry: Option<RetryConfig>,
}

impl TaskRunner {
    /// Creates a runner.
    pub fn new(components: Components, settings: Settings) -> Self {
        let Components {
            registry,
            catalog,
            services,
            locks,
            sink,
            feed,
        } = components;

        let sync = Arc::new(CatalogSynchronizer::new(
            Arc::clone(&catalog),
            Arc::clone(&services),
            settings.clone(),
        ));

        Self {
            executor: TaskExecutor::new(TaskLock::new(locks, settings.lock_ttl())),
            styles: StyleManager::new(
                Arc::clone(&catalog),
                Arc::clone(&services),
                settings.clone(),
            ),
            finalizer: UploadFinalizer::new(
                Arc::clone(&registry),
                Arc::clone(&sync),
                Arc::clone(&services),
                sink,
                Arc::clone(&feed),
            ),
            reconciler: PostSaveReconciler::new(
                Arc::clone(&registry),
                sync,
                Arc::clone(&services),
                feed,
                settings.clone(),
            ),
            deleter: CascadingDeleter::new(
                Arc::clone(&registry),
                catalog,
                Arc::clone(&services),
                settings,
            ),
            registry,
            services,
            retry: None,
        }
    }

    /// Overrides the retry policy of every task class.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Scheduling spec used for `kind`.
    pub fn spec(&self, kind: TaskKind) -> TaskSpec {
        let spec = kind.spec();
        match &self.retry {
            Some(retry) => spec.with_retry(retry.clone()),
            None => spec,
        }
    }

    /// Executes `request` for `invocation`.
    pub fn execute(
        &self,
        request: &TaskRequest,
        invocation: &Invocation,
    ) -> TaskResult<TaskOutcome<TaskReport>> {
        let spec = self.spec(request.kind());
        self.executor
            .run(&spec, invocation, || self.dispatch(request))
    }

    fn dispatch(&self, request: &TaskRequest) -> TaskResult<TaskReport> {
        match request {
            TaskRequest::UpdateLayers(import) => {
                let imported = self.services.import_catalog_layers(import)?;
                tracing::info!(imported, "catalog layers imported");
                Ok(TaskReport::Imported(imported))
            }
            TaskRequest::SetStyle(task) => {
                let resource = self.load(task.resource)?;
                Ok(TaskReport::Style(
                    self.styles.set_style(&resource, &task.source)?,
                ))
            }
            TaskRequest::CreateStyle(task) => {
                let resource = self.load(task.resource)?;
                Ok(TaskReport::Style(self.styles.create_style(
                    &resource,
                    &task.name,
                    task.source.as_ref(),
                    task.tempdir.as_deref(),
                )?))
            }
            TaskRequest::FinalizeUpload(task) => {
                let resource = self.load(task.resource)?;
                Ok(TaskReport::Finalized(
                    self.finalizer.finalize(resource, task)?,
                ))
            }
            TaskRequest::PostSaveLayers { resource } => {
                let resource = self.load(*resource)?;
                Ok(TaskReport::Reconciled(self.reconciler.reconcile(resource)?))
            }
            TaskRequest::CreateThumbnail(task) => {
                let resource = self.load(task.resource)?;
                let url = self
                    .services
                    .create_thumbnail(&resource, task.overwrite, task.check_bbox)?;
                let update = ResourceUpdate {
                    thumbnail_url: Some(url.clone()),
                    ..ResourceUpdate::new()
                };
                self.registry.update_resource(resource.id, &update)?;
                Ok(TaskReport::Thumbnail(url))
            }
            TaskRequest::CascadingDelete(target) => {
                Ok(TaskReport::Deleted(self.deleter.delete(target)?))
            }
        }
    }

    fn load(&self, id: ResourceId) -> TaskResult<Resource> {
        match self.registry.resource(id) {
            Ok(resource) => Ok(resource),
            Err(e) if e.is_not_found() => Err(TaskError::MissingEntity(id)),
            Err(e) => Err(e.into()),
        }
    }
}
