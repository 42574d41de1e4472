//! Upload Finalizer: the last pass over a freshly ingested resource.

use layerflow_core::{
    ImportId, Notification, NotificationFeed, Registry, Resource, ResourceId,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::TaskKind;
use crate::error::TaskResult;
use crate::queue::TaskSink;
use crate::report::{FinalizeReport, OperationReport, Step};
use crate::runner::{CreateStyle, SetStyle, TaskRequest};
use crate::services::ResourceServices;
use crate::style::StyleSource;
use crate::sync::CatalogSynchronizer;

/// The metadata file argument of an upload, as the importer sends it.
///
/// A single path or a list of paths (the first one counts); anything else
/// means no metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataFile {
    /// One path.
    Path(PathBuf),
    /// Several values; only a leading path is used.
    List(Vec<serde_json::Value>),
    /// Anything else.
    Other(serde_json::Value),
}

impl MetadataFile {
    /// The metadata file path, if the argument names one.
    pub fn path(&self) -> Option<PathBuf> {
        match self {
            MetadataFile::Path(path) => Some(path.clone()),
            MetadataFile::List(items) => items
                .first()
                .and_then(serde_json::Value::as_str)
                .map(PathBuf::from),
            MetadataFile::Other(_) => None,
        }
    }
}

/// Arguments of an upload finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeUpload {
    /// Import that produced the resource.
    pub import_id: ImportId,
    /// The ingested resource.
    pub resource: ResourceId,
    /// Permissions to apply, as sent by the client.
    #[serde(default)]
    pub permissions: Option<serde_json::Value>,
    /// Whether the resource was created (rather than replaced) by this upload.
    #[serde(default)]
    pub created: bool,
    /// Metadata file argument.
    #[serde(default)]
    pub metadata_file: Option<MetadataFile>,
    /// Style file shipped with the upload.
    #[serde(default)]
    pub style_file: Option<PathBuf>,
    /// Whether the user uploaded the style file explicitly.
    #[serde(default)]
    pub style_uploaded: bool,
    /// Upload working directory, removed at the end.
    #[serde(default)]
    pub tempdir: Option<PathBuf>,
}

impl FinalizeUpload {
    /// Finalization of `resource` for `import_id` with nothing else attached.
    pub fn new(import_id: ImportId, resource: ResourceId) -> Self {
        Self {
            import_id,
            resource,
            permissions: None,
            created: false,
            metadata_file: None,
            style_file: None,
            style_uploaded: false,
            tempdir: None,
        }
    }

    /// Sets the permissions to apply.
    #[must_use]
    pub fn with_permissions(mut self, permissions: serde_json::Value) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Marks the resource as newly created.
    #[must_use]
    pub fn created(mut self, created: bool) -> Self {
        self.created = created;
        self
    }

    /// Sets the metadata file argument.
    #[must_use]
    pub fn with_metadata_file(mut self, metadata_file: MetadataFile) -> Self {
        self.metadata_file = Some(metadata_file);
        self
    }

    /// Sets the style file and whether it was uploaded explicitly.
    #[must_use]
    pub fn with_style_file(mut self, path: impl Into<PathBuf>, uploaded: bool) -> Self {
        self.style_file = Some(path.into());
        self.style_uploaded = uploaded;
        self
    }

    /// Sets the upload working directory.
    #[must_use]
    pub fn with_tempdir(mut self, tempdir: impl Into<PathBuf>) -> Self {
        self.tempdir = Some(tempdir.into());
        self
    }
}

#[derive(Default)]
struct Stages {
    catalog_resolved: bool,
    metadata_uploaded: bool,
    style_task: Option<TaskKind>,
}

/// Runs the finalization stages for an ingested resource.
pub struct UploadFinalizer {
    registry: Arc<dyn Registry>,
    sync: Arc<CatalogSynchronizer>,
    services: Arc<dyn ResourceServices>,
    sink: Arc<dyn TaskSink>,
    feed: Arc<NotificationFeed>,
}

impl UploadFinalizer {
    /// Creates a finalizer.
    pub fn new(
        registry: Arc<dyn Registry>,
        sync: Arc<CatalogSynchronizer>,
        services: Arc<dyn ResourceServices>,
        sink: Arc<dyn TaskSink>,
        feed: Arc<NotificationFeed>,
    ) -> Self {
        Self {
            registry,
            sync,
            services,
            sink,
            feed,
        }
    }

    /// Finalizes `resource`.
    ///
    /// The upload record is marked complete after temp-directory cleanup,
    /// even when an earlier stage failed; that failure is returned afterwards.
    pub fn finalize(
        &self,
        mut resource: Resource,
        request: &FinalizeUpload,
    ) -> TaskResult<FinalizeReport> {
        let mut report = OperationReport::new();

        let mut upload = self.registry.upload_record(&request.import_id)?;
        upload.resource = Some(resource.id);
        self.registry.save_upload_record(&upload)?;

        let staged = self.run_stages(&mut resource, request, &mut report);

        if let Some(tempdir) = request.tempdir.as_deref() {
            report.isolate(Step::TempCleanup, remove_tempdir(tempdir));
        }
        upload.complete = true;
        let completed = self.registry.save_upload_record(&upload);

        let stages = staged?;
        completed?;

        tracing::info!(resource_id = %resource.id, import_id = %request.import_id, "upload finalized");
        self.feed.emit(Notification::UploadComplete {
            resource: resource.clone(),
        });

        Ok(FinalizeReport {
            resource: resource.id,
            catalog_resolved: stages.catalog_resolved,
            metadata_uploaded: stages.metadata_uploaded,
            style_task: stages.style_task,
            report,
        })
    }

    fn run_stages(
        &self,
        resource: &mut Resource,
        request: &FinalizeUpload,
        report: &mut OperationReport,
    ) -> TaskResult<Stages> {
        let mut stages = Stages::default();

        let sessions = self
            .registry
            .mark_sessions_processed(resource.id, false)
            .and_then(|_| self.registry.sessions_for(resource.id));
        if let Some(latest) = report
            .isolate(Step::SessionReset, sessions)
            .and_then(|sessions| sessions.first().map(|s| s.id))
        {
            resource.upload_session = Some(latest);
        }

        if let Some(path) = request.metadata_file.as_ref().and_then(MetadataFile::path) {
            let readable = fs::File::open(&path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e));
            if report.isolate(Step::MetadataFile, readable).is_some() {
                resource.metadata_uploaded = true;
                stages.metadata_uploaded = true;
            }
        }

        let resolved = report
            .isolate(Step::CatalogLookup, self.sync.resolve(resource))
            .flatten();
        if let Some(mut catalog_resource) = resolved {
            stages.catalog_resolved = true;
            let pushed = self.sync.push_title(resource, &mut catalog_resource);
            report.isolate(Step::CatalogTitle, pushed);

            resource.store_type = Some(catalog_resource.store.store_type.clone());
            if resource.alternate.as_deref().map_or(true, str::is_empty) {
                resource.alternate = Some(catalog_resource.qualified_name());
            }
        } else {
            tracing::debug!(resource_id = %resource.id, "catalog resource not found, skipping catalog sync");
        }

        let style_request = style_request(resource, request);
        let kind = style_request.kind();
        if report
            .isolate(Step::StyleDispatch, self.sink.dispatch(style_request))
            .is_some()
        {
            stages.style_task = Some(kind);
        }

        self.services.handle_moderated_upload(resource)?;
        if let Some(permissions) = &request.permissions {
            tracing::debug!(resource_id = %resource.id, "applying permissions");
            self.services
                .apply_permissions(resource, permissions, request.created)?;
        }

        self.registry.save_resource(resource, !request.created)?;
        Ok(stages)
    }
}

/// Picks the style task for an upload.
///
/// A readable style file is snapshotted into the request so the task does
/// not depend on the temp directory, which is removed right after.
fn style_request(resource: &Resource, request: &FinalizeUpload) -> TaskRequest {
    let tempdir = request.tempdir.as_deref();
    let source = request.style_file.as_ref().map(|path| {
        let file = StyleSource::file(path.clone());
        match file.load(tempdir) {
            Ok(body) => StyleSource::Inline { body },
            Err(_) => file,
        }
    });

    match source {
        Some(source) if request.style_uploaded => TaskRequest::SetStyle(SetStyle {
            resource: resource.id,
            source,
        }),
        source => TaskRequest::CreateStyle(CreateStyle {
            resource: resource.id,
            name: resource.name.clone(),
            source,
            tempdir: request.tempdir.clone(),
        }),
    }
}

fn remove_tempdir(tempdir: &Path) -> std::io::Result<()> {
    if tempdir.exists() {
        tracing::debug!(path = %tempdir.display(), "removing upload temp directory");
        fs::remove_dir_all(tempdir)?;
    }
    Ok(())
}
