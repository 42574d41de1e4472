//! Test fixtures.
//!
//! [`TestEnv`] wires every task component to in-memory doubles that tests can
//! inspect and script failures on.

use layerflow_core::{
    BoundingBox, ImportId, MemoryRegistry, NotificationFeed, Registry, Resource, ResourceId,
    Settings, StoreType, UploadRecord,
};
use layerflow_tasks::{
    CascadingDeleter, CatalogResource, CatalogStore, CatalogSynchronizer, Components, Invocation,
    MemoryCatalog, MemoryLockBackend, PostSaveReconciler, RecordingServices, RecordingSink,
    RetryConfig, StyleManager, TaskOutcome, TaskReport, TaskRequest, TaskResult, TaskRunner,
    UploadFinalizer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Extent used for seeded resources.
pub const SAMPLE_BBOX: BoundingBox = BoundingBox::new(-10.0, 40.0, 5.0, 52.0);

/// Retries allowed by the environment's runner.
pub const TEST_MAX_RETRIES: u32 = 3;

/// Installs a test log subscriber filtered by `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory environment with automatic cleanup.
pub struct TestEnv {
    /// Local registry.
    pub registry: Arc<MemoryRegistry>,
    /// Catalog.
    pub catalog: Arc<MemoryCatalog>,
    /// External services.
    pub services: Arc<RecordingServices>,
    /// Lock storage.
    pub locks: Arc<MemoryLockBackend>,
    /// Follow-up tasks dispatched by the components.
    pub sink: Arc<RecordingSink>,
    /// Notification feed.
    pub feed: Arc<NotificationFeed>,
    /// Settings the components are built with.
    pub settings: Settings,
    temp_dir: TempDir,
}

impl TestEnv {
    /// Creates an environment with default settings.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Creates an environment with `settings`.
    pub fn with_settings(settings: Settings) -> Self {
        init_tracing();
        Self {
            registry: Arc::new(MemoryRegistry::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            services: Arc::new(RecordingServices::new()),
            locks: Arc::new(MemoryLockBackend::new()),
            sink: Arc::new(RecordingSink::new()),
            feed: Arc::new(NotificationFeed::new()),
            settings,
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Components for building a runner.
    pub fn components(&self) -> Components {
        Components {
            registry: self.registry.clone(),
            catalog: self.catalog.clone(),
            services: self.services.clone(),
            locks: self.locks.clone(),
            sink: self.sink.clone(),
            feed: Arc::clone(&self.feed),
        }
    }

    /// A runner that retries immediately.
    pub fn runner(&self) -> TaskRunner {
        TaskRunner::new(self.components(), self.settings.clone())
            .with_retry(RetryConfig::immediate(TEST_MAX_RETRIES))
    }

    /// Executes `request` as a fresh invocation.
    pub fn execute(&self, request: &TaskRequest) -> TaskResult<TaskOutcome<TaskReport>> {
        self.runner().execute(request, &Invocation::new())
    }

    /// A catalog synchronizer.
    pub fn sync(&self) -> Arc<CatalogSynchronizer> {
        Arc::new(CatalogSynchronizer::new(
            self.catalog.clone(),
            self.services.clone(),
            self.settings.clone(),
        ))
    }

    /// A style manager.
    pub fn styles(&self) -> StyleManager {
        StyleManager::new(
            self.catalog.clone(),
            self.services.clone(),
            self.settings.clone(),
        )
    }

    /// An upload finalizer.
    pub fn finalizer(&self) -> UploadFinalizer {
        UploadFinalizer::new(
            self.registry.clone(),
            self.sync(),
            self.services.clone(),
            self.sink.clone(),
            Arc::clone(&self.feed),
        )
    }

    /// A post-save reconciler.
    pub fn reconciler(&self) -> PostSaveReconciler {
        PostSaveReconciler::new(
            self.registry.clone(),
            self.sync(),
            self.services.clone(),
            Arc::clone(&self.feed),
            self.settings.clone(),
        )
    }

    /// A cascading deleter.
    pub fn deleter(&self) -> CascadingDeleter {
        CascadingDeleter::new(
            self.registry.clone(),
            self.catalog.clone(),
            self.services.clone(),
            self.settings.clone(),
        )
    }

    /// Root of the environment's temp directory.
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Creates an upload working directory containing `files`.
    pub fn upload_dir(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&dir).expect("Failed to create upload directory");
        for (file, contents) in files {
            std::fs::write(dir.join(file), contents).expect("Failed to write upload file");
        }
        dir
    }

    /// Reloads a resource from the registry.
    pub fn resource(&self, id: ResourceId) -> Resource {
        self.registry.resource(id).expect("Resource not found")
    }

    /// Inserts a resource and returns it as stored.
    pub fn insert(&self, resource: Resource) -> Resource {
        let id = self
            .registry
            .insert_resource(resource)
            .expect("Failed to insert resource");
        self.resource(id)
    }

    /// Overwrites a stored resource without notifying listeners.
    pub fn save(&self, resource: &Resource) {
        self.registry
            .save_resource(resource, false)
            .expect("Failed to save resource");
    }

    /// A vector resource published in the default workspace, with a matching
    /// catalog resource in EPSG:4326.
    pub fn vector_resource(&self, name: &str) -> Resource {
        let workspace = self.settings.default_workspace.clone();
        let mut resource = Resource::new(ResourceId::new(0), name);
        resource.title = format!("{} title", name);
        resource.owner = "admin".into();
        resource.store = Some(name.to_string());
        resource.workspace = Some(workspace.clone());
        resource.store_type = Some(StoreType::DataStore);
        resource.srid = Some("EPSG:4326".into());
        resource.bbox = Some(SAMPLE_BBOX);
        let resource = self.insert(resource);

        let mut remote = CatalogResource::new(name, store(&workspace, name, StoreType::DataStore));
        remote.projection = Some("EPSG:4326".into());
        remote.native_bbox = Some(SAMPLE_BBOX.to_catalog_order());
        self.catalog.add_resource(remote);
        resource
    }

    /// A resource that has an uploaded data file but is not in the catalog yet.
    pub fn unpublished_resource(&self, name: &str, file: &str) -> Resource {
        let mut resource = Resource::new(ResourceId::new(0), name);
        resource.owner = "admin".into();
        resource.bbox = Some(SAMPLE_BBOX);
        resource.srid = Some("EPSG:4326".into());
        let resource = self.insert(resource);
        self.services
            .set_base_file(resource.id, self.temp_dir.path().join(file));
        resource
    }

    /// Starts an upload for `resource`: an upload record and one session.
    pub fn start_upload(&self, resource: &Resource, import_id: &str) -> ImportId {
        let import_id = ImportId::new(import_id);
        self.registry
            .insert_upload_record(UploadRecord::new(import_id.clone()))
            .expect("Failed to insert upload record");
        self.registry
            .insert_session(resource.id)
            .expect("Failed to insert session");
        import_id
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A catalog store.
pub fn store(workspace: &str, name: &str, store_type: StoreType) -> CatalogStore {
    CatalogStore {
        name: name.to_string(),
        workspace: workspace.to_string(),
        store_type,
    }
}
