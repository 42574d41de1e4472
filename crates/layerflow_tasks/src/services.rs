//! External services the tasks drive but do not implement.

use layerflow_core::{Contact, Link, LinkKind, Resource, ResourceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use crate::catalog::CatalogResource;
use crate::error::{ServiceError, ServiceResult};

/// Identifies an external service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStep {
    /// Locating the uploaded data file.
    BaseFile,
    /// Resolving a user's profile URL.
    ProfileUrl,
    /// Refreshing the metadata catalogue record.
    CatalogueRecord,
    /// Regenerating default download/OGC links.
    DefaultLinks,
    /// Refreshing the attribute list from the catalog schema.
    Attributes,
    /// Refreshing style legends.
    Legends,
    /// Setting tile cache style filter parameters.
    TileCacheStyles,
    /// Truncating cached tiles.
    TileCacheInvalidate,
    /// Removing the tile cache layer.
    TileCachePurge,
    /// Inspecting the current thumbnail.
    ThumbnailCheck,
    /// Running the moderation workflow.
    Moderation,
    /// Applying permissions.
    Permissions,
    /// Rebuilding the search index.
    SearchIndex,
    /// Rendering a thumbnail.
    Thumbnail,
    /// Importing layers from the catalog.
    ImportLayers,
}

impl ServiceStep {
    /// Short name of the step.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStep::BaseFile => "base file",
            ServiceStep::ProfileUrl => "profile url",
            ServiceStep::CatalogueRecord => "catalogue record",
            ServiceStep::DefaultLinks => "default links",
            ServiceStep::Attributes => "attributes",
            ServiceStep::Legends => "legends",
            ServiceStep::TileCacheStyles => "tile cache styles",
            ServiceStep::TileCacheInvalidate => "tile cache invalidation",
            ServiceStep::TileCachePurge => "tile cache purge",
            ServiceStep::ThumbnailCheck => "thumbnail check",
            ServiceStep::Moderation => "moderation",
            ServiceStep::Permissions => "permissions",
            ServiceStep::SearchIndex => "search index",
            ServiceStep::Thumbnail => "thumbnail",
            ServiceStep::ImportLayers => "layer import",
        }
    }
}

impl fmt::Display for ServiceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a bulk import of catalog layers into the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportLayersRequest {
    /// Only import from this workspace.
    pub workspace: Option<String>,
    /// Only import from this store.
    pub store: Option<String>,
    /// Only import layers whose name contains this string.
    pub filter: Option<String>,
    /// Owner of imported resources.
    pub owner: Option<String>,
    /// Keep going after a layer fails to import.
    pub ignore_errors: bool,
    /// Skip layers that are not advertised.
    pub skip_unadvertised: bool,
    /// Delete registry resources whose layer is gone from the catalog.
    pub remove_deleted: bool,
}

/// Out-of-scope collaborators invoked by the tasks.
pub trait ResourceServices: Send + Sync {
    /// Locates the uploaded data file of a resource, if any.
    fn base_file(&self, resource: &Resource) -> ServiceResult<Option<PathBuf>>;

    /// Absolute path of a user's profile page, e.g. `/people/profile/alice/`.
    fn profile_url(&self, contact: &Contact) -> ServiceResult<String>;

    /// Refreshes the resource's metadata catalogue record.
    fn refresh_catalogue_record(&self, resource: &Resource) -> ServiceResult<()>;

    /// Regenerates the default links, removing stale ones when `prune` is set.
    fn regenerate_default_links(&self, resource: &Resource, prune: bool)
        -> ServiceResult<Vec<Link>>;

    /// Refreshes the attribute list from the catalog schema. Returns the attribute count.
    fn refresh_attributes(
        &self,
        resource: &Resource,
        catalog_resource: &CatalogResource,
    ) -> ServiceResult<usize>;

    /// Refreshes the style and legend links of a resource.
    fn refresh_legends(&self, resource: &Resource) -> ServiceResult<()>;

    /// Sets the tile cache's style filter parameters for a layer.
    fn update_tile_cache_styles(&self, layer: &str, styles: &[String]) -> ServiceResult<()>;

    /// Truncates cached tiles for a layer.
    fn invalidate_tile_cache(&self, layer: &str) -> ServiceResult<()>;

    /// Removes a layer from the tile cache entirely.
    fn purge_tile_cache(&self, layer: &str) -> ServiceResult<()>;

    /// Returns true if the image behind `url` is a single flat color.
    fn is_monochromatic_thumbnail(&self, url: &str) -> ServiceResult<bool>;

    /// Runs the moderation workflow for a new upload.
    fn handle_moderated_upload(&self, resource: &Resource) -> ServiceResult<()>;

    /// Applies permissions to a resource.
    fn apply_permissions(
        &self,
        resource: &Resource,
        permissions: &serde_json::Value,
        created: bool,
    ) -> ServiceResult<()>;

    /// Rebuilds the full search index.
    fn rebuild_search_index(&self) -> ServiceResult<()>;

    /// Renders a thumbnail and returns its URL.
    fn create_thumbnail(&self, resource: &Resource, overwrite: bool, check_bbox: bool)
        -> ServiceResult<String>;

    /// Imports catalog layers into the registry. Returns the number imported.
    fn import_catalog_layers(&self, request: &ImportLayersRequest) -> ServiceResult<usize>;
}

/// One recorded service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    /// The step called.
    pub step: ServiceStep,
    /// The resource involved, if any.
    pub resource: Option<ResourceId>,
    /// Free-form detail (layer name, URL, ...).
    pub detail: String,
}

#[derive(Default)]
struct Script {
    failures: HashMap<ServiceStep, Option<u32>>,
    base_files: HashMap<ResourceId, PathBuf>,
    monochromatic: HashSet<String>,
    deny_permissions: bool,
    imported_layers: usize,
}

/// Service double that records every call and fails on request.
#[derive(Default)]
pub struct RecordingServices {
    calls: Mutex<Vec<ServiceCall>>,
    script: Mutex<Script>,
}

impl RecordingServices {
    /// Creates a recorder where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `step` fail.
    pub fn fail(&self, step: ServiceStep) {
        self.script.lock().failures.insert(step, None);
    }

    /// Makes the next `times` calls to `step` fail.
    pub fn fail_times(&self, step: ServiceStep, times: u32) {
        self.script.lock().failures.insert(step, Some(times));
    }

    /// Stops injecting failures.
    pub fn clear_failures(&self) {
        self.script.lock().failures.clear();
    }

    /// Registers the uploaded file of a resource.
    pub fn set_base_file(&self, resource: ResourceId, path: impl Into<PathBuf>) {
        self.script.lock().base_files.insert(resource, path.into());
    }

    /// Marks a thumbnail URL as monochromatic.
    pub fn mark_monochromatic(&self, url: impl Into<String>) {
        self.script.lock().monochromatic.insert(url.into());
    }

    /// Makes permission application fail with `PermissionDenied`.
    pub fn deny_permissions(&self) {
        self.script.lock().deny_permissions = true;
    }

    /// Sets how many layers a bulk import reports.
    pub fn set_imported_layers(&self, count: usize) {
        self.script.lock().imported_layers = count;
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls to `step`, failed ones included.
    pub fn count(&self, step: ServiceStep) -> usize {
        self.calls.lock().iter().filter(|c| c.step == step).count()
    }

    /// Details of the recorded calls to `step`, in order.
    pub fn details(&self, step: ServiceStep) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.step == step)
            .map(|c| c.detail.clone())
            .collect()
    }

    fn record(
        &self,
        step: ServiceStep,
        resource: Option<ResourceId>,
        detail: impl Into<String>,
    ) -> ServiceResult<()> {
        self.calls.lock().push(ServiceCall {
            step,
            resource,
            detail: detail.into(),
        });

        let mut script = self.script.lock();
        let fail = match script.failures.get_mut(&step) {
            Some(None) => true,
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if fail {
            Err(ServiceError::failed(step, "injected failure"))
        } else {
            Ok(())
        }
    }
}

impl ResourceServices for RecordingServices {
    fn base_file(&self, resource: &Resource) -> ServiceResult<Option<PathBuf>> {
        self.record(ServiceStep::BaseFile, Some(resource.id), &resource.name)?;
        Ok(self.script.lock().base_files.get(&resource.id).cloned())
    }

    fn profile_url(&self, contact: &Contact) -> ServiceResult<String> {
        self.record(ServiceStep::ProfileUrl, None, &contact.username)?;
        Ok(format!("/people/profile/{}/", contact.username))
    }

    fn refresh_catalogue_record(&self, resource: &Resource) -> ServiceResult<()> {
        self.record(ServiceStep::CatalogueRecord, Some(resource.id), &resource.name)
    }

    fn regenerate_default_links(
        &self,
        resource: &Resource,
        prune: bool,
    ) -> ServiceResult<Vec<Link>> {
        let detail = format!("{} prune={}", resource.name, prune);
        self.record(ServiceStep::DefaultLinks, Some(resource.id), detail)?;
        let layer = resource.alternate_or_typename().unwrap_or(&resource.name);
        Ok(vec![Link {
            kind: LinkKind::Ogc,
            mime: "OGC:WMS".into(),
            name: format!("{} WMS", layer),
            url: format!("/ows?layers={}", layer),
        }])
    }

    fn refresh_attributes(
        &self,
        resource: &Resource,
        catalog_resource: &CatalogResource,
    ) -> ServiceResult<usize> {
        self.record(
            ServiceStep::Attributes,
            Some(resource.id),
            catalog_resource.qualified_name(),
        )?;
        Ok(0)
    }

    fn refresh_legends(&self, resource: &Resource) -> ServiceResult<()> {
        self.record(ServiceStep::Legends, Some(resource.id), &resource.name)
    }

    fn update_tile_cache_styles(&self, layer: &str, styles: &[String]) -> ServiceResult<()> {
        self.record(
            ServiceStep::TileCacheStyles,
            None,
            format!("{} [{}]", layer, styles.join(",")),
        )
    }

    fn invalidate_tile_cache(&self, layer: &str) -> ServiceResult<()> {
        self.record(ServiceStep::TileCacheInvalidate, None, layer)
    }

    fn purge_tile_cache(&self, layer: &str) -> ServiceResult<()> {
        self.record(ServiceStep::TileCachePurge, None, layer)
    }

    fn is_monochromatic_thumbnail(&self, url: &str) -> ServiceResult<bool> {
        self.record(ServiceStep::ThumbnailCheck, None, url)?;
        Ok(self.script.lock().monochromatic.contains(url))
    }

    fn handle_moderated_upload(&self, resource: &Resource) -> ServiceResult<()> {
        self.record(ServiceStep::Moderation, Some(resource.id), &resource.name)
    }

    fn apply_permissions(
        &self,
        resource: &Resource,
        permissions: &serde_json::Value,
        created: bool,
    ) -> ServiceResult<()> {
        let detail = format!("{} created={}", permissions, created);
        self.record(ServiceStep::Permissions, Some(resource.id), detail)?;
        if self.script.lock().deny_permissions {
            return Err(ServiceError::PermissionDenied(format!(
                "cannot set permissions on {}",
                resource.name
            )));
        }
        Ok(())
    }

    fn rebuild_search_index(&self) -> ServiceResult<()> {
        self.record(ServiceStep::SearchIndex, None, "")
    }

    fn create_thumbnail(
        &self,
        resource: &Resource,
        overwrite: bool,
        check_bbox: bool,
    ) -> ServiceResult<String> {
        let detail = format!("overwrite={} check_bbox={}", overwrite, check_bbox);
        self.record(ServiceStep::Thumbnail, Some(resource.id), detail)?;
        Ok(format!("/uploaded/thumbs/{}-thumb.png", resource.name))
    }

    fn import_catalog_layers(&self, request: &ImportLayersRequest) -> ServiceResult<usize> {
        let detail = request.workspace.clone().unwrap_or_default();
        self.record(ServiceStep::ImportLayers, None, detail)?;
        Ok(self.script.lock().imported_layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls() {
        let services = RecordingServices::new();
        let resource = Resource::new(ResourceId::new(1), "roads");

        services.refresh_legends(&resource).unwrap();
        services.invalidate_tile_cache("geonode:roads").unwrap();

        assert_eq!(services.count(ServiceStep::Legends), 1);
        assert_eq!(
            services.details(ServiceStep::TileCacheInvalidate),
            vec!["geonode:roads".to_string()]
        );
        assert_eq!(services.calls()[0].resource, Some(ResourceId::new(1)));
    }

    #[test]
    fn scripted_failures() {
        let services = RecordingServices::new();
        let resource = Resource::new(ResourceId::new(1), "roads");

        services.fail_times(ServiceStep::Thumbnail, 1);
        assert!(services.create_thumbnail(&resource, true, true).is_err());
        assert!(services.create_thumbnail(&resource, true, true).is_ok());

        services.fail(ServiceStep::Legends);
        assert!(services.refresh_legends(&resource).is_err());
        assert!(services.refresh_legends(&resource).is_err());
        services.clear_failures();
        assert!(services.refresh_legends(&resource).is_ok());
    }

    #[test]
    fn denied_permissions_are_not_retryable() {
        let services = RecordingServices::new();
        services.deny_permissions();
        let resource = Resource::new(ResourceId::new(1), "roads");

        let err = services
            .apply_permissions(&resource, &serde_json::json!({}), true)
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn import_request_from_json() {
        let request: ImportLayersRequest =
            serde_json::from_str(r#"{"workspace": "geonode", "skip_unadvertised": true}"#)
                .unwrap();
        assert_eq!(request.workspace.as_deref(), Some("geonode"));
        assert!(request.skip_unadvertised);
        assert!(!request.remove_deleted);
    }
}
