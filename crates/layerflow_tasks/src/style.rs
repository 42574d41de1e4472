//! Style Manager: makes sure a layer has a default rendering style.

use layerflow_core::{Resource, Settings, StoreType};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::{split_qualified, Catalog, StyleRef};
use crate::error::TaskResult;
use crate::report::{Step, StyleReport};
use crate::services::ResourceServices;

/// Where a style definition comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleSource {
    /// A style file on disk.
    File {
        /// Path, absolute or relative to the upload temp directory.
        path: PathBuf,
    },
    /// A style definition read ahead of time.
    Inline {
        /// Style body.
        body: String,
    },
}

impl StyleSource {
    /// A file source.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    /// Reads the definition, looking up relative files under `tempdir`.
    pub fn load(&self, tempdir: Option<&Path>) -> io::Result<String> {
        match self {
            StyleSource::Inline { body } => Ok(body.clone()),
            StyleSource::File { path } => {
                let resolved = resolve_style_file(path, tempdir).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("style file {} not found", path.display()),
                    )
                })?;
                fs::read_to_string(resolved)
            }
        }
    }
}

/// Finds a style file either at `file` or relative to the upload temp directory.
pub fn resolve_style_file(file: &Path, tempdir: Option<&Path>) -> Option<PathBuf> {
    if file.is_file() {
        return Some(file.to_path_buf());
    }
    let candidate = tempdir?.join(file);
    candidate.is_file().then_some(candidate)
}

/// A minimal style definition for a layer with no uploaded style.
pub fn default_style_body(name: &str, store_type: Option<&StoreType>) -> String {
    let symbolizers = if store_type.is_some_and(StoreType::is_raster) {
        "<sld:RasterSymbolizer><sld:Opacity>1.0</sld:Opacity></sld:RasterSymbolizer>"
    } else {
        concat!(
            "<sld:PolygonSymbolizer><sld:Fill><sld:CssParameter name=\"fill\">#AAAAAA</sld:CssParameter></sld:Fill></sld:PolygonSymbolizer>",
            "<sld:LineSymbolizer><sld:Stroke><sld:CssParameter name=\"stroke\">#000000</sld:CssParameter></sld:Stroke></sld:LineSymbolizer>",
            "<sld:PointSymbolizer><sld:Graphic><sld:Mark><sld:WellKnownName>square</sld:WellKnownName></sld:Mark></sld:Graphic></sld:PointSymbolizer>",
        )
    };
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<sld:StyledLayerDescriptor xmlns:sld=\"http://www.opengis.net/sld\" version=\"1.0.0\">",
            "<sld:NamedLayer><sld:Name>{name}</sld:Name><sld:UserStyle><sld:Name>{name}</sld:Name>",
            "<sld:FeatureTypeStyle><sld:Rule>{symbolizers}</sld:Rule></sld:FeatureTypeStyle>",
            "</sld:UserStyle></sld:NamedLayer></sld:StyledLayerDescriptor>"
        ),
        name = name,
        symbolizers = symbolizers
    )
}

/// Creates, assigns and cleans up catalog styles.
pub struct StyleManager {
    catalog: Arc<dyn Catalog>,
    services: Arc<dyn ResourceServices>,
    settings: Settings,
}

impl StyleManager {
    /// Creates a style manager.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        services: Arc<dyn ResourceServices>,
        settings: Settings,
    ) -> Self {
        Self {
            catalog,
            services,
            settings,
        }
    }

    /// Gives `resource` the style `name`, uploaded from `source` when readable,
    /// derived from the resource otherwise.
    pub fn ensure_style(
        &self,
        resource: &Resource,
        name: &str,
        source: Option<&StyleSource>,
    ) -> TaskResult<StyleReport> {
        let mut report = StyleReport::default();
        match source.and_then(|source| self.read_style(source, None, &mut report)) {
            Some(body) => self.upload_style(resource, name, &body, false, report),
            None => self.derive_style(resource, name, report),
        }
    }

    /// Applies an uploaded style to the resource's layer.
    ///
    /// An unreadable file is reported and otherwise ignored.
    pub fn set_style(&self, resource: &Resource, source: &StyleSource) -> TaskResult<StyleReport> {
        let mut report = StyleReport::default();
        let Some(body) = self.read_style(source, None, &mut report) else {
            return Ok(report);
        };
        let layer = self.layer_name(resource);
        let (_, name) = split_qualified(&layer);
        self.upload_style(resource, name, &body, false, report)
    }

    /// Creates the style `name` from an upload session's style file.
    ///
    /// Relative files are looked up under `tempdir`. The style is only
    /// created if the default workspace does not have it yet. Without a
    /// usable file a default style is derived.
    pub fn create_style(
        &self,
        resource: &Resource,
        name: &str,
        source: Option<&StyleSource>,
        tempdir: Option<&Path>,
    ) -> TaskResult<StyleReport> {
        let mut report = StyleReport::default();
        match source.and_then(|source| self.read_style(source, tempdir, &mut report)) {
            Some(body) => self.upload_style(resource, name, &body, true, report),
            None => self.derive_style(resource, name, report),
        }
    }

    fn layer_name(&self, resource: &Resource) -> String {
        resource
            .alternate_or_typename()
            .unwrap_or(&resource.name)
            .to_string()
    }

    fn read_style(
        &self,
        source: &StyleSource,
        tempdir: Option<&Path>,
        report: &mut StyleReport,
    ) -> Option<String> {
        report.report.isolate(Step::StyleFile, source.load(tempdir))
    }

    fn upload_style(
        &self,
        resource: &Resource,
        name: &str,
        body: &str,
        create_only: bool,
        mut report: StyleReport,
    ) -> TaskResult<StyleReport> {
        let workspace = self.settings.default_workspace.as_str();
        if create_only && self.catalog.get_style(name, Some(workspace))?.is_some() {
            tracing::debug!(resource_id = %resource.id, style = name, "style already exists");
            return Ok(report);
        }

        let style = self.catalog.create_style(name, body, Some(workspace), true)?;
        let new_ref = style.style_ref();

        let mut layer = self.catalog.get_layer(&self.layer_name(resource))?;
        let previous = layer.default_style.replace(new_ref.clone());
        layer.styles.retain(|s| s != &new_ref);
        self.catalog.save_layer(&layer)?;
        report.default_style = Some(new_ref.qualified_name());
        tracing::info!(resource_id = %resource.id, style = %new_ref.qualified_name(), "default style set");

        report
            .report
            .isolate(Step::Legends, self.services.refresh_legends(resource));

        if let Some(previous) = previous.filter(|p| p != &new_ref) {
            if self.delete_superseded(&previous, &mut report) {
                report.removed_style = Some(previous.qualified_name());
            }
        }
        Ok(report)
    }

    fn delete_superseded(&self, previous: &StyleRef, report: &mut StyleReport) -> bool {
        let deleted = self
            .catalog
            .delete_style(&previous.name, previous.workspace.as_deref());
        report.report.isolate(Step::StyleCleanup, deleted).is_some()
    }

    fn derive_style(
        &self,
        resource: &Resource,
        name: &str,
        mut report: StyleReport,
    ) -> TaskResult<StyleReport> {
        report.derived = true;
        let mut layer = self.catalog.get_layer(&self.layer_name(resource))?;
        if let Some(existing) = &layer.default_style {
            report.default_style = Some(existing.qualified_name());
            return Ok(report);
        }

        let workspace = self.settings.default_workspace.as_str();
        let body = default_style_body(name, resource.store_type.as_ref());
        let style = self.catalog.create_style(name, &body, Some(workspace), true)?;
        layer.default_style = Some(style.style_ref());
        self.catalog.save_layer(&layer)?;
        report.default_style = Some(style.style_ref().qualified_name());
        tracing::info!(resource_id = %resource.id, style = name, "derived default style");

        report
            .report
            .isolate(Step::Legends, self.services.refresh_legends(resource));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogResource, CatalogStore, MemoryCatalog, Style};
    use crate::error::TaskError;
    use crate::services::{RecordingServices, ServiceStep};
    use layerflow_core::ResourceId;
    use std::io::Write;

    struct Fixture {
        catalog: Arc<MemoryCatalog>,
        services: Arc<RecordingServices>,
        styles: StyleManager,
        resource: Resource,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        let services = Arc::new(RecordingServices::new());
        catalog.add_resource(CatalogResource::new(
            "roads",
            CatalogStore {
                name: "roads".into(),
                workspace: "geonode".into(),
                store_type: StoreType::DataStore,
            },
        ));
        let styles = StyleManager::new(
            Arc::clone(&catalog) as Arc<dyn Catalog>,
            Arc::clone(&services) as Arc<dyn ResourceServices>,
            Settings::new(),
        );
        let mut resource = Resource::new(ResourceId::new(1), "roads");
        resource.alternate = Some("geonode:roads".into());
        Fixture {
            catalog,
            services,
            styles,
            resource,
        }
    }

    fn style_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn source(file: &tempfile::NamedTempFile) -> StyleSource {
        StyleSource::file(file.path())
    }

    fn set_default(catalog: &MemoryCatalog, name: &str) {
        catalog.add_style(Style {
            name: name.into(),
            workspace: None,
            body: "<old/>".into(),
        });
        let mut layer = catalog.get_layer("geonode:roads").unwrap();
        layer.default_style = Some(StyleRef::new(name, None));
        catalog.save_layer(&layer).unwrap();
    }

    #[test]
    fn derives_style_when_layer_has_none() {
        let f = fixture();
        let report = f.styles.ensure_style(&f.resource, "roads", None).unwrap();

        assert!(report.derived);
        assert_eq!(report.default_style.as_deref(), Some("geonode:roads"));
        let layer = f.catalog.peek_layer("geonode:roads").unwrap();
        assert_eq!(layer.default_style, Some(StyleRef::new("roads", Some("geonode"))));
        assert_eq!(f.services.count(ServiceStep::Legends), 1);
    }

    #[test]
    fn derived_style_keeps_existing_default() {
        let f = fixture();
        set_default(&f.catalog, "generic");

        let report = f.styles.ensure_style(&f.resource, "roads", None).unwrap();
        assert_eq!(report.default_style.as_deref(), Some("generic"));
        assert_eq!(f.catalog.call_count("create_style"), 0);
    }

    #[test]
    fn uploaded_style_replaces_default() {
        let f = fixture();
        set_default(&f.catalog, "generic");
        let file = style_file("<sld>roads</sld>");

        let report = f.styles.set_style(&f.resource, &source(&file)).unwrap();

        assert_eq!(report.default_style.as_deref(), Some("geonode:roads"));
        assert_eq!(report.removed_style.as_deref(), Some("generic"));
        assert!(!f.catalog.style_names().contains(&"generic".to_string()));
        // No observer ever saw the layer without a default.
        assert!(f
            .catalog
            .default_style_history("geonode:roads")
            .iter()
            .all(Option::is_some));
    }

    #[test]
    fn unreadable_style_file_is_reported() {
        let f = fixture();
        let report = f
            .styles
            .set_style(&f.resource, &StyleSource::file("/nonexistent/roads.sld"))
            .unwrap();

        assert!(report.report.has_warning(Step::StyleFile));
        assert_eq!(report.default_style, None);
        assert_eq!(f.catalog.call_count("create_style"), 0);
    }

    #[test]
    fn failed_cleanup_is_not_fatal() {
        let f = fixture();
        set_default(&f.catalog, "generic");
        // Another layer still uses the old style.
        f.catalog.add_resource(CatalogResource::new(
            "rivers",
            CatalogStore {
                name: "rivers".into(),
                workspace: "geonode".into(),
                store_type: StoreType::DataStore,
            },
        ));
        let mut rivers = f.catalog.get_layer("geonode:rivers").unwrap();
        rivers.default_style = Some(StyleRef::new("generic", None));
        f.catalog.save_layer(&rivers).unwrap();

        let file = style_file("<sld/>");
        let report = f.styles.set_style(&f.resource, &source(&file)).unwrap();

        assert_eq!(report.default_style.as_deref(), Some("geonode:roads"));
        assert_eq!(report.removed_style, None);
        assert!(report.report.has_warning(Step::StyleCleanup));
    }

    #[test]
    fn create_style_resolves_file_in_tempdir() {
        let f = fixture();
        let tempdir = tempfile::tempdir().unwrap();
        fs::write(tempdir.path().join("roads.sld"), "<sld/>").unwrap();

        let report = f
            .styles
            .create_style(
                &f.resource,
                "roads",
                Some(&StyleSource::file("roads.sld")),
                Some(tempdir.path()),
            )
            .unwrap();

        assert!(!report.derived);
        assert_eq!(report.default_style.as_deref(), Some("geonode:roads"));
    }

    #[test]
    fn create_style_leaves_existing_style_alone() {
        let f = fixture();
        f.catalog
            .create_style("roads", "<existing/>", Some("geonode"), false)
            .unwrap();
        let file = style_file("<new/>");

        let report = f
            .styles
            .create_style(&f.resource, "roads", Some(&source(&file)), None)
            .unwrap();

        assert_eq!(report.default_style, None);
        assert_eq!(f.catalog.call_count("create_style"), 1);
    }

    #[test]
    fn catalog_outage_propagates() {
        let f = fixture();
        f.catalog.set_available(false);
        let err = f.styles.ensure_style(&f.resource, "roads", None).unwrap_err();
        assert!(matches!(err, TaskError::Catalog(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn inline_source_needs_no_file() {
        let f = fixture();
        let inline = StyleSource::Inline {
            body: "<sld/>".into(),
        };
        let report = f
            .styles
            .ensure_style(&f.resource, "roads", Some(&inline))
            .unwrap();
        assert!(!report.derived);
        assert_eq!(report.default_style.as_deref(), Some("geonode:roads"));
    }

    #[test]
    fn style_source_json() {
        let source: StyleSource =
            serde_json::from_str(r#"{"file": {"path": "/tmp/roads.sld"}}"#).unwrap();
        assert_eq!(source, StyleSource::file("/tmp/roads.sld"));
    }

    #[test]
    fn raster_template() {
        let body = default_style_body("dem", Some(&StoreType::CoverageStore));
        assert!(body.contains("RasterSymbolizer"));
        assert!(body.contains("<sld:Name>dem</sld:Name>"));
        assert!(!default_style_body("roads", None).contains("RasterSymbolizer"));
    }
}
