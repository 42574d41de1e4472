//! Cascading Deleter: removes a resource and every catalog artifact it owns.
//!
//! The registry record goes first, so the registry never points at catalog
//! entities that are already gone. Catalog cleanup failures propagate and the
//! task is retried; artifacts that are already gone count as deleted.

use layerflow_core::{Registry, Resource, ResourceId, Settings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog::{Catalog, StyleRef};
use crate::error::{CatalogError, CatalogResult, TaskResult};
use crate::report::DeleteReport;
use crate::services::ResourceServices;

/// What to delete. Captured when the delete is requested, so retries still
/// know the catalog names after the registry record is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTarget {
    /// Registry resource.
    pub resource: ResourceId,
    /// Resource name.
    pub name: String,
    /// Catalog workspace.
    #[serde(default)]
    pub workspace: Option<String>,
    /// Catalog store.
    #[serde(default)]
    pub store: Option<String>,
    /// Qualified layer name.
    #[serde(default)]
    pub alternate: Option<String>,
}

impl DeleteTarget {
    /// Captures the catalog names of `resource`.
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            resource: resource.id,
            name: resource.name.clone(),
            workspace: resource.workspace.clone(),
            store: resource.store.clone(),
            alternate: resource.alternate.clone().filter(|a| !a.is_empty()),
        }
    }
}

/// Deletes resources together with their catalog artifacts.
pub struct CascadingDeleter {
    registry: Arc<dyn Registry>,
    catalog: Arc<dyn Catalog>,
    services: Arc<dyn ResourceServices>,
    settings: Settings,
}

impl CascadingDeleter {
    /// Creates a deleter.
    pub fn new(
        registry: Arc<dyn Registry>,
        catalog: Arc<dyn Catalog>,
        services: Arc<dyn ResourceServices>,
        settings: Settings,
    ) -> Self {
        Self {
            registry,
            catalog,
            services,
            settings,
        }
    }

    /// Deletes `target` from the registry and the catalog.
    pub fn delete(&self, target: &DeleteTarget) -> TaskResult<DeleteReport> {
        let mut report = DeleteReport {
            resource: target.resource,
            removed: Vec::new(),
            already_absent: Vec::new(),
            kept: Vec::new(),
        };

        let record = format!("record {}", target.resource);
        if self.registry.delete_resource(target.resource)? {
            report.removed.push(record);
        } else {
            report.already_absent.push(record);
        }

        let workspace = target
            .workspace
            .clone()
            .unwrap_or_else(|| self.settings.default_workspace.clone());
        let layer_name = target
            .alternate
            .clone()
            .unwrap_or_else(|| format!("{}:{}", workspace, target.name));

        let mut styles = match self.catalog.get_layer(&layer_name) {
            Ok(layer) => layer
                .default_style
                .into_iter()
                .chain(layer.styles)
                .collect::<Vec<_>>(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let own_style = StyleRef::new(target.name.clone(), Some(&workspace));
        if !styles.contains(&own_style) {
            styles.push(own_style);
        }

        absorb(
            format!("layer {}", layer_name),
            self.catalog.delete_layer(&layer_name),
            &mut report,
        )?;

        let store = match &target.store {
            Some(store) => Some(store.clone()),
            None => match self
                .catalog
                .get_resource(&target.name, None, Some(&workspace))
            {
                Ok(found) => Some(found.store.name),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            },
        };
        if let Some(store) = store {
            absorb(
                format!("resource {}:{}", workspace, target.name),
                self.catalog.delete_resource(&target.name, &store, &workspace),
                &mut report,
            )?;
            absorb(
                format!("store {}:{}", workspace, store),
                self.catalog.delete_store(&store, &workspace),
                &mut report,
            )?;
        }

        // Global styles are shared built-ins.
        for style in styles.iter().filter(|s| s.workspace.is_some()) {
            absorb(
                format!("style {}", style.qualified_name()),
                self.catalog
                    .delete_style(&style.name, style.workspace.as_deref()),
                &mut report,
            )?;
        }

        self.services.purge_tile_cache(&layer_name)?;
        report.removed.push(format!("tiles {}", layer_name));

        tracing::info!(
            resource_id = %target.resource,
            removed = report.removed.len(),
            kept = report.kept.len(),
            "cascading delete finished"
        );
        Ok(report)
    }
}

fn absorb(artifact: String, result: CatalogResult<()>, report: &mut DeleteReport) -> TaskResult<()> {
    match result {
        Ok(()) => report.removed.push(artifact),
        Err(e) if e.is_not_found() => report.already_absent.push(artifact),
        Err(CatalogError::InUse { reason, .. }) => {
            tracing::debug!(%artifact, %reason, "keeping shared artifact");
            report.kept.push(artifact);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_classifies_results() {
        let mut report = DeleteReport {
            resource: ResourceId::new(1),
            removed: Vec::new(),
            already_absent: Vec::new(),
            kept: Vec::new(),
        };

        absorb("a".into(), Ok(()), &mut report).unwrap();
        absorb("b".into(), Err(CatalogError::not_found("style", "b")), &mut report).unwrap();
        absorb(
            "c".into(),
            Err(CatalogError::InUse {
                kind: "store",
                name: "c".into(),
                reason: "shared".into(),
            }),
            &mut report,
        )
        .unwrap();
        assert!(absorb(
            "d".into(),
            Err(CatalogError::Unavailable("down".into())),
            &mut report
        )
        .is_err());

        assert_eq!(report.removed, vec!["a"]);
        assert_eq!(report.already_absent, vec!["b"]);
        assert_eq!(report.kept, vec!["c"]);
    }

    #[test]
    fn target_from_resource() {
        let mut resource = Resource::new(ResourceId::new(5), "roads");
        resource.alternate = Some(String::new());
        resource.store = Some("roads".into());

        let target = DeleteTarget::from_resource(&resource);
        assert_eq!(target.alternate, None);
        assert_eq!(target.store.as_deref(), Some("roads"));

        let json = serde_json::to_string(&target).unwrap();
        let back: DeleteTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);
    }
}
