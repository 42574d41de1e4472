//! Post-Save Reconciler.
//!
//! Runs after every save of a resource. It makes sure the resource is
//! published, finds its catalog counterpart, mirrors metadata both ways and
//! refreshes everything derived from the catalog. Enrichment steps fail on
//! their own; only catalog outages, registry failures and an unresolvable
//! projection fail the pass.

use layerflow_core::{
    srid_code_or_default, srid_url, BoundingBox, CoreError, Notification, NotificationFeed,
    Registry, Resource, ResourceUpdate, Settings, DEFAULT_SRID, DEFAULT_SRID_CODE,
};
use std::sync::Arc;

use crate::catalog::CatalogResource;
use crate::error::{TaskError, TaskResult};
use crate::report::{ReconcileOutcome, ReconcileReport, SkipReason, Step};
use crate::services::ResourceServices;
use crate::sync::{CatalogSynchronizer, CatalogValues};

/// Reads the declared projection and native extent of a catalog resource.
fn catalog_geometry(resource: &CatalogResource) -> Result<(String, BoundingBox), String> {
    let projection = resource
        .projection
        .clone()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| format!("{} declares no projection", resource.qualified_name()))?;
    let bbox = resource
        .native_bbox
        .map(BoundingBox::from_catalog_order)
        .filter(BoundingBox::is_finite)
        .ok_or_else(|| format!("{} has no usable native extent", resource.qualified_name()))?;
    Ok((projection, bbox))
}

/// Re-derives catalog linkage and metadata after a resource was saved.
pub struct PostSaveReconciler {
    registry: Arc<dyn Registry>,
    sync: Arc<CatalogSynchronizer>,
    services: Arc<dyn ResourceServices>,
    feed: Arc<NotificationFeed>,
    settings: Settings,
}

impl PostSaveReconciler {
    /// Creates a reconciler.
    pub fn new(
        registry: Arc<dyn Registry>,
        sync: Arc<CatalogSynchronizer>,
        services: Arc<dyn ResourceServices>,
        feed: Arc<NotificationFeed>,
        settings: Settings,
    ) -> Self {
        Self {
            registry,
            sync,
            services,
            feed,
            settings,
        }
    }

    /// Reconciles `resource` with the catalog.
    ///
    /// The resource is flagged dirty for the duration of the pass; the flag
    /// is cleared and its sessions marked processed however the pass ends.
    pub fn reconcile(&self, resource: Resource) -> TaskResult<ReconcileReport> {
        let mut report = ReconcileReport::new(resource.id);

        let skip = if resource.remote_service.is_some() {
            Some(SkipReason::RemoteService)
        } else if resource.skips_catalog_sync() {
            Some(SkipReason::ExternalStore)
        } else {
            None
        };
        if let Some(reason) = skip {
            tracing::debug!(resource_id = %resource.id, ?reason, "not reconciling with catalog");
            report.outcome = ReconcileOutcome::Skipped(reason);
            self.feed.emit(Notification::thumbnail_needs_update(resource));
            return Ok(report);
        }

        let id = resource.id;
        let result = self
            .registry
            .mark_sessions_processed(id, false)
            .and_then(|_| self.registry.set_dirty(id, true))
            .map_err(TaskError::from)
            .and_then(|()| self.reconcile_with_catalog(resource, &mut report));

        let processed = self.registry.mark_sessions_processed(id, true);
        report.report.isolate(Step::SessionReset, processed);
        let cleared = self.registry.set_dirty(id, false);

        result?;
        cleared?;

        if self.settings.search_index_rebuild {
            report
                .report
                .isolate(Step::SearchIndex, self.services.rebuild_search_index());
        }

        tracing::info!(
            resource_id = %id,
            outcome = ?report.outcome,
            attempts = report.catalog_attempts,
            warnings = report.report.warnings().len(),
            "post-save reconciliation finished"
        );
        Ok(report)
    }

    fn reconcile_with_catalog(
        &self,
        mut resource: Resource,
        report: &mut ReconcileReport,
    ) -> TaskResult<()> {
        if resource.needs_publish() {
            let Some(published) = self.sync.publish(&resource)? else {
                report.outcome = ReconcileOutcome::Skipped(SkipReason::NoBaseFile);
                return Ok(());
            };
            report.published = true;
            resource.store = Some(published.store.name.clone());
            resource.workspace = Some(published.store.workspace.clone());

            // An overwrite request covers one publish only.
            if resource.overwrite {
                let consumed = ResourceUpdate {
                    overwrite: Some(false),
                    ..ResourceUpdate::default()
                };
                self.registry.update_resource(resource.id, &consumed)?;
                report.changed_fields.push("overwrite");
            }
        }

        let fetched = self.sync.fetch_with_retry(&resource)?;
        report.catalog_attempts = fetched.attempts;
        let Some(mut catalog_resource) = fetched.resource else {
            tracing::warn!(
                resource_id = %resource.id,
                attempts = fetched.attempts,
                "catalog resource not visible, skipping catalog-derived fields"
            );
            report.outcome = ReconcileOutcome::Degraded;
            return Ok(());
        };

        self.sync
            .enrich(&resource, &mut catalog_resource, &mut report.report);
        let values = CatalogValues::from(&catalog_resource);

        let (srid, bbox) = match catalog_geometry(&catalog_resource) {
            Ok((srid, bbox)) => (Some(srid), Some(bbox)),
            Err(message) => {
                report.report.warn(Step::Projection, message);
                (resource.srid.clone(), resource.bbox)
            }
        };
        let has_polygon = resource.bbox_polygon.is_some() || bbox.is_some();
        let srid = match srid.filter(|s| !s.trim().is_empty()) {
            Some(srid) => srid,
            None if has_polygon => DEFAULT_SRID.to_string(),
            None => {
                return Err(CoreError::InvalidProjection {
                    name: resource.name.clone(),
                }
                .into())
            }
        };

        let resource = self.write_back(resource, &values, &srid, bbox, report);
        self.refresh_derived(&resource, &catalog_resource, report);

        self.feed
            .emit(Notification::post_save_complete(resource.clone()));
        report.outcome = ReconcileOutcome::Reconciled;
        Ok(())
    }

    /// Writes identity and geometry back in two independent atomic updates.
    fn write_back(
        &self,
        mut resource: Resource,
        values: &CatalogValues,
        srid: &str,
        bbox: Option<BoundingBox>,
        report: &mut ReconcileReport,
    ) -> Resource {
        let thumbnail_url = resource.thumbnail_url.as_deref().and_then(|url| {
            let monochromatic = report
                .report
                .isolate(Step::ThumbnailCheck, self.services.is_monochromatic_thumbnail(url));
            (monochromatic == Some(true)).then(|| self.settings.missing_thumbnail_url.clone())
        });

        let alternate = match resource.alternate.as_deref() {
            Some(alternate) if !alternate.is_empty() && !resource.overwrite => {
                alternate.to_string()
            }
            _ => values.alternate.clone(),
        };
        let title = if resource.title.is_empty() {
            resource.name.clone()
        } else {
            resource.title.clone()
        };

        let identity = ResourceUpdate {
            title: Some(title),
            abstract_text: Some(resource.abstract_text.clone()),
            alternate: Some(alternate.clone()),
            thumbnail_url,
            workspace: Some(values.workspace.clone()),
            store: Some(values.store.clone()),
            store_type: Some(values.store_type.clone()),
            typename: Some(alternate),
            bbox_polygon: bbox.map(|b| b.to_polygon(DEFAULT_SRID_CODE)),
            srid: Some(srid.to_string()),
            srid_url: Some(srid_url(srid)),
            ..ResourceUpdate::default()
        };
        if let Some(updated) = self.apply(&resource, &identity, Step::IdentityUpdate, report) {
            resource = updated;
        }

        let Some(bbox) = bbox else {
            return resource;
        };
        let polygon = bbox.to_polygon(srid_code_or_default(srid));
        let geometry = ResourceUpdate {
            ll_bbox_polygon: Some(polygon),
            srid: Some(srid.to_string()),
            ..ResourceUpdate::default()
        };
        let updated = self
            .apply(&resource, &geometry, Step::GeometryUpdate, report)
            .or_else(|| {
                let fallback = ResourceUpdate {
                    ll_bbox_polygon: Some(polygon.with_srid(DEFAULT_SRID_CODE)),
                    ..geometry.clone()
                };
                self.apply(&resource, &fallback, Step::GeometryFallback, report)
            });
        updated.unwrap_or(resource)
    }

    fn apply(
        &self,
        resource: &Resource,
        update: &ResourceUpdate,
        step: Step,
        report: &mut ReconcileReport,
    ) -> Option<Resource> {
        let updated = report
            .report
            .isolate(step, self.registry.update_resource(resource.id, update))?;
        for field in update.changed_fields() {
            if !report.changed_fields.contains(&field) {
                report.changed_fields.push(field);
            }
        }
        Some(updated)
    }

    fn refresh_derived(
        &self,
        resource: &Resource,
        catalog_resource: &CatalogResource,
        report: &mut ReconcileReport,
    ) {
        let warnings = &mut report.report;
        warnings.isolate(
            Step::CatalogueRecord,
            self.services.refresh_catalogue_record(resource),
        );
        warnings.isolate(
            Step::DefaultLinks,
            self.services.regenerate_default_links(resource, true),
        );
        warnings.isolate(
            Step::Attributes,
            self.services.refresh_attributes(resource, catalog_resource),
        );
        warnings.isolate(Step::Legends, self.services.refresh_legends(resource));

        let layer = resource
            .alternate_or_typename()
            .map(str::to_string)
            .unwrap_or_else(|| catalog_resource.qualified_name());
        warnings.isolate(Step::TileCache, self.invalidate_tiles(&layer));
    }

    /// Resets the tile cache's style filter for `layer`, then truncates it.
    fn invalidate_tiles(&self, layer: &str) -> TaskResult<()> {
        let styles: Vec<String> = match self.sync.catalog().get_layer(layer) {
            Ok(catalog_layer) => catalog_layer
                .default_style
                .iter()
                .chain(&catalog_layer.styles)
                .map(|s| s.qualified_name())
                .collect(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        self.services.update_tile_cache_styles(layer, &styles)?;
        self.services.invalidate_tile_cache(layer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;
    use layerflow_core::StoreType;

    #[test]
    fn geometry_requires_projection_and_extent() {
        let mut resource = CatalogResource::new(
            "roads",
            CatalogStore {
                name: "roads".into(),
                workspace: "geonode".into(),
                store_type: StoreType::DataStore,
            },
        );
        assert!(catalog_geometry(&resource).is_err());

        resource.projection = Some("EPSG:32633".into());
        assert!(catalog_geometry(&resource).is_err());

        resource.native_bbox = Some([0.0, f64::NAN, 0.0, 1.0]);
        assert!(catalog_geometry(&resource).is_err());

        resource.native_bbox = Some([-10.0, 10.0, -5.0, 5.0]);
        let (srid, bbox) = catalog_geometry(&resource).unwrap();
        assert_eq!(srid, "EPSG:32633");
        assert_eq!(bbox, BoundingBox::new(-10.0, -5.0, 10.0, 5.0));
    }
}
