//! Catalog Synchronizer: keeps a registry resource and its catalog
//! counterpart in step.

use layerflow_core::{Resource, Settings, StoreType};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::{Attribution, Catalog, CatalogResource, PublishRequest};
use crate::error::{CatalogResult, TaskResult};
use crate::report::{OperationReport, Step};
use crate::services::ResourceServices;

/// One catalog lookup to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Name, bare or qualified.
    pub name: String,
    /// Store filter.
    pub store: Option<String>,
    /// Workspace filter.
    pub workspace: Option<String>,
}

/// Registry fields derived from a catalog resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogValues {
    /// `workspace:name`.
    pub alternate: String,
    /// Store name.
    pub store: String,
    /// Workspace name.
    pub workspace: String,
    /// Kind of store.
    pub store_type: StoreType,
}

impl From<&CatalogResource> for CatalogValues {
    fn from(resource: &CatalogResource) -> Self {
        Self {
            alternate: resource.qualified_name(),
            store: resource.store.name.clone(),
            workspace: resource.store.workspace.clone(),
            store_type: resource.store.store_type.clone(),
        }
    }
}

/// Outcome of the bounded-retry fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    /// The catalog resource, if it became visible.
    pub resource: Option<CatalogResource>,
    /// Lookups issued.
    pub attempts: u32,
}

/// Returns the sorted, deduplicated union of two keyword lists.
pub fn keyword_union(remote: &[String], local: &[String]) -> Vec<String> {
    remote
        .iter()
        .chain(local)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Guesses the kind of store a data file is published into.
pub fn store_type_for_file(path: &Path) -> StoreType {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("tif" | "tiff" | "geotiff" | "asc" | "nc") => StoreType::CoverageStore,
        _ => StoreType::DataStore,
    }
}

/// Reconciles registry resources with the catalog.
pub struct CatalogSynchronizer {
    catalog: Arc<dyn Catalog>,
    services: Arc<dyn ResourceServices>,
    settings: Settings,
}

impl CatalogSynchronizer {
    /// Creates a synchronizer.
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

    /// The catalog client.
    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    /// Lookups to try for `resource`, from the most to the least specific.
    pub fn candidates(&self, resource: &Resource) -> Vec<Candidate> {
        let mut candidates = vec![Candidate {
            name: resource.name.clone(),
            store: resource.store.clone(),
            workspace: resource.workspace.clone(),
        }];
        if let Some(alternate) = resource.alternate.as_ref().filter(|a| !a.is_empty()) {
            candidates.push(Candidate {
                name: alternate.clone(),
                store: resource.store.clone(),
                workspace: resource.workspace.clone(),
            });
        }
        if let Some(name) = resource.alternate_or_typename() {
            candidates.push(Candidate {
                name: name.to_string(),
                store: None,
                workspace: None,
            });
        }
        candidates.dedup();
        candidates
    }

    /// Tries each candidate once; the first hit wins.
    ///
    /// Not-found on every candidate yields `Ok(None)`. Any other catalog
    /// failure is returned.
    pub fn resolve(&self, resource: &Resource) -> CatalogResult<Option<CatalogResource>> {
        for candidate in self.candidates(resource) {
            match self.catalog.get_resource(
                &candidate.name,
                candidate.store.as_deref(),
                candidate.workspace.as_deref(),
            ) {
                Ok(found) => return Ok(Some(found)),
                Err(e) if e.is_not_found() => {
                    tracing::trace!(resource_id = %resource.id, name = %candidate.name, "candidate not found");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Resolves the catalog resource, retrying up to `max_fetch_retries` times
    /// while it is not visible yet.
    pub fn fetch_with_retry(&self, resource: &Resource) -> CatalogResult<FetchResult> {
        let max_attempts = self.settings.max_fetch_retries.saturating_add(1);
        for attempt in 1..=max_attempts {
            if let Some(found) = self.resolve(resource)? {
                return Ok(FetchResult {
                    resource: Some(found),
                    attempts: attempt,
                });
            }
            tracing::debug!(resource_id = %resource.id, attempt, "catalog resource not visible yet");
        }
        Ok(FetchResult {
            resource: None,
            attempts: max_attempts,
        })
    }

    /// Publishes the resource's data file to the catalog.
    ///
    /// Returns `Ok(None)` when the resource has no data file.
    pub fn publish(&self, resource: &Resource) -> TaskResult<Option<CatalogResource>> {
        let Some(base_file) = self.services.base_file(resource)? else {
            tracing::debug!(resource_id = %resource.id, "no data file to publish");
            return Ok(None);
        };

        let store = if resource.overwrite {
            resource.store.clone().filter(|s| !s.is_empty())
        } else {
            None
        };
        let store_type = resource
            .store_type
            .clone()
            .unwrap_or_else(|| store_type_for_file(&base_file));

        let request = PublishRequest {
            name: resource.name.clone(),
            workspace: resource
                .workspace
                .clone()
                .unwrap_or_else(|| self.settings.default_workspace.clone()),
            store,
            store_type,
            base_file,
            title: resource.title.clone(),
            abstract_text: resource.abstract_text.clone(),
            charset: resource.charset.clone(),
            srid: resource.srid.clone(),
            native_bbox: resource.bbox,
            overwrite: true,
        };
        let published = self.catalog.publish(&request)?;
        tracing::info!(resource_id = %resource.id, layer = %published.qualified_name(), "published to catalog");
        Ok(Some(published))
    }

    /// Pushes the resource's title and abstract to the catalog.
    pub fn push_title(
        &self,
        resource: &Resource,
        catalog_resource: &mut CatalogResource,
    ) -> CatalogResult<()> {
        catalog_resource.title = resource.title.clone();
        catalog_resource.abstract_text = resource.abstract_text.clone();
        self.catalog.save_resource(catalog_resource)
    }

    /// Attribution for the resource's point of contact.
    pub fn attribution(&self, resource: &Resource) -> TaskResult<Option<Attribution>> {
        let Some(poc) = &resource.poc else {
            return Ok(None);
        };
        let profile = self.services.profile_url(poc)?;
        Ok(Some(Attribution {
            title: poc.to_string(),
            href: format!("{}{}", self.settings.site_root(), profile),
        }))
    }

    /// Mirrors registry metadata onto the catalog resource and saves it.
    ///
    /// Each step fails on its own; failures land in `report`.
    pub fn enrich(
        &self,
        resource: &Resource,
        catalog_resource: &mut CatalogResource,
        report: &mut OperationReport,
    ) {
        catalog_resource.metadata_links = resource.metadata_links();

        if let Some(attribution) = report.isolate(Step::Attribution, self.attribution(resource)) {
            if attribution.is_some() {
                catalog_resource.attribution = attribution;
            }
        }

        if self.settings.resource_publishing && resource.is_published != catalog_resource.advertised
        {
            catalog_resource.advertised = resource.is_published;
        }

        let keywords = resource.keyword_list();
        if !keywords.is_empty() {
            catalog_resource.keywords = keyword_union(&catalog_resource.keywords, &keywords);
        }

        if self.settings.backend_write_enabled {
            let saved = self.catalog.save_resource(catalog_resource);
            report.isolate(Step::CatalogSave, saved);
        }
    }
}
