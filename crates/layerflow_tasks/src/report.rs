//! Operation reports.
//!
//! Enrichment steps may fail without failing the operation. Such failures are
//! logged and collected as warnings on the report the operation returns.

use layerflow_core::ResourceId;
use std::fmt;

use crate::config::TaskKind;

/// A failure-isolated step of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Marking upload sessions unprocessed.
    SessionReset,
    /// Reading the metadata file.
    MetadataFile,
    /// Resolving the catalog resource.
    CatalogLookup,
    /// Pushing title and abstract to the catalog.
    CatalogTitle,
    /// Dispatching the style task.
    StyleDispatch,
    /// Removing the upload temp directory.
    TempCleanup,
    /// Building the attribution.
    Attribution,
    /// Saving the enriched catalog resource.
    CatalogSave,
    /// Reading the catalog projection and extent.
    Projection,
    /// Checking the thumbnail.
    ThumbnailCheck,
    /// Writing identity fields back to the registry.
    IdentityUpdate,
    /// Writing the normalized extent back to the registry.
    GeometryUpdate,
    /// Writing the normalized extent with the default spatial reference.
    GeometryFallback,
    /// Refreshing the metadata catalogue record.
    CatalogueRecord,
    /// Regenerating default links.
    DefaultLinks,
    /// Refreshing attributes.
    Attributes,
    /// Refreshing legends.
    Legends,
    /// Invalidating cached tiles.
    TileCache,
    /// Rebuilding the search index.
    SearchIndex,
    /// Reading a style file.
    StyleFile,
    /// Deleting a superseded style.
    StyleCleanup,
}

impl Step {
    /// Short name of the step.
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::SessionReset => "session reset",
            Step::MetadataFile => "metadata file",
            Step::CatalogLookup => "catalog lookup",
            Step::CatalogTitle => "catalog title",
            Step::StyleDispatch => "style dispatch",
            Step::TempCleanup => "temp cleanup",
            Step::Attribution => "attribution",
            Step::CatalogSave => "catalog save",
            Step::Projection => "projection",
            Step::ThumbnailCheck => "thumbnail check",
            Step::IdentityUpdate => "identity update",
            Step::GeometryUpdate => "geometry update",
            Step::GeometryFallback => "geometry fallback",
            Step::CatalogueRecord => "catalogue record",
            Step::DefaultLinks => "default links",
            Step::Attributes => "attributes",
            Step::Legends => "legends",
            Step::TileCache => "tile cache",
            Step::SearchIndex => "search index",
            Step::StyleFile => "style file",
            Step::StyleCleanup => "style cleanup",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A swallowed step failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepWarning {
    /// The failing step.
    pub step: Step,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for StepWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Warnings collected over one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationReport {
    warnings: Vec<StepWarning>,
}

impl OperationReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwraps a step result, turning an error into a warning.
    pub fn isolate<T, E: fmt::Display>(&mut self, step: Step, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.warn(step, e.to_string());
                None
            }
        }
    }

    /// Records a warning.
    pub fn warn(&mut self, step: Step, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(step = %step, %message, "step failed, continuing");
        self.warnings.push(StepWarning { step, message });
    }

    /// All warnings, in order.
    pub fn warnings(&self) -> &[StepWarning] {
        &self.warnings
    }

    /// The failed steps, in order.
    pub fn failed_steps(&self) -> Vec<Step> {
        self.warnings.iter().map(|w| w.step).collect()
    }

    /// Returns true if `step` failed at least once.
    pub fn has_warning(&self, step: Step) -> bool {
        self.warnings.iter().any(|w| w.step == step)
    }

    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Appends another report's warnings.
    pub fn merge(&mut self, other: OperationReport) {
        self.warnings.extend(other.warnings);
    }
}

/// Result of finalizing an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    /// The finalized resource.
    pub resource: ResourceId,
    /// Whether the catalog resource was found.
    pub catalog_resolved: bool,
    /// Whether a metadata file was accepted.
    pub metadata_uploaded: bool,
    /// The style task handed off, if dispatch succeeded.
    pub style_task: Option<TaskKind>,
    /// Swallowed step failures.
    pub report: OperationReport,
}

/// Why a reconciliation pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The resource is harvested from a remote service.
    RemoteService,
    /// The resource lives in a tile or remote store.
    ExternalStore,
    /// The resource needs publishing but has no data file.
    NoBaseFile,
}

/// How a reconciliation pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing was reconciled.
    Skipped(SkipReason),
    /// The catalog resource never became visible; catalog-derived fields were left alone.
    Degraded,
    /// The resource was reconciled with the catalog.
    Reconciled,
}

/// Result of a post-save reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// The reconciled resource.
    pub resource: ResourceId,
    /// How the pass ended.
    pub outcome: ReconcileOutcome,
    /// Catalog lookups issued by the bounded fetch.
    pub catalog_attempts: u32,
    /// Whether the resource was (re)published.
    pub published: bool,
    /// Registry fields written back.
    pub changed_fields: Vec<&'static str>,
    /// Swallowed step failures.
    pub report: OperationReport,
}

impl ReconcileReport {
    pub(crate) fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            outcome: ReconcileOutcome::Degraded,
            catalog_attempts: 0,
            published: false,
            changed_fields: Vec::new(),
            report: OperationReport::new(),
        }
    }
}

/// Result of a style assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleReport {
    /// The style now set as default, if one was set.
    pub default_style: Option<String>,
    /// The default style it replaced, if deleted.
    pub removed_style: Option<String>,
    /// Whether the style was derived instead of uploaded.
    pub derived: bool,
    /// Swallowed step failures.
    pub report: OperationReport,
}

/// Result of a cascading delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteReport {
    /// The deleted resource.
    pub resource: ResourceId,
    /// Catalog artifacts removed, e.g. `"store geonode:roads"`.
    pub removed: Vec<String>,
    /// Artifacts that were already gone.
    pub already_absent: Vec<String>,
    /// Artifacts kept because something else still uses them.
    pub kept: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;

    #[test]
    fn isolate_collects_warnings() {
        let mut report = OperationReport::new();

        let ok: Result<u8, CatalogError> = Ok(7);
        assert_eq!(report.isolate(Step::Attributes, ok), Some(7));
        assert!(report.is_clean());

        let failed: Result<u8, CatalogError> = Err(CatalogError::Unavailable("down".into()));
        assert_eq!(report.isolate(Step::Legends, failed), None);
        assert!(report.has_warning(Step::Legends));
        assert_eq!(report.failed_steps(), vec![Step::Legends]);
        assert_eq!(
            report.warnings()[0].to_string(),
            "legends: catalog unavailable: down"
        );
    }

    #[test]
    fn merge_keeps_order() {
        let mut first = OperationReport::new();
        first.warn(Step::TempCleanup, "busy");
        let mut second = OperationReport::new();
        second.warn(Step::StyleCleanup, "in use");

        first.merge(second);
        assert_eq!(
            first.failed_steps(),
            vec![Step::TempCleanup, Step::StyleCleanup]
        );
    }
}
