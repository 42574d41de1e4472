//! Registry records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geo::{BoundingBox, Polygon};
use crate::types::{ImportId, ResourceId, SessionId};

/// Kind of catalog store backing a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StoreType {
    /// Vector data store.
    DataStore,
    /// Raster coverage store.
    CoverageStore,
    /// Pre-rendered tile store, served outside the catalog.
    TileStore,
    /// Cascaded remote service.
    RemoteStore,
    /// Any other store type reported by the catalog.
    Other(String),
}

impl StoreType {
    /// Returns the catalog's name for this store type.
    pub fn as_str(&self) -> &str {
        match self {
            StoreType::DataStore => "dataStore",
            StoreType::CoverageStore => "coverageStore",
            StoreType::TileStore => "tileStore",
            StoreType::RemoteStore => "remoteStore",
            StoreType::Other(name) => name,
        }
    }

    /// Returns true for stores whose layers are not managed through the catalog.
    pub fn is_external(&self) -> bool {
        matches!(self, StoreType::TileStore | StoreType::RemoteStore)
    }

    /// Returns true for raster stores.
    pub fn is_raster(&self) -> bool {
        matches!(self, StoreType::CoverageStore)
    }
}

impl From<String> for StoreType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "dataStore" => StoreType::DataStore,
            "coverageStore" => StoreType::CoverageStore,
            "tileStore" => StoreType::TileStore,
            "remoteStore" => StoreType::RemoteStore,
            _ => StoreType::Other(value),
        }
    }
}

impl From<&str> for StoreType {
    fn from(value: &str) -> Self {
        StoreType::from(value.to_string())
    }
}

impl From<StoreType> for String {
    fn from(value: StoreType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point of contact for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Account name, used to resolve the profile page.
    pub username: String,
    /// Name shown in attributions.
    pub display_name: String,
}

impl Contact {
    /// Creates a contact.
    pub fn new(username: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            f.write_str(&self.username)
        } else {
            f.write_str(&self.display_name)
        }
    }
}

/// What a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Metadata document (ISO, FGDC, ...).
    Metadata,
    /// Data download.
    Data,
    /// Rendered image or legend.
    Image,
    /// OGC service endpoint.
    Ogc,
}

/// A link attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Link kind.
    pub kind: LinkKind,
    /// MIME type of the target.
    pub mime: String,
    /// Human readable name.
    pub name: String,
    /// Target URL.
    pub url: String,
}

impl Link {
    /// Creates a metadata link.
    pub fn metadata(
        mime: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            kind: LinkKind::Metadata,
            mime: mime.into(),
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Local record of a geospatial layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Registry identity.
    pub id: ResourceId,
    /// Short layer name.
    pub name: String,
    /// Display title.
    pub title: String,
    /// Abstract.
    pub abstract_text: String,
    /// Owning user.
    pub owner: String,
    /// Point of contact, used for attribution.
    pub poc: Option<Contact>,
    /// Catalog store name.
    pub store: Option<String>,
    /// Catalog workspace name.
    pub workspace: Option<String>,
    /// Catalog store type.
    pub store_type: Option<StoreType>,
    /// Fully qualified catalog name (`workspace:name`).
    pub alternate: Option<String>,
    /// Type name advertised by OGC services.
    pub typename: Option<String>,
    /// Character set of the uploaded data.
    pub charset: String,
    /// Spatial reference identifier, e.g. `EPSG:4326`.
    pub srid: Option<String>,
    /// Reference URL for `srid`.
    pub srid_url: Option<String>,
    /// Native bounding box.
    pub bbox: Option<BoundingBox>,
    /// Bounding polygon in native coordinates.
    pub bbox_polygon: Option<Polygon>,
    /// Bounding polygon tagged with the parsed spatial reference code.
    pub ll_bbox_polygon: Option<Polygon>,
    /// Keywords.
    pub keywords: Vec<String>,
    /// Links (metadata, downloads, ...).
    pub links: Vec<Link>,
    /// Whether the resource is published.
    pub is_published: bool,
    /// Whether a metadata document was uploaded with the data.
    pub metadata_uploaded: bool,
    /// Set while a reconciliation is in progress.
    pub dirty: bool,
    /// Thumbnail URL.
    pub thumbnail_url: Option<String>,
    /// Remote service this resource is harvested from, if any.
    pub remote_service: Option<String>,
    /// Whether the next reconciliation should re-publish the data.
    /// The reconciliation that publishes clears it.
    pub overwrite: bool,
    /// Latest upload session.
    pub upload_session: Option<SessionId>,
}

impl Resource {
    /// Creates a resource with the given identity and name; everything else empty.
    pub fn new(id: ResourceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            title: String::new(),
            abstract_text: String::new(),
            owner: String::new(),
            poc: None,
            store: None,
            workspace: None,
            store_type: None,
            alternate: None,
            typename: None,
            charset: "UTF-8".into(),
            srid: None,
            srid_url: None,
            bbox: None,
            bbox_polygon: None,
            ll_bbox_polygon: None,
            keywords: Vec::new(),
            links: Vec::new(),
            is_published: true,
            metadata_uploaded: false,
            dirty: false,
            thumbnail_url: None,
            remote_service: None,
            overwrite: false,
            upload_session: None,
        }
    }

    /// Returns the non-empty keywords.
    pub fn keyword_list(&self) -> Vec<String> {
        self.keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .cloned()
            .collect()
    }

    /// Returns `(mime, name, url)` for each metadata link.
    pub fn metadata_links(&self) -> Vec<(String, String, String)> {
        self.links
            .iter()
            .filter(|l| l.kind == LinkKind::Metadata)
            .map(|l| (l.mime.clone(), l.name.clone(), l.url.clone()))
            .collect()
    }

    /// Returns true if the resource is harvested from, or cascaded to, a remote service.
    pub fn is_remote(&self) -> bool {
        self.remote_service.is_some()
            || matches!(self.store_type, Some(StoreType::RemoteStore))
    }

    /// Returns true if catalog reconciliation does not apply to this resource.
    pub fn skips_catalog_sync(&self) -> bool {
        self.is_remote()
            || self
                .store_type
                .as_ref()
                .is_some_and(StoreType::is_external)
    }

    /// Returns true if the resource has no backing store yet, or asks to be re-published.
    pub fn needs_publish(&self) -> bool {
        self.store.as_deref().map_or(true, str::is_empty) || self.overwrite
    }

    /// Returns the name to use for catalog lookups by type name.
    pub fn alternate_or_typename(&self) -> Option<&str> {
        self.alternate
            .as_deref()
            .filter(|a| !a.is_empty())
            .or(self.typename.as_deref())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alternate {
            Some(alternate) => write!(f, "{} ({})", alternate, self.id),
            None => write!(f, "{} ({})", self.name, self.id),
        }
    }
}

/// One ingestion attempt for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Session identity.
    pub id: SessionId,
    /// Resource the session ingested.
    pub resource: ResourceId,
    /// Whether post-processing finished for this session.
    pub processed: bool,
}

impl UploadSession {
    /// Creates an unprocessed session.
    pub fn new(id: SessionId, resource: ResourceId) -> Self {
        Self {
            id,
            resource,
            processed: false,
        }
    }
}

/// A bulk import operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Importer-assigned identifier.
    pub import_id: ImportId,
    /// Resource produced by the import, once linked.
    pub resource: Option<ResourceId>,
    /// Set once finalization (including cleanup) ran.
    pub complete: bool,
}

impl UploadRecord {
    /// Creates an incomplete, unlinked upload record.
    pub fn new(import_id: ImportId) -> Self {
        Self {
            import_id,
            resource: None,
            complete: false,
        }
    }
}
