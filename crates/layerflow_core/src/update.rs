//! Typed partial updates for resources.

use crate::geo::Polygon;
use crate::model::{Resource, StoreType};

/// The mutable field set of a [`Resource`].
///
/// `None` leaves a field untouched. The registry applies an update as a
/// single atomic write: either every `Some` field lands or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceUpdate {
    /// New title.
    pub title: Option<String>,
    /// New abstract.
    pub abstract_text: Option<String>,
    /// New qualified catalog name.
    pub alternate: Option<String>,
    /// New catalog store.
    pub store: Option<String>,
    /// New catalog workspace.
    pub workspace: Option<String>,
    /// New store type.
    pub store_type: Option<StoreType>,
    /// New OGC type name.
    pub typename: Option<String>,
    /// New spatial reference identifier.
    pub srid: Option<String>,
    /// New spatial reference URL.
    pub srid_url: Option<String>,
    /// New native bounding polygon.
    pub bbox_polygon: Option<Polygon>,
    /// New spatial-reference-tagged bounding polygon.
    pub ll_bbox_polygon: Option<Polygon>,
    /// New thumbnail URL.
    pub thumbnail_url: Option<String>,
    /// New metadata-uploaded flag.
    pub metadata_uploaded: Option<bool>,
    /// New dirty flag.
    pub dirty: Option<bool>,
    /// New overwrite request flag.
    pub overwrite: Option<bool>,
}

impl ResourceUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Writes every `Some` field into `resource`.
    pub fn apply_to(&self, resource: &mut Resource) {
        if let Some(title) = &self.title {
            resource.title = title.clone();
        }
        if let Some(abstract_text) = &self.abstract_text {
            resource.abstract_text = abstract_text.clone();
        }
        if let Some(alternate) = &self.alternate {
            resource.alternate = Some(alternate.clone());
        }
        if let Some(store) = &self.store {
            resource.store = Some(store.clone());
        }
        if let Some(workspace) = &self.workspace {
            resource.workspace = Some(workspace.clone());
        }
        if let Some(store_type) = &self.store_type {
            resource.store_type = Some(store_type.clone());
        }
        if let Some(typename) = &self.typename {
            resource.typename = Some(typename.clone());
        }
        if let Some(srid) = &self.srid {
            resource.srid = Some(srid.clone());
        }
        if let Some(srid_url) = &self.srid_url {
            resource.srid_url = Some(srid_url.clone());
        }
        if let Some(polygon) = self.bbox_polygon {
            resource.bbox = Some(polygon.bbox);
            resource.bbox_polygon = Some(polygon);
        }
        if let Some(polygon) = self.ll_bbox_polygon {
            resource.ll_bbox_polygon = Some(polygon);
        }
        if let Some(thumbnail_url) = &self.thumbnail_url {
            resource.thumbnail_url = Some(thumbnail_url.clone());
        }
        if let Some(metadata_uploaded) = self.metadata_uploaded {
            resource.metadata_uploaded = metadata_uploaded;
        }
        if let Some(dirty) = self.dirty {
            resource.dirty = dirty;
        }
        if let Some(overwrite) = self.overwrite {
            resource.overwrite = overwrite;
        }
    }

    /// Names of the fields this update touches.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields: Vec<&'static str> = Vec::new();
        let mut push = |set: bool, name: &'static str| {
            if set {
                fields.push(name);
            }
        };
        push(self.title.is_some(), "title");
        push(self.abstract_text.is_some(), "abstract");
        push(self.alternate.is_some(), "alternate");
        push(self.store.is_some(), "store");
        push(self.workspace.is_some(), "workspace");
        push(self.store_type.is_some(), "store_type");
        push(self.typename.is_some(), "typename");
        push(self.srid.is_some(), "srid");
        push(self.srid_url.is_some(), "srid_url");
        push(self.bbox_polygon.is_some(), "bbox_polygon");
        push(self.ll_bbox_polygon.is_some(), "ll_bbox_polygon");
        push(self.thumbnail_url.is_some(), "thumbnail_url");
        push(self.metadata_uploaded.is_some(), "metadata_uploaded");
        push(self.dirty.is_some(), "dirty");
        push(self.overwrite.is_some(), "overwrite");
        fields
    }
}
