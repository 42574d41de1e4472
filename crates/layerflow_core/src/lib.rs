//! # LayerFlow Core
//!
//! Local registry model for geospatial layers published to a remote catalog.
//!
//! This crate provides:
//! - `Resource`, `UploadSession` and `UploadRecord` records
//! - Bounding box and spatial reference helpers
//! - A typed `ResourceUpdate` applied atomically by the registry
//! - The `Registry` interface and an in-memory implementation
//! - A notification feed for downstream listeners (thumbnails, indexing)
//! - Runtime `Settings`
//!
//! ## Key Invariants
//!
//! - A resource's `alternate` is unique and never rewritten once derived,
//!   unless an overwrite is requested
//! - Bounding boxes are stored both natively and as a spatial-reference-tagged polygon
//! - Registry updates are atomic per `ResourceUpdate`; a failed update leaves
//!   the stored record untouched

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod geo;
mod model;
mod notify;
mod registry;
mod types;
mod update;

pub use config::Settings;
pub use error::{CoreError, CoreResult};
pub use geo::{
    parse_srid_code, srid_code_or_default, srid_url, BoundingBox, Polygon, DEFAULT_SRID,
    DEFAULT_SRID_CODE,
};
pub use model::{Contact, Link, LinkKind, Resource, StoreType, UploadRecord, UploadSession};
pub use notify::{Notification, NotificationFeed};
pub use registry::{MemoryRegistry, Registry};
pub use types::{ImportId, ResourceId, SessionId};
pub use update::ResourceUpdate;
