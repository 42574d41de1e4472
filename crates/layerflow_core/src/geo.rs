//! Bounding boxes and spatial reference identifiers.
//!
//! The registry keeps a resource's extent twice: the native bounding box as
//! reported by the catalog, and a polygon tagged with a numeric spatial
//! reference code. Catalog projections arrive as strings (`"EPSG:3857"`,
//! `"4326"`, or worse), so the numeric code is parsed leniently and falls back
//! to the geographic default.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Default spatial reference used when none can be resolved.
pub const DEFAULT_SRID: &str = "EPSG:4326";

/// Numeric code of [`DEFAULT_SRID`].
pub const DEFAULT_SRID_CODE: u32 = 4326;

static SRID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(EPSG:)?(?P<srid>\d{4,6})$").expect("valid SRID pattern")
});

/// Parses the numeric code out of an SRID string.
///
/// Accepts `EPSG:<code>` or a bare code of 4 to 6 digits.
pub fn parse_srid_code(srid: &str) -> Option<u32> {
    SRID_PATTERN
        .captures(srid.trim())
        .and_then(|caps| caps.name("srid"))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parses an SRID code, falling back to [`DEFAULT_SRID_CODE`].
pub fn srid_code_or_default(srid: &str) -> u32 {
    parse_srid_code(srid).unwrap_or(DEFAULT_SRID_CODE)
}

/// Reference URL for an SRID on spatialreference.org.
pub fn srid_url(srid: &str) -> String {
    format!(
        "http://www.spatialreference.org/ref/{}/",
        srid.replace(':', "/").to_lowercase()
    )
}

/// An axis-aligned extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum x (west / easting).
    pub min_x: f64,
    /// Minimum y (south / northing).
    pub min_y: f64,
    /// Maximum x.
    pub max_x: f64,
    /// Maximum y.
    pub max_y: f64,
}

impl BoundingBox {
    /// Creates a bounding box from corner coordinates.
    #[must_use]
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Creates a bounding box from the catalog's `[x0, x1, y0, y1]` ordering.
    #[must_use]
    pub const fn from_catalog_order(coords: [f64; 4]) -> Self {
        Self::new(coords[0], coords[2], coords[1], coords[3])
    }

    /// Returns the box in the catalog's `[x0, x1, y0, y1]` ordering.
    #[must_use]
    pub const fn to_catalog_order(&self) -> [f64; 4] {
        [self.min_x, self.max_x, self.min_y, self.max_y]
    }

    /// Returns a copy with min/max swapped where they were inverted.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            min_x: self.min_x.min(self.max_x),
            min_y: self.min_y.min(self.max_y),
            max_x: self.min_x.max(self.max_x),
            max_y: self.min_y.max(self.max_y),
        }
    }

    /// Returns true if all coordinates are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|c| c.is_finite())
    }

    /// Builds a polygon tagged with the given spatial reference code.
    #[must_use]
    pub fn to_polygon(&self, srid: u32) -> Polygon {
        Polygon {
            bbox: self.normalized(),
            srid,
        }
    }
}

/// A rectangular polygon tagged with a numeric spatial reference code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// The rectangle's extent.
    pub bbox: BoundingBox,
    /// Numeric spatial reference code.
    pub srid: u32,
}

impl Polygon {
    /// Returns the same polygon tagged with another spatial reference code.
    #[must_use]
    pub fn with_srid(mut self, srid: u32) -> Self {
        self.srid = srid;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_epsg_prefixed() {
        assert_eq!(parse_srid_code("EPSG:3857"), Some(3857));
        assert_eq!(parse_srid_code("EPSG:32633"), Some(32633));
    }

    #[test]
    fn parse_bare_code() {
        assert_eq!(parse_srid_code("4326"), Some(4326));
        assert_eq!(parse_srid_code(" 4326 "), Some(4326));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_srid_code("garbage"), None);
        assert_eq!(parse_srid_code("EPSG:"), None);
        assert_eq!(parse_srid_code("123"), None);
        assert_eq!(parse_srid_code("1234567"), None);
        assert_eq!(parse_srid_code("epsg:4326"), None);
    }

    #[test]
    fn fallback_chain() {
        assert_eq!(srid_code_or_default("EPSG:3857"), 3857);
        assert_eq!(srid_code_or_default("4326"), 4326);
        assert_eq!(srid_code_or_default("garbage"), DEFAULT_SRID_CODE);
        assert_eq!(srid_code_or_default(""), DEFAULT_SRID_CODE);
    }

    #[test]
    fn reference_url() {
        assert_eq!(
            srid_url("EPSG:4326"),
            "http://www.spatialreference.org/ref/epsg/4326/"
        );
    }

    #[test]
    fn catalog_order_round_trip() {
        let bbox = BoundingBox::from_catalog_order([-10.0, 10.0, -5.0, 5.0]);
        assert_eq!(bbox, BoundingBox::new(-10.0, -5.0, 10.0, 5.0));
        assert_eq!(bbox.to_catalog_order(), [-10.0, 10.0, -5.0, 5.0]);
    }

    #[test]
    fn polygon_retagging_keeps_extent() {
        let polygon = BoundingBox::new(2.0, 1.0, 0.0, 0.0).to_polygon(3857);
        assert_eq!(polygon.bbox, BoundingBox::new(0.0, 0.0, 2.0, 1.0));
        let retagged = polygon.with_srid(DEFAULT_SRID_CODE);
        assert_eq!(retagged.srid, DEFAULT_SRID_CODE);
        assert_eq!(retagged.bbox, polygon.bbox);
    }

    proptest! {
        #[test]
        fn numeric_codes_parse(code in 1000u32..1_000_000) {
            prop_assert_eq!(parse_srid_code(&code.to_string()), Some(code));
            prop_assert_eq!(parse_srid_code(&format!("EPSG:{code}")), Some(code));
        }

        #[test]
        fn fallback_never_panics(input in ".*") {
            let code = srid_code_or_default(&input);
            prop_assert!(code == DEFAULT_SRID_CODE || parse_srid_code(&input) == Some(code));
        }

        #[test]
        fn normalized_is_ordered(
            a in -180.0f64..180.0, b in -90.0f64..90.0,
            c in -180.0f64..180.0, d in -90.0f64..90.0,
        ) {
            let bbox = BoundingBox::new(a, b, c, d).normalized();
            prop_assert!(bbox.min_x <= bbox.max_x);
            prop_assert!(bbox.min_y <= bbox.max_y);
        }
    }
}
