//! Property-based test generators using proptest.

use layerflow_core::BoundingBox;
use proptest::prelude::*;

/// Strategy for generating valid resource names.
pub fn resource_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,23}").expect("Invalid regex")
}

/// Strategy for generating keyword lists, with blanks and duplicates.
pub fn keywords_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop_oneof![
            prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
            Just(String::new()),
        ],
        0..8,
    )
}

/// Strategy for generating well-formed `EPSG:<code>` identifiers.
pub fn srid_strategy() -> impl Strategy<Value = String> {
    (1024u32..=32767).prop_map(|code| format!("EPSG:{}", code))
}

/// Strategy for generating spatial reference strings, most of them malformed.
pub fn any_srid_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        srid_strategy(),
        Just(String::new()),
        Just("EPSG:".to_string()),
        prop::string::string_regex("[A-Za-z:]{0,12}").expect("Invalid regex"),
    ]
}

/// Strategy for generating finite bounding boxes, possibly inverted.
pub fn bbox_strategy() -> impl Strategy<Value = BoundingBox> {
    (
        -180.0f64..180.0,
        -90.0f64..90.0,
        -180.0f64..180.0,
        -90.0f64..90.0,
    )
        .prop_map(|(x0, y0, x1, y1)| BoundingBox::new(x0, y0, x1, y1))
}
