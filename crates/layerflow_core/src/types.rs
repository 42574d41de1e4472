//! Identifier types for registry records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a resource (layer) in the local registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Creates a new resource ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource:{}", self.0)
    }
}

/// Identifier of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Creates a new session ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Identifier of a bulk import, assigned by the importer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportId(String);

impl ImportId {
    /// Creates a new import ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "import:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_ordering() {
        assert!(ResourceId::new(1) < ResourceId::new(2));
        assert_eq!(ResourceId::new(7).as_u64(), 7);
    }

    #[test]
    fn id_display() {
        assert_eq!(format!("{}", ResourceId::new(42)), "resource:42");
        assert_eq!(format!("{}", SessionId::new(3)), "session:3");
        assert_eq!(format!("{}", ImportId::new("a1b2")), "import:a1b2");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ResourceId::new(9)).unwrap();
        assert_eq!(json, "9");
        let id: ImportId = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(id.as_str(), "xyz");
    }
}
