//! Runtime settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::CoreResult;

/// Settings shared by every task.
///
/// Loadable from JSON; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Public URL of the site, used for attribution links.
    pub site_url: String,
    /// Catalog workspace for new stores and styles.
    pub default_workspace: String,
    /// Extra catalog lookups after the first one fails.
    pub max_fetch_retries: u32,
    /// Whether resources carry a publish state that the catalog should mirror.
    pub resource_publishing: bool,
    /// Whether this system may write resources back to the catalog.
    pub backend_write_enabled: bool,
    /// Whether to rebuild the search index after each reconciliation.
    pub search_index_rebuild: bool,
    /// Thumbnail used in place of a blank (monochromatic) one.
    pub missing_thumbnail_url: String,
    /// Lock expiry, in seconds.
    pub lock_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            site_url: "http://localhost:8000/".into(),
            default_workspace: "geonode".into(),
            max_fetch_retries: 2,
            resource_publishing: false,
            backend_write_enabled: true,
            search_index_rebuild: false,
            missing_thumbnail_url: "/static/img/missing_thumb.png".into(),
            lock_ttl_secs: 600,
        }
    }
}

impl Settings {
    /// Creates settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses settings from a JSON document.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads settings from a JSON file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Sets the site URL.
    #[must_use]
    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = url.into();
        self
    }

    /// Sets the default catalog workspace.
    #[must_use]
    pub fn with_default_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.default_workspace = workspace.into();
        self
    }

    /// Sets the number of extra catalog lookups.
    #[must_use]
    pub const fn with_max_fetch_retries(mut self, retries: u32) -> Self {
        self.max_fetch_retries = retries;
        self
    }

    /// Enables or disables publish-state mirroring.
    #[must_use]
    pub const fn with_resource_publishing(mut self, enabled: bool) -> Self {
        self.resource_publishing = enabled;
        self
    }

    /// Enables or disables catalog write-back.
    #[must_use]
    pub const fn with_backend_write_enabled(mut self, enabled: bool) -> Self {
        self.backend_write_enabled = enabled;
        self
    }

    /// Enables or disables search index rebuilds.
    #[must_use]
    pub const fn with_search_index_rebuild(mut self, enabled: bool) -> Self {
        self.search_index_rebuild = enabled;
        self
    }

    /// Sets the lock expiry.
    #[must_use]
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl_secs = ttl.as_secs();
        self
    }

    /// Lock expiry as a duration.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Site URL without a trailing slash when it is absolute.
    pub fn site_root(&self) -> &str {
        if self.site_url.starts_with("http") {
            self.site_url.trim_end_matches('/')
        } else {
            &self.site_url
        }
    }
}
