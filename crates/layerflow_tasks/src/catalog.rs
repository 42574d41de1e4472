//! Remote catalog client interface.
//!
//! The catalog is the GIS server that owns stores, resources, layers and
//! styles. Nothing here is transactional: every call either succeeds on its
//! own or fails on its own.

use layerflow_core::{BoundingBox, StoreType};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::{CatalogError, CatalogResult};

/// Splits `"workspace:name"` into its parts.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((workspace, bare)) if !workspace.is_empty() => (Some(workspace), bare),
        _ => (None, name),
    }
}

/// A store in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogStore {
    /// Store name.
    pub name: String,
    /// Owning workspace.
    pub workspace: String,
    /// Kind of store.
    pub store_type: StoreType,
}

/// Attribution shown by the catalog for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// Attribution title (the point of contact).
    pub title: String,
    /// Link to the point of contact's profile.
    pub href: String,
}

/// A published resource (feature type or coverage) in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogResource {
    /// Resource name within its workspace.
    pub name: String,
    /// Title.
    pub title: String,
    /// Abstract.
    pub abstract_text: String,
    /// Backing store.
    pub store: CatalogStore,
    /// Declared projection, e.g. `EPSG:32633`.
    pub projection: Option<String>,
    /// Extent in the native projection, as the catalog orders it: `[x0, x1, y0, y1]`.
    pub native_bbox: Option<[f64; 4]>,
    /// Keywords.
    pub keywords: Vec<String>,
    /// Attribution.
    pub attribution: Option<Attribution>,
    /// Whether the resource is advertised in capabilities documents.
    pub advertised: bool,
    /// Metadata links as `(mime, name, url)`.
    pub metadata_links: Vec<(String, String, String)>,
}

impl CatalogResource {
    /// Creates a resource in `store` with empty metadata.
    pub fn new(name: impl Into<String>, store: CatalogStore) -> Self {
        Self {
            name: name.into(),
            title: String::new(),
            abstract_text: String::new(),
            store,
            projection: None,
            native_bbox: None,
            keywords: Vec::new(),
            attribution: None,
            advertised: true,
            metadata_links: Vec::new(),
        }
    }

    /// `workspace:name`.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.store.workspace, self.name)
    }
}

/// Reference to a style, optionally scoped to a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleRef {
    /// Style name.
    pub name: String,
    /// Workspace, `None` for global styles.
    pub workspace: Option<String>,
}

impl StyleRef {
    /// Creates a style reference.
    pub fn new(name: impl Into<String>, workspace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            workspace: workspace.map(str::to_string),
        }
    }

    /// `workspace:name`, or the bare name for global styles.
    pub fn qualified_name(&self) -> String {
        match &self.workspace {
            Some(workspace) => format!("{}:{}", workspace, self.name),
            None => self.name.clone(),
        }
    }
}

/// A rendering style stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Style {
    /// Style name.
    pub name: String,
    /// Workspace, `None` for global styles.
    pub workspace: Option<String>,
    /// Style definition.
    pub body: String,
}

impl Style {
    /// Reference to this style.
    pub fn style_ref(&self) -> StyleRef {
        StyleRef::new(self.name.clone(), self.workspace.as_deref())
    }
}

/// A published layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLayer {
    /// Qualified layer name, `workspace:resource`.
    pub name: String,
    /// Name of the published resource.
    pub resource: String,
    /// Workspace of the published resource.
    pub workspace: String,
    /// Default style.
    pub default_style: Option<StyleRef>,
    /// Alternative styles.
    pub styles: Vec<StyleRef>,
}

/// Request to create (or overwrite) a store, resource and layer from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    /// Resource name.
    pub name: String,
    /// Target workspace.
    pub workspace: String,
    /// Store to publish into. Defaults to a store named after the resource.
    pub store: Option<String>,
    /// Kind of store to create.
    pub store_type: StoreType,
    /// Data file to publish.
    pub base_file: PathBuf,
    /// Title.
    pub title: String,
    /// Abstract.
    pub abstract_text: String,
    /// Character set of the data.
    pub charset: String,
    /// Declared projection.
    pub srid: Option<String>,
    /// Native extent, if known.
    pub native_bbox: Option<BoundingBox>,
    /// Replace an existing resource of the same name.
    pub overwrite: bool,
}

impl PublishRequest {
    /// Store name the request publishes into.
    pub fn store_name(&self) -> &str {
        self.store.as_deref().unwrap_or(&self.name)
    }
}

/// Client interface to the remote catalog.
pub trait Catalog: Send + Sync {
    /// Looks up a resource. `name` may be qualified (`workspace:name`).
    fn get_resource(
        &self,
        name: &str,
        store: Option<&str>,
        workspace: Option<&str>,
    ) -> CatalogResult<CatalogResource>;

    /// Saves a modified resource.
    fn save_resource(&self, resource: &CatalogResource) -> CatalogResult<()>;

    /// Deletes a resource. Fails with `InUse` while a layer publishes it.
    fn delete_resource(&self, name: &str, store: &str, workspace: &str) -> CatalogResult<()>;

    /// Looks up a layer by qualified or bare name.
    fn get_layer(&self, name: &str) -> CatalogResult<CatalogLayer>;

    /// Saves a modified layer.
    fn save_layer(&self, layer: &CatalogLayer) -> CatalogResult<()>;

    /// Deletes a layer.
    fn delete_layer(&self, name: &str) -> CatalogResult<()>;

    /// Looks up a style. Absence is not an error.
    fn get_style(&self, name: &str, workspace: Option<&str>) -> CatalogResult<Option<Style>>;

    /// Creates a style, replacing an existing one only if `overwrite` is set.
    fn create_style(
        &self,
        name: &str,
        body: &str,
        workspace: Option<&str>,
        overwrite: bool,
    ) -> CatalogResult<Style>;

    /// Deletes a style. Fails with `InUse` while it is a layer's default.
    fn delete_style(&self, name: &str, workspace: Option<&str>) -> CatalogResult<()>;

    /// Deletes a store. Fails with `InUse` while it still holds resources.
    fn delete_store(&self, name: &str, workspace: &str) -> CatalogResult<()>;

    /// Publishes a data file, creating the store, resource and layer.
    fn publish(&self, request: &PublishRequest) -> CatalogResult<CatalogResource>;
}

#[derive(Default)]
struct CatalogState {
    stores: BTreeMap<(String, String), CatalogStore>,
    resources: BTreeMap<(String, String), CatalogResource>,
    layers: BTreeMap<String, CatalogLayer>,
    styles: BTreeMap<StyleRef, Style>,
    default_style_history: Vec<(String, Option<String>)>,
}

impl CatalogState {
    fn find_layer_key(&self, name: &str) -> Option<String> {
        if self.layers.contains_key(name) {
            return Some(name.to_string());
        }
        let (workspace, bare) = split_qualified(name);
        self.layers
            .values()
            .find(|l| l.resource == bare && workspace.map_or(true, |ws| ws == l.workspace))
            .map(|l| l.name.clone())
    }

    fn ensure_layer(&mut self, workspace: &str, resource: &str) {
        let name = format!("{}:{}", workspace, resource);
        self.layers.entry(name.clone()).or_insert(CatalogLayer {
            name,
            resource: resource.to_string(),
            workspace: workspace.to_string(),
            default_style: None,
            styles: Vec::new(),
        });
    }
}

/// In-process catalog.
///
/// Models the catalog's eventual consistency (`hide_next_lookups`) and
/// outages (`set_available`), counts calls, and records every default-style
/// assignment so observers can check what readers could have seen.
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
    hidden_lookups: AtomicU32,
    available: AtomicBool,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            hidden_lookups: AtomicU32::new(0),
            available: AtomicBool::new(true),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Simulates an outage, or its end.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes the next `count` resource lookups report not-found.
    pub fn hide_next_lookups(&self, count: u32) {
        self.hidden_lookups.store(count, Ordering::SeqCst);
    }

    /// Number of calls made to a trait method, by method name.
    pub fn call_count(&self, method: &str) -> u32 {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    /// Seeds a resource together with its store and layer.
    pub fn add_resource(&self, resource: CatalogResource) {
        let mut state = self.state.write();
        let store = resource.store.clone();
        state
            .stores
            .entry((store.workspace.clone(), store.name.clone()))
            .or_insert(store.clone());
        state.ensure_layer(&store.workspace, &resource.name);
        state
            .resources
            .insert((store.workspace, resource.name.clone()), resource);
    }

    /// Seeds a style.
    pub fn add_style(&self, style: Style) {
        self.state.write().styles.insert(style.style_ref(), style);
    }

    /// Returns a resource without counting or hiding the lookup.
    pub fn peek_resource(&self, workspace: &str, name: &str) -> Option<CatalogResource> {
        self.state
            .read()
            .resources
            .get(&(workspace.to_string(), name.to_string()))
            .cloned()
    }

    /// Returns a layer without counting the lookup.
    pub fn peek_layer(&self, name: &str) -> Option<CatalogLayer> {
        let state = self.state.read();
        let key = state.find_layer_key(name)?;
        state.layers.get(&key).cloned()
    }

    /// Number of stores.
    pub fn store_count(&self) -> usize {
        self.state.read().stores.len()
    }

    /// Qualified names of all styles.
    pub fn style_names(&self) -> Vec<String> {
        self.state
            .read()
            .styles
            .keys()
            .map(StyleRef::qualified_name)
            .collect()
    }

    /// Every default style a layer was saved with, in order.
    pub fn default_style_history(&self, layer: &str) -> Vec<Option<String>> {
        self.state
            .read()
            .default_style_history
            .iter()
            .filter(|(name, _)| name == layer)
            .map(|(_, style)| style.clone())
            .collect()
    }

    /// Everything left in the catalog that refers to `workspace:name`.
    pub fn artifacts_for(&self, workspace: &str, name: &str) -> Vec<String> {
        let state = self.state.read();
        let mut artifacts = Vec::new();
        for (ws, store) in state.stores.keys() {
            if ws == workspace && store == name {
                artifacts.push(format!("store {}:{}", ws, store));
            }
        }
        for (ws, resource) in state.resources.keys() {
            if ws == workspace && resource == name {
                artifacts.push(format!("resource {}:{}", ws, resource));
            }
        }
        for layer in state.layers.values() {
            if layer.workspace == workspace && layer.resource == name {
                artifacts.push(format!("layer {}", layer.name));
            }
        }
        for style in state.styles.keys() {
            if style.name == name && style.workspace.as_deref().map_or(true, |ws| ws == workspace) {
                artifacts.push(format!("style {}", style.qualified_name()));
            }
        }
        artifacts
    }

    fn enter(&self, method: &'static str) -> CatalogResult<()> {
        *self.calls.lock().entry(method).or_insert(0) += 1;
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CatalogError::Unavailable("connection refused".into()))
        }
    }

    fn take_hidden_lookup(&self) -> bool {
        self.hidden_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog for MemoryCatalog {
    fn get_resource(
        &self,
        name: &str,
        store: Option<&str>,
        workspace: Option<&str>,
    ) -> CatalogResult<CatalogResource> {
        self.enter("get_resource")?;
        if self.take_hidden_lookup() {
            return Err(CatalogError::not_found("resource", name));
        }

        let (qualifier, bare) = split_qualified(name);
        let workspace = qualifier.or(workspace);
        self.state
            .read()
            .resources
            .values()
            .find(|r| {
                r.name == bare
                    && workspace.map_or(true, |ws| ws == r.store.workspace)
                    && store.map_or(true, |s| s == r.store.name)
            })
            .cloned()
            .ok_or_else(|| CatalogError::not_found("resource", name))
    }

    fn save_resource(&self, resource: &CatalogResource) -> CatalogResult<()> {
        self.enter("save_resource")?;
        let mut state = self.state.write();
        let key = (resource.store.workspace.clone(), resource.name.clone());
        match state.resources.get_mut(&key) {
            Some(stored) => {
                *stored = resource.clone();
                Ok(())
            }
            None => Err(CatalogError::not_found("resource", resource.qualified_name())),
        }
    }

    fn delete_resource(&self, name: &str, store: &str, workspace: &str) -> CatalogResult<()> {
        self.enter("delete_resource")?;
        let mut state = self.state.write();
        let key = (workspace.to_string(), name.to_string());
        match state.resources.get(&key) {
            Some(resource) if resource.store.name == store => {}
            _ => {
                return Err(CatalogError::not_found(
                    "resource",
                    format!("{}:{}", workspace, name),
                ))
            }
        }
        if let Some(layer) = state
            .layers
            .values()
            .find(|l| l.workspace == workspace && l.resource == name)
        {
            return Err(CatalogError::InUse {
                kind: "resource",
                name: name.to_string(),
                reason: format!("published by layer {}", layer.name),
            });
        }
        state.resources.remove(&key);
        Ok(())
    }

    fn get_layer(&self, name: &str) -> CatalogResult<CatalogLayer> {
        self.enter("get_layer")?;
        let state = self.state.read();
        state
            .find_layer_key(name)
            .and_then(|key| state.layers.get(&key).cloned())
            .ok_or_else(|| CatalogError::not_found("layer", name))
    }

    fn save_layer(&self, layer: &CatalogLayer) -> CatalogResult<()> {
        self.enter("save_layer")?;
        let mut state = self.state.write();
        if !state.layers.contains_key(&layer.name) {
            return Err(CatalogError::not_found("layer", layer.name.clone()));
        }
        if let Some(style) = &layer.default_style {
            if !state.styles.contains_key(style) {
                return Err(CatalogError::Rejected(format!(
                    "style {} does not exist",
                    style.qualified_name()
                )));
            }
        }
        let default = layer.default_style.as_ref().map(StyleRef::qualified_name);
        state
            .default_style_history
            .push((layer.name.clone(), default));
        state.layers.insert(layer.name.clone(), layer.clone());
        Ok(())
    }

    fn delete_layer(&self, name: &str) -> CatalogResult<()> {
        self.enter("delete_layer")?;
        let mut state = self.state.write();
        let key = state
            .find_layer_key(name)
            .ok_or_else(|| CatalogError::not_found("layer", name))?;
        state.layers.remove(&key);
        Ok(())
    }

    fn get_style(&self, name: &str, workspace: Option<&str>) -> CatalogResult<Option<Style>> {
        self.enter("get_style")?;
        Ok(self
            .state
            .read()
            .styles
            .get(&StyleRef::new(name, workspace))
            .cloned())
    }

    fn create_style(
        &self,
        name: &str,
        body: &str,
        workspace: Option<&str>,
        overwrite: bool,
    ) -> CatalogResult<Style> {
        self.enter("create_style")?;
        if body.trim().is_empty() {
            return Err(CatalogError::Rejected(format!("style {} has no body", name)));
        }
        let key = StyleRef::new(name, workspace);
        let mut state = self.state.write();
        if state.styles.contains_key(&key) && !overwrite {
            return Err(CatalogError::Rejected(format!(
                "style {} already exists",
                key.qualified_name()
            )));
        }
        let style = Style {
            name: name.to_string(),
            workspace: workspace.map(str::to_string),
            body: body.to_string(),
        };
        state.styles.insert(key, style.clone());
        Ok(style)
    }

    fn delete_style(&self, name: &str, workspace: Option<&str>) -> CatalogResult<()> {
        self.enter("delete_style")?;
        let key = StyleRef::new(name, workspace);
        let mut state = self.state.write();
        if !state.styles.contains_key(&key) {
            return Err(CatalogError::not_found("style", key.qualified_name()));
        }
        if let Some(layer) = state
            .layers
            .values()
            .find(|l| l.default_style.as_ref() == Some(&key))
        {
            return Err(CatalogError::InUse {
                kind: "style",
                name: key.qualified_name(),
                reason: format!("default style of {}", layer.name),
            });
        }
        state.styles.remove(&key);
        for layer in state.layers.values_mut() {
            layer.styles.retain(|s| s != &key);
        }
        Ok(())
    }

    fn delete_store(&self, name: &str, workspace: &str) -> CatalogResult<()> {
        self.enter("delete_store")?;
        let key = (workspace.to_string(), name.to_string());
        let mut state = self.state.write();
        if !state.stores.contains_key(&key) {
            return Err(CatalogError::not_found(
                "store",
                format!("{}:{}", workspace, name),
            ));
        }
        if let Some(resource) = state
            .resources
            .values()
            .find(|r| r.store.workspace == workspace && r.store.name == name)
        {
            return Err(CatalogError::InUse {
                kind: "store",
                name: name.to_string(),
                reason: format!("holds resource {}", resource.name),
            });
        }
        state.stores.remove(&key);
        Ok(())
    }

    fn publish(&self, request: &PublishRequest) -> CatalogResult<CatalogResource> {
        self.enter("publish")?;
        let mut state = self.state.write();
        let key = (request.workspace.clone(), request.name.clone());
        if state.resources.contains_key(&key) && !request.overwrite {
            return Err(CatalogError::Rejected(format!(
                "resource {}:{} already exists",
                request.workspace, request.name
            )));
        }

        let store = state
            .stores
            .entry((request.workspace.clone(), request.store_name().to_string()))
            .or_insert_with(|| CatalogStore {
                name: request.store_name().to_string(),
                workspace: request.workspace.clone(),
                store_type: request.store_type.clone(),
            })
            .clone();

        let mut resource = CatalogResource::new(request.name.clone(), store);
        resource.title = request.title.clone();
        resource.abstract_text = request.abstract_text.clone();
        resource.projection = request.srid.clone();
        resource.native_bbox = request.native_bbox.map(|b| b.to_catalog_order());

        state.resources.insert(key, resource.clone());
        state.ensure_layer(&request.workspace, &request.name);
        Ok(resource)
    }
}
