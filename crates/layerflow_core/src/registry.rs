//! Local resource registry.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{CoreError, CoreResult};
use crate::model::{Resource, UploadRecord, UploadSession};
use crate::types::{ImportId, ResourceId, SessionId};
use crate::update::ResourceUpdate;

/// Persistence for resources, upload sessions and upload records.
///
/// Implementations must apply each [`ResourceUpdate`] atomically and keep
/// every record readable between updates.
pub trait Registry: Send + Sync {
    /// Loads a resource.
    fn resource(&self, id: ResourceId) -> CoreResult<Resource>;

    /// Inserts a resource, assigning an ID when `resource.id` is zero.
    fn insert_resource(&self, resource: Resource) -> CoreResult<ResourceId>;

    /// Saves a full resource record. `notify` tells listeners whether to react.
    fn save_resource(&self, resource: &Resource, notify: bool) -> CoreResult<()>;

    /// Applies a partial update atomically and returns the refreshed record.
    fn update_resource(&self, id: ResourceId, update: &ResourceUpdate) -> CoreResult<Resource>;

    /// Sets the dirty (processing) flag.
    fn set_dirty(&self, id: ResourceId, dirty: bool) -> CoreResult<()>;

    /// Deletes a resource and its sessions. Returns false if it did not exist.
    fn delete_resource(&self, id: ResourceId) -> CoreResult<bool>;

    /// Upload sessions for a resource, newest first.
    fn sessions_for(&self, id: ResourceId) -> CoreResult<Vec<UploadSession>>;

    /// Starts a new upload session for a resource.
    fn insert_session(&self, resource: ResourceId) -> CoreResult<SessionId>;

    /// Sets `processed` on every session of a resource. Returns the number updated.
    fn mark_sessions_processed(&self, id: ResourceId, processed: bool) -> CoreResult<usize>;

    /// Loads an upload record.
    fn upload_record(&self, import_id: &ImportId) -> CoreResult<UploadRecord>;

    /// Inserts an upload record.
    fn insert_upload_record(&self, record: UploadRecord) -> CoreResult<()>;

    /// Saves an upload record.
    fn save_upload_record(&self, record: &UploadRecord) -> CoreResult<()>;
}

/// An in-memory registry.
///
/// Besides the [`Registry`] contract it records saves and can be told to fail
/// upcoming atomic updates, which is how partial-failure paths are exercised.
pub struct MemoryRegistry {
    resources: RwLock<BTreeMap<ResourceId, Resource>>,
    sessions: RwLock<BTreeMap<SessionId, UploadSession>>,
    uploads: RwLock<HashMap<ImportId, UploadRecord>>,
    next_resource_id: AtomicU64,
    next_session_id: AtomicU64,
    failing_updates: AtomicU32,
    failing_dirty_flags: AtomicU32,
    saves: RwLock<Vec<(ResourceId, bool)>>,
    updates: RwLock<Vec<(ResourceId, ResourceUpdate)>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(BTreeMap::new()),
            sessions: RwLock::new(BTreeMap::new()),
            uploads: RwLock::new(HashMap::new()),
            next_resource_id: AtomicU64::new(1),
            next_session_id: AtomicU64::new(1),
            failing_updates: AtomicU32::new(0),
            failing_dirty_flags: AtomicU32::new(0),
            saves: RwLock::new(Vec::new()),
            updates: RwLock::new(Vec::new()),
        }
    }

    /// Makes the next `count` calls to `update_resource` fail without writing.
    pub fn fail_next_updates(&self, count: u32) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `set_dirty` fail without writing.
    pub fn fail_next_dirty_flags(&self, count: u32) {
        self.failing_dirty_flags.store(count, Ordering::SeqCst);
    }

    /// Every `save_resource` call so far, with its notify flag.
    pub fn saves(&self) -> Vec<(ResourceId, bool)> {
        self.saves.read().clone()
    }

    /// Every successful `update_resource` call so far.
    pub fn updates(&self) -> Vec<(ResourceId, ResourceUpdate)> {
        self.updates.read().clone()
    }

    /// Number of stored resources.
    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }

    fn take_injected_failure(&self) -> bool {
        take_one(&self.failing_updates)
    }

}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for MemoryRegistry {
    fn resource(&self, id: ResourceId) -> CoreResult<Resource> {
        self.resources
            .read()
            .get(&id)
            .cloned()
            .ok_or(CoreError::ResourceNotFound(id))
    }

    fn insert_resource(&self, mut resource: Resource) -> CoreResult<ResourceId> {
        if resource.id.as_u64() == 0 {
            resource.id = ResourceId::new(self.next_resource_id.fetch_add(1, Ordering::SeqCst));
        } else {
            self.next_resource_id
                .fetch_max(resource.id.as_u64() + 1, Ordering::SeqCst);
        }
        let id = resource.id;
        self.resources.write().insert(id, resource);
        Ok(id)
    }

    fn save_resource(&self, resource: &Resource, notify: bool) -> CoreResult<()> {
        self.resources.write().insert(resource.id, resource.clone());
        self.saves.write().push((resource.id, notify));
        Ok(())
    }

    fn update_resource(&self, id: ResourceId, update: &ResourceUpdate) -> CoreResult<Resource> {
        let mut resources = self.resources.write();
        let current = resources.get(&id).ok_or(CoreError::ResourceNotFound(id))?;

        if self.take_injected_failure() {
            return Err(CoreError::storage(format!(
                "update of {} rejected by backend",
                id
            )));
        }

        let mut next = current.clone();
        update.apply_to(&mut next);
        resources.insert(id, next.clone());
        self.updates.write().push((id, update.clone()));
        Ok(next)
    }

    fn set_dirty(&self, id: ResourceId, dirty: bool) -> CoreResult<()> {
        let mut resources = self.resources.write();
        let resource = resources
            .get_mut(&id)
            .ok_or(CoreError::ResourceNotFound(id))?;
        if take_one(&self.failing_dirty_flags) {
            return Err(CoreError::storage(format!(
                "dirty flag of {} rejected by backend",
                id
            )));
        }
        resource.dirty = dirty;
        Ok(())
    }

    fn delete_resource(&self, id: ResourceId) -> CoreResult<bool> {
        let removed = self.resources.write().remove(&id).is_some();
        self.sessions.write().retain(|_, s| s.resource != id);
        Ok(removed)
    }

    fn sessions_for(&self, id: ResourceId) -> CoreResult<Vec<UploadSession>> {
        Ok(self
            .sessions
            .read()
            .values()
            .rev()
            .filter(|s| s.resource == id)
            .cloned()
            .collect())
    }

    fn insert_session(&self, resource: ResourceId) -> CoreResult<SessionId> {
        let id = SessionId::new(self.next_session_id.fetch_add(1, Ordering::SeqCst));
        self.sessions
            .write()
            .insert(id, UploadSession::new(id, resource));
        Ok(id)
    }

    fn mark_sessions_processed(&self, id: ResourceId, processed: bool) -> CoreResult<usize> {
        let mut sessions = self.sessions.write();
        let mut count = 0;
        for session in sessions.values_mut().filter(|s| s.resource == id) {
            session.processed = processed;
            count += 1;
        }
        Ok(count)
    }

    fn upload_record(&self, import_id: &ImportId) -> CoreResult<UploadRecord> {
        self.uploads
            .read()
            .get(import_id)
            .cloned()
            .ok_or_else(|| CoreError::UploadNotFound(import_id.clone()))
    }

    fn insert_upload_record(&self, record: UploadRecord) -> CoreResult<()> {
        self.uploads
            .write()
            .insert(record.import_id.clone(), record);
        Ok(())
    }

    fn save_upload_record(&self, record: &UploadRecord) -> CoreResult<()> {
        self.uploads
            .write()
            .insert(record.import_id.clone(), record.clone());
        Ok(())
    }
}
