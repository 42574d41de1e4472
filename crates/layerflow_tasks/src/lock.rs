//! Distributed lock keyed by task invocation.
//!
//! A lock entry carries the token of its holder and an expiry, so a crashed
//! holder cannot block an invocation forever and a late release never frees
//! somebody else's entry.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{LockError, LockResult};

/// Identifier of one task invocation. Retries of the same invocation share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Generates a new random invocation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Key under which the invocation's lock is stored.
    pub fn lock_key(&self) -> String {
        format!("layerflow:lock:{}", self.0)
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage for lock entries.
pub trait LockBackend: Send + Sync {
    /// Stores `token` under `key` unless a live entry exists. Returns true on success.
    fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> LockResult<bool>;

    /// Removes the entry under `key` if it still belongs to `token`.
    /// Returns true if an entry was removed.
    fn release(&self, key: &str, token: &str) -> LockResult<bool>;
}

/// In-process lock backend.
pub struct MemoryLockBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
}

impl MemoryLockBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the backend going down or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns true if a live entry exists for `key`.
    pub fn is_held(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }

    fn check_available(&self) -> LockResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LockError::Unavailable("memory backend offline".into()))
        }
    }
}

impl Default for MemoryLockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LockBackend for MemoryLockBackend {
    fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> LockResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some((_, expires)) = entries.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    fn release(&self, key: &str, token: &str) -> LockResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((holder, _)) if holder == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Hands out scoped lock guards.
#[derive(Clone)]
pub struct TaskLock {
    backend: Arc<dyn LockBackend>,
    ttl: Duration,
}

impl TaskLock {
    /// Creates a lock over `backend` whose entries expire after `ttl`.
    pub fn new(backend: Arc<dyn LockBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// Entry time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Tries to become the exclusive holder of `key`.
    ///
    /// `Ok(None)` means somebody else holds it. An error means the backend
    /// itself failed.
    pub fn acquire(&self, key: &str) -> LockResult<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        if !self.backend.try_acquire(key, &token, self.ttl)? {
            tracing::debug!(key, "lock held elsewhere");
            return Ok(None);
        }
        tracing::trace!(key, "lock acquired");
        Ok(Some(LockGuard {
            backend: Arc::clone(&self.backend),
            key: key.to_string(),
            token,
            released: false,
        }))
    }
}

/// Exclusive hold on a lock key. Released when dropped.
pub struct LockGuard {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    /// The held key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lock now. Calling it again is a no-op.
    pub fn release(&mut self) -> LockResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.backend.release(&self.key, &self.token)?;
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            // The entry expires on its own.
            tracing::warn!(key = %self.key, error = %e, "failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn lock_with(backend: &Arc<MemoryLockBackend>, ttl: Duration) -> TaskLock {
        TaskLock::new(Arc::clone(backend) as Arc<dyn LockBackend>, ttl)
    }

    #[test]
    fn second_acquire_is_refused() {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = lock_with(&backend, Duration::from_secs(60));
        let key = InvocationId::new().lock_key();

        let guard = lock.acquire(&key).unwrap();
        assert!(guard.is_some());
        assert!(lock.acquire(&key).unwrap().is_none());

        drop(guard);
        assert!(!backend.is_held(&key));
        assert!(lock.acquire(&key).unwrap().is_some());
    }

    #[test]
    fn release_is_idempotent() {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = lock_with(&backend, Duration::from_secs(60));

        let mut guard = lock.acquire("k").unwrap().unwrap();
        guard.release().unwrap();
        guard.release().unwrap();
        assert!(!backend.is_held("k"));
    }

    #[test]
    fn expired_entry_can_be_taken_over() {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = lock_with(&backend, Duration::from_millis(10));

        let stale = lock.acquire("k").unwrap().unwrap();
        thread::sleep(Duration::from_millis(30));
        let fresh = lock.acquire("k").unwrap();
        assert!(fresh.is_some());

        // The stale holder must not free the new holder's entry.
        drop(stale);
        assert!(backend.is_held("k"));
        drop(fresh);
        assert!(!backend.is_held("k"));
    }

    #[test]
    fn unavailable_backend_is_an_error() {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = lock_with(&backend, Duration::from_secs(60));
        backend.set_available(false);

        assert!(matches!(
            lock.acquire("k"),
            Err(LockError::Unavailable(_))
        ));
    }

    #[test]
    fn concurrent_acquirers_exclude_each_other() {
        let backend = Arc::new(MemoryLockBackend::new());
        let lock = lock_with(&backend, Duration::from_secs(60));
        let key = InvocationId::new().lock_key();
        let start = Arc::new(std::sync::Barrier::new(8));
        let tried = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                let key = key.clone();
                let start = Arc::clone(&start);
                let tried = Arc::clone(&tried);
                thread::spawn(move || {
                    start.wait();
                    let guard = lock.acquire(&key).unwrap();
                    // Hold the guard until every thread has tried.
                    tried.wait();
                    guard.is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn invocation_lock_keys_differ() {
        let a = InvocationId::new();
        let b = InvocationId::new();
        assert_ne!(a.lock_key(), b.lock_key());
        assert!(a.lock_key().starts_with("layerflow:lock:"));
    }
}
