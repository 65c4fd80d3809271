//! Write-through record cache in front of any backend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::auth::record::AuthRecord;

use super::traits::StorageBackend;

/// Decorator that keeps every record it has seen in memory.
///
/// The index lock is held across the backend call that produced a
/// result, so no caller observes an entry that reflects half of an
/// update. Index changes only follow backend success.
pub struct CachingStore {
    backend: Arc<dyn StorageBackend>,
    index: Mutex<HashMap<String, AuthRecord>>,
}

impl std::fmt::Debug for CachingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingStore")
            .field("backend", &self.backend.name())
            .field("cached", &self.index.lock().len())
            .finish()
    }
}

impl CachingStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            index: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Number of cached records.
    pub fn cached(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_cached(&self, identity: &str) -> bool {
        self.index.lock().contains_key(identity)
    }

    /// Drop one identity from the index, e.g. after it was changed
    /// through a path that bypasses this cache.
    pub fn evict(&self, identity: &str) -> bool {
        self.index.lock().remove(identity).is_some()
    }

    fn load(&self, index: &mut HashMap<String, AuthRecord>, identity: &str) -> Option<AuthRecord> {
        if let Some(record) = index.get(identity) {
            return Some(record.clone());
        }
        let record = self.backend.fetch(identity)?;
        index.insert(identity.to_string(), record.clone());
        Some(record)
    }

    /// Replace the cached copy with the backend's view after a write, so
    /// read-side normalization (empty IP to sentinel) is reflected.
    fn refresh(&self, index: &mut HashMap<String, AuthRecord>, identity: &str) {
        match self.backend.fetch(identity) {
            Some(record) => {
                index.insert(identity.to_string(), record);
            }
            None => {
                index.remove(identity);
            }
        }
    }
}

impl StorageBackend for CachingStore {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    fn exists(&self, identity: &str) -> bool {
        let mut index = self.index.lock();
        if index.contains_key(identity) {
            return true;
        }
        // A backend may know an identity it cannot decode into a record.
        self.load(&mut index, identity).is_some() || self.backend.exists(identity)
    }

    fn fetch(&self, identity: &str) -> Option<AuthRecord> {
        let mut index = self.index.lock();
        self.load(&mut index, identity)
    }

    fn create(&self, record: &AuthRecord) -> bool {
        let mut index = self.index.lock();
        if !self.backend.create(record) {
            return false;
        }
        self.refresh(&mut index, &record.identity);
        true
    }

    fn update_credential(&self, identity: &str, credential_hash: &str) -> bool {
        let mut index = self.index.lock();
        if !self.backend.update_credential(identity, credential_hash) {
            return false;
        }
        if let Some(record) = index.get_mut(identity) {
            record.credential_hash = credential_hash.to_string();
        }
        true
    }

    fn update_session(&self, identity: &str, display_name: &str, ip: &str, last_login: i64) -> bool {
        let mut index = self.index.lock();
        if !self.backend.update_session(identity, display_name, ip, last_login) {
            return false;
        }
        if index.contains_key(identity) {
            self.refresh(&mut index, identity);
        }
        true
    }

    fn delete(&self, identity: &str) -> bool {
        let mut index = self.index.lock();
        if !self.backend.delete(identity) {
            return false;
        }
        index.remove(identity);
        true
    }

    fn purge_older_than(&self, cutoff: i64) -> usize {
        let mut index = self.index.lock();
        let removed = self.backend.purge_older_than(cutoff);
        // Evict on every purge, not only when the backend reports removals.
        index.retain(|_, record| record.last_login >= cutoff);
        removed
    }

    fn reload(&self) {
        self.index.lock().clear();
        self.backend.reload();
    }

    fn close(&self) {
        self.backend.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::record::DEFAULT_SENTINEL_IP;
    use crate::storage::file::FileBackend;
    use crate::storage::memory::MemoryBackend;
    use tempfile::TempDir;

    fn cached_memory() -> (Arc<MemoryBackend>, CachingStore) {
        let backend = Arc::new(MemoryBackend::default());
        let store = CachingStore::new(backend.clone());
        (backend, store)
    }

    fn record(identity: &str, last_login: i64) -> AuthRecord {
        AuthRecord::new(identity, "alice", "h1", "1.2.3.4", last_login)
    }

    #[test]
    fn fetch_populates_index() {
        let (backend, store) = cached_memory();
        backend.create(&record("id-1", 10));

        assert!(!store.is_cached("id-1"));
        assert!(store.fetch("id-1").is_some());
        assert!(store.is_cached("id-1"));

        // Served from the index even after the backend lost it.
        backend.delete("id-1");
        assert!(store.exists("id-1"));
    }

    #[test]
    fn misses_are_not_cached() {
        let (_backend, store) = cached_memory();
        assert!(store.fetch("ghost").is_none());
        assert!(!store.exists("ghost"));
        assert_eq!(store.cached(), 0);
    }

    #[test]
    fn failed_backend_calls_leave_index_alone() {
        let (backend, store) = cached_memory();
        let original = record("id-1", 10);
        backend.create(&original);

        assert!(!store.create(&AuthRecord::new("id-1", "mallory", "x", "6.6.6.6", 0)));
        assert!(!store.is_cached("id-1"));
        assert!(!store.update_credential("ghost", "h"));
        assert!(!store.update_session("ghost", "n", "ip", 1));
        assert!(!store.delete("ghost"));
        assert_eq!(store.cached(), 0);
        assert!(store.fetch("id-1").unwrap().fields_eq(&original));
    }

    #[test]
    fn writes_keep_cache_equal_to_backend() {
        let (backend, store) = cached_memory();
        assert!(store.create(&record("id-1", 10)));
        assert!(store.is_cached("id-1"));

        assert!(store.update_credential("id-1", "h2"));
        assert!(store.update_session("id-1", "alice2", "5.5.5.5", 20));

        let cached = store.fetch("id-1").unwrap();
        let direct = backend.fetch("id-1").unwrap();
        assert!(cached.fields_eq(&direct));
        assert_eq!(cached.credential_hash, "h2");
        assert_eq!(cached.last_login, 20);

        assert!(store.delete("id-1"));
        assert!(!store.is_cached("id-1"));
        assert!(!store.exists("id-1"));
    }

    #[test]
    fn empty_ip_is_cached_as_backend_reads_it() {
        let tmp = TempDir::new().unwrap();
        let file = FileBackend::open(tmp.path().join("auths-uuid.db"), DEFAULT_SENTINEL_IP).unwrap();
        let store = CachingStore::new(Arc::new(file));

        assert!(store.create(&AuthRecord::new("id-1", "a", "h", "", 1)));
        let direct = store.inner().fetch("id-1").unwrap();
        assert_eq!(direct.last_ip, DEFAULT_SENTINEL_IP);
        assert!(store.fetch("id-1").unwrap().fields_eq(&direct));

        let (backend, store) = cached_memory();
        assert!(store.create(&record("id-2", 1)));
        assert!(store.update_session("id-2", "b", "", 2));
        let direct = backend.fetch("id-2").unwrap();
        assert_eq!(direct.last_ip, DEFAULT_SENTINEL_IP);
        assert!(store.fetch("id-2").unwrap().fields_eq(&direct));
    }

    #[test]
    fn exists_agrees_with_backend_on_undecodable_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("auths-uuid.db");
        std::fs::write(&path, "id-1:short\n").unwrap();
        let file = FileBackend::open(&path, DEFAULT_SENTINEL_IP).unwrap();
        let store = CachingStore::new(Arc::new(file));

        assert!(store.inner().exists("id-1"));
        assert!(store.exists("id-1"));
        assert!(store.fetch("id-1").is_none());
        assert!(!store.is_cached("id-1"));
    }

    #[test]
    fn update_session_on_cold_entry_stays_cold() {
        let (backend, store) = cached_memory();
        backend.create(&record("id-1", 10));

        assert!(store.update_session("id-1", "bob", "9.9.9.9", 30));
        assert!(!store.is_cached("id-1"));
        assert_eq!(store.fetch("id-1").unwrap().display_name, "bob");
    }

    #[test]
    fn purge_evicts_stale_entries() {
        let (backend, store) = cached_memory();
        store.create(&record("old", 10));
        store.create(&record("new", 500));

        assert_eq!(store.purge_older_than(100), 1);
        assert!(!store.is_cached("old"));
        assert!(store.is_cached("new"));
        assert!(!backend.exists("old"));
    }

    #[test]
    fn purge_evicts_even_when_backend_reports_zero() {
        let (backend, store) = cached_memory();
        store.create(&record("old", 10));
        // Removed behind the cache's back.
        backend.delete("old");

        assert_eq!(store.purge_older_than(100), 0);
        assert!(!store.is_cached("old"));
        assert!(!store.exists("old"));
    }

    #[test]
    fn reload_clears_index() {
        let (_backend, store) = cached_memory();
        store.create(&record("id-1", 10));
        store.create(&record("id-2", 10));
        assert_eq!(store.cached(), 2);

        store.reload();
        assert_eq!(store.cached(), 0);
        assert!(store.exists("id-1"));
    }

    #[test]
    fn evict_single_identity() {
        let (_backend, store) = cached_memory();
        store.create(&record("id-1", 10));
        assert!(store.evict("id-1"));
        assert!(!store.evict("id-1"));
        assert!(store.exists("id-1"));
    }

    #[test]
    fn wraps_file_backend() {
        let tmp = TempDir::new().unwrap();
        let file = FileBackend::open(tmp.path().join("auths-uuid.db"), DEFAULT_SENTINEL_IP).unwrap();
        let store = CachingStore::new(Arc::new(file));

        assert!(store.create(&record("id-1", 10)));
        assert!(store.update_session("id-1", "alice", "2.2.2.2", 11));
        let on_disk = store.inner().fetch("id-1").unwrap();
        assert!(store.fetch("id-1").unwrap().fields_eq(&on_disk));
        assert_eq!(store.name(), "file");
    }
}
