//! Volatile backend: a map behind a lock.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::auth::record::{normalize_ip, AuthRecord, DEFAULT_SENTINEL_IP};

use super::traits::StorageBackend;

/// In-memory store. Loses everything on drop.
#[derive(Debug)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, AuthRecord>>,
    default_ip: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL_IP)
    }
}

impl MemoryBackend {
    pub fn new(default_ip: impl Into<String>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            default_ip: default_ip.into(),
        }
    }

    /// Build a store pre-filled with `records` (later duplicates lose).
    pub fn from_records(records: impl IntoIterator<Item = AuthRecord>) -> Self {
        let store = Self::default();
        for record in records {
            store.create(&record);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn exists(&self, identity: &str) -> bool {
        self.records.read().contains_key(identity)
    }

    fn fetch(&self, identity: &str) -> Option<AuthRecord> {
        let mut record = self.records.read().get(identity).cloned()?;
        record.last_ip = normalize_ip(&record.last_ip, &self.default_ip);
        Some(record)
    }

    fn create(&self, record: &AuthRecord) -> bool {
        let mut records = self.records.write();
        if records.contains_key(&record.identity) {
            return false;
        }
        records.insert(record.identity.clone(), record.clone());
        true
    }

    fn update_credential(&self, identity: &str, credential_hash: &str) -> bool {
        match self.records.write().get_mut(identity) {
            Some(record) => {
                record.credential_hash = credential_hash.to_string();
                true
            }
            None => false,
        }
    }

    fn update_session(&self, identity: &str, display_name: &str, ip: &str, last_login: i64) -> bool {
        match self.records.write().get_mut(identity) {
            Some(record) => {
                record.apply_session(display_name, ip, last_login);
                true
            }
            None => false,
        }
    }

    fn delete(&self, identity: &str) -> bool {
        self.records.write().remove(identity).is_some()
    }

    fn purge_older_than(&self, cutoff: i64) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.last_login >= cutoff);
        before - records.len()
    }
}
