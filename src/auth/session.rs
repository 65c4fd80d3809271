//! In-memory index of identities that are past login on this process.
//!
//! Never persisted: a restart drops every entry and players re-authenticate.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::record::AuthRecord;

/// Authenticated-session index keyed by identity.
#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: RwLock<HashMap<String, AuthRecord>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the record's identity as authenticated.
    pub fn add(&self, record: AuthRecord) {
        tracing::debug!(identity = %record.identity, "Session opened");
        self.sessions.write().insert(record.identity.clone(), record);
    }

    /// Replace the stored record for an identity.
    pub fn update(&self, record: AuthRecord) {
        self.sessions.write().insert(record.identity.clone(), record);
    }

    /// Drop the session for an identity (disconnect, kick, de-auth).
    pub fn remove(&self, identity: &str) -> Option<AuthRecord> {
        let removed = self.sessions.write().remove(identity);
        if removed.is_some() {
            tracing::debug!(identity, "Session closed");
        }
        removed
    }

    pub fn is_authenticated(&self, identity: &str) -> bool {
        self.sessions.read().contains_key(identity)
    }

    pub fn get(&self, identity: &str) -> Option<AuthRecord> {
        self.sessions.read().get(identity).cloned()
    }

    /// Number of authenticated identities.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(identity: &str) -> AuthRecord {
        AuthRecord::new(identity, "steve", "hash", "10.0.0.1", 100)
    }

    #[test]
    fn add_then_lookup() {
        let cache = SessionCache::new();
        assert!(!cache.is_authenticated("a"));

        cache.add(record("a"));
        assert!(cache.is_authenticated("a"));
        assert_eq!(cache.get("a").unwrap().display_name, "steve");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_replaces_record() {
        let cache = SessionCache::new();
        cache.add(record("a"));

        let mut changed = record("a");
        changed.last_ip = "10.9.9.9".into();
        cache.update(changed);

        assert_eq!(cache.get("a").unwrap().last_ip, "10.9.9.9");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_deauthenticates() {
        let cache = SessionCache::new();
        cache.add(record("a"));

        assert!(cache.remove("a").is_some());
        assert!(!cache.is_authenticated("a"));
        assert!(cache.remove("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_add_and_remove() {
        let cache = Arc::new(SessionCache::new());

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    for i in 0..200 {
                        let id = format!("w{worker}-{i}");
                        cache.add(record(&id));
                        assert!(cache.is_authenticated(&id));
                        if i % 2 == 0 {
                            cache.remove(&id);
                        }
                    }
                });
            }
        });

        assert_eq!(cache.len(), 8 * 100);
    }
}
