//! Record-access contract shared by every backend.

use std::sync::Arc;

use crate::auth::record::AuthRecord;

/// Durable (or cached) store of [`AuthRecord`]s keyed by identity.
///
/// Implementations must be thread-safe (`Send + Sync`): connection
/// handlers, housekeeping jobs and admin commands call in concurrently.
///
/// Every operation reports failure through its return value. Not-found,
/// I/O and database errors are logged by the implementation and surface
/// as `false`, `None` or `0`; nothing is propagated to the caller.
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn exists(&self, identity: &str) -> bool;

    /// `None` when absent or on I/O failure.
    fn fetch(&self, identity: &str) -> Option<AuthRecord>;

    /// Insert a new record. `false` without mutation if the identity exists.
    fn create(&self, record: &AuthRecord) -> bool;

    /// Replace the credential hash. `false` if the identity is absent.
    fn update_credential(&self, identity: &str, credential_hash: &str) -> bool;

    /// Overwrite display name, IP and last login; the hash is untouched.
    /// `false` if the identity is absent.
    fn update_session(&self, identity: &str, display_name: &str, ip: &str, last_login: i64)
        -> bool;

    fn delete(&self, identity: &str) -> bool;

    /// Delete every record with `last_login < cutoff` (epoch millis).
    /// Returns the number removed.
    fn purge_older_than(&self, cutoff: i64) -> usize;

    /// Drop internal state such as cached rows. Default: nothing to drop.
    #[inline]
    fn reload(&self) {}

    /// Release held resources. Idempotent. Default: nothing to release.
    #[inline]
    fn close(&self) {}
}

/// Blanket implementation for `Arc<B>` where `B: StorageBackend`.
impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    #[inline]
    fn name(&self) -> &'static str {
        (**self).name()
    }

    #[inline]
    fn exists(&self, identity: &str) -> bool {
        (**self).exists(identity)
    }

    #[inline]
    fn fetch(&self, identity: &str) -> Option<AuthRecord> {
        (**self).fetch(identity)
    }

    #[inline]
    fn create(&self, record: &AuthRecord) -> bool {
        (**self).create(record)
    }

    #[inline]
    fn update_credential(&self, identity: &str, credential_hash: &str) -> bool {
        (**self).update_credential(identity, credential_hash)
    }

    #[inline]
    fn update_session(&self, identity: &str, display_name: &str, ip: &str, last_login: i64) -> bool {
        (**self).update_session(identity, display_name, ip, last_login)
    }

    #[inline]
    fn delete(&self, identity: &str) -> bool {
        (**self).delete(identity)
    }

    #[inline]
    fn purge_older_than(&self, cutoff: i64) -> usize {
        (**self).purge_older_than(cutoff)
    }

    #[inline]
    fn reload(&self) {
        (**self).reload()
    }

    #[inline]
    fn close(&self) {
        (**self).close()
    }
}

/// Blanket implementation for `Box<B>` where `B: StorageBackend`.
impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    #[inline]
    fn name(&self) -> &'static str {
        (**self).name()
    }

    #[inline]
    fn exists(&self, identity: &str) -> bool {
        (**self).exists(identity)
    }

    #[inline]
    fn fetch(&self, identity: &str) -> Option<AuthRecord> {
        (**self).fetch(identity)
    }

    #[inline]
    fn create(&self, record: &AuthRecord) -> bool {
        (**self).create(record)
    }

    #[inline]
    fn update_credential(&self, identity: &str, credential_hash: &str) -> bool {
        (**self).update_credential(identity, credential_hash)
    }

    #[inline]
    fn update_session(&self, identity: &str, display_name: &str, ip: &str, last_login: i64) -> bool {
        (**self).update_session(identity, display_name, ip, last_login)
    }

    #[inline]
    fn delete(&self, identity: &str) -> bool {
        (**self).delete(identity)
    }

    #[inline]
    fn purge_older_than(&self, cutoff: i64) -> usize {
        (**self).purge_older_than(cutoff)
    }

    #[inline]
    fn reload(&self) {
        (**self).reload()
    }

    #[inline]
    fn close(&self) {
        (**self).close()
    }
}
