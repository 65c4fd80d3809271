//! Durable account storage.
//!
//! Provides:
//! - [`StorageBackend`]: the record-access contract every store satisfies
//! - [`FileBackend`]: one colon-delimited line per account, full rewrite on change
//! - [`SqlBackend`]: pooled SQLite with configurable table/column names
//! - [`MemoryBackend`]: volatile map for tests and dry runs
//! - [`CachingStore`]: write-through index in front of any of the above
//!
//! ## Design Decisions
//! - Per-record operations never return `Result`. Failures are logged where
//!   they are detected and surface as `false`, `None` or `0`.
//! - Only construction is fallible ([`StoreError`](crate::error::StoreError)).
//! - Each backend serializes its own access; callers share one
//!   `Arc<dyn StorageBackend>` across threads.

pub mod cached;
pub mod file;
pub mod memory;
pub mod sql;
pub mod traits;

pub use cached::CachingStore;
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sql::SqlBackend;
pub use traits::StorageBackend;

use std::sync::Arc;

use crate::config::{BackendKind, Config};
use crate::error::StoreError;

/// Factory: open the configured backend, wrapped in the cache when enabled.
pub fn create_store(config: &Config) -> Result<Arc<dyn StorageBackend>, StoreError> {
    let default_ip = config.storage.default_ip.clone();
    let backend: Arc<dyn StorageBackend> = match config.storage.backend {
        BackendKind::File => Arc::new(FileBackend::open(config.auth_file(), default_ip)?),
        BackendKind::Sql => Arc::new(SqlBackend::open(
            config.sql_file(),
            &config.storage.sql,
            default_ip,
        )?),
        BackendKind::Memory => Arc::new(MemoryBackend::new(default_ip)),
    };

    tracing::info!(
        backend = backend.name(),
        cache = config.storage.cache,
        "Auth store opened"
    );

    if config.storage.cache {
        Ok(Arc::new(CachingStore::new(backend)))
    } else {
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::record::AuthRecord;
    use tempfile::TempDir;

    fn config_in(tmp: &TempDir, backend: BackendKind, cache: bool) -> Config {
        let mut config = Config {
            data_dir: tmp.path().to_path_buf(),
            ..Config::default()
        };
        config.storage.backend = backend;
        config.storage.cache = cache;
        config
    }

    #[test]
    fn factory_file() {
        let tmp = TempDir::new().unwrap();
        let store = create_store(&config_in(&tmp, BackendKind::File, false)).unwrap();
        assert_eq!(store.name(), "file");
        assert!(tmp.path().join("auths-uuid.db").exists());
    }

    #[test]
    fn factory_sql() {
        let tmp = TempDir::new().unwrap();
        let store = create_store(&config_in(&tmp, BackendKind::Sql, false)).unwrap();
        assert_eq!(store.name(), "sql");
        assert!(store.create(&AuthRecord::new("id-1", "a", "h", "ip", 1)));
        store.close();
        assert!(tmp.path().join("authme.sqlite").exists());
    }

    #[test]
    fn factory_memory_cached() {
        let tmp = TempDir::new().unwrap();
        let store = create_store(&config_in(&tmp, BackendKind::Memory, true)).unwrap();
        assert_eq!(store.name(), "memory");
        assert!(store.create(&AuthRecord::new("id-1", "a", "h", "ip", 1)));
        assert!(store.exists("id-1"));
    }

    #[test]
    fn factory_sql_bad_identifier_errors() {
        let tmp = TempDir::new().unwrap();
        let mut config = config_in(&tmp, BackendKind::Sql, true);
        config.storage.sql.column_ip = "ip; --".into();
        match create_store(&config) {
            Err(StoreError::InvalidIdentifier(name)) => assert_eq!(name, "ip; --"),
            Err(other) => panic!("expected invalid identifier, got {other}"),
            Ok(_) => panic!("bad column name should be rejected"),
        }
    }
}
