#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod migrate;
pub mod storage;

pub use auth::{AuthRecord, IdentityResolver, SessionCache};
pub use config::Config;
pub use context::{AuthContext, RegisterOutcome};
pub use error::{MigrationError, ResolveError, StoreError};
pub use migrate::{LegacyMigrator, MigrationOutcome, MigrationReport};
pub use storage::{
    create_store, CachingStore, FileBackend, MemoryBackend, SqlBackend, StorageBackend,
};
