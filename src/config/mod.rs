//! TOML configuration.
//!
//! Every section is `#[serde(default)]`, so an empty file is a valid
//! configuration: flat-file storage with caching, offline identities,
//! sessions disabled.

pub mod schema;

pub use schema::{
    is_sql_identifier, BackendKind, Config, FileConfig, MigrationConfig, ResolverConfig,
    ResolverMode, SessionConfig, SqlConfig, StorageConfig,
};
