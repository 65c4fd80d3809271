//! Error types for setup paths: backend construction, identity
//! resolution and legacy migration.
//!
//! Per-record storage operations do not use these; they log and return
//! their failure value instead.

use std::path::PathBuf;

/// Failure while opening or preparing a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure with the affected path.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SQLite rejected a setup statement.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The connection pool could not be built.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A configured table or column name is not a plain SQL identifier.
    #[error("invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to map a player name to a stable identity.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The identity service does not know this name.
    #[error("no identity known for '{0}'")]
    NotFound(String),

    /// Transport failure or unexpected status from the identity service.
    #[error("identity service error: {0}")]
    Service(String),

    /// The service answered with something that is not an identity.
    #[error("invalid identity service response: {0}")]
    InvalidResponse(String),
}

impl ResolveError {
    #[inline]
    pub fn service<E: std::fmt::Display>(err: E) -> Self {
        Self::Service(err.to_string())
    }
}

/// Fatal legacy-migration failure. The target file is left as it was
/// before the run (restored from backup when one was taken).
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("unable to create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to move existing backup {path} aside: {source}")]
    RemoveBackup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to back up {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read legacy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migration failed and backup {backup} could not be restored: {source}")]
    Rollback {
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_path() {
        let err = StoreError::io(
            "/tmp/auths.db",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/auths.db"));

        let err = MigrationError::Backup {
            path: PathBuf::from("auths-uuid.db"),
            source: std::io::Error::other("busy"),
        };
        assert!(err.to_string().contains("auths-uuid.db"));
    }

    #[test]
    fn resolve_service_helper_wraps_display() {
        let err = ResolveError::service("timed out");
        assert_eq!(err.to_string(), "identity service error: timed out");
    }
}
