//! Pooled SQLite backend.
//!
//! One table, names configurable so an existing schema can be adopted:
//!
//! ```text
//! id INTEGER PRIMARY KEY AUTOINCREMENT
//! <identity>   VARCHAR(36)  NOT NULL   UNIQUE
//! <name>       VARCHAR(255) NOT NULL
//! <password>   VARCHAR(255) NOT NULL
//! <ip>         VARCHAR(40)  NOT NULL
//! <lastlogin>  BIGINT
//! ```
//!
//! Every operation borrows a connection from the pool for its duration
//! only. Failures (including pool acquisition timeouts) are logged and
//! surface as `false`, `None` or `0`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::auth::record::{normalize_ip, AuthRecord};
use crate::config::schema::{is_sql_identifier, SqlConfig};
use crate::error::StoreError;

use super::traits::StorageBackend;

type Conn = PooledConnection<SqliteConnectionManager>;

/// Validated table and column names.
#[derive(Debug, Clone)]
struct Columns {
    table: String,
    identity: String,
    name: String,
    password: String,
    ip: String,
    last_login: String,
}

impl Columns {
    fn from_config(config: &SqlConfig) -> Result<Self, StoreError> {
        for ident in config.identifiers() {
            if !is_sql_identifier(ident) {
                return Err(StoreError::InvalidIdentifier(ident.to_string()));
            }
        }
        Ok(Self {
            table: config.table.clone(),
            identity: config.column_identity.clone(),
            name: config.column_name.clone(),
            password: config.column_password.clone(),
            ip: config.column_ip.clone(),
            last_login: config.column_last_login.clone(),
        })
    }

    /// `(column, type)` for every data column, in record order.
    fn definitions(&self) -> [(&str, &str); 5] {
        [
            (self.identity.as_str(), "VARCHAR(36) NOT NULL"),
            (self.name.as_str(), "VARCHAR(255) NOT NULL"),
            (self.password.as_str(), "VARCHAR(255) NOT NULL"),
            (self.ip.as_str(), "VARCHAR(40) NOT NULL"),
            (self.last_login.as_str(), "BIGINT"),
        ]
    }
}

/// SQLite store behind an r2d2 pool.
pub struct SqlBackend {
    path: PathBuf,
    columns: Columns,
    default_ip: String,
    /// `None` once closed.
    pool: RwLock<Option<Pool<SqliteConnectionManager>>>,
}

impl std::fmt::Debug for SqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBackend")
            .field("path", &self.path)
            .field("table", &self.columns.table)
            .field("closed", &self.pool.read().is_none())
            .finish_non_exhaustive()
    }
}

impl SqlBackend {
    /// Open the database at `path`, build the pool and bring the schema
    /// up to date.
    pub fn open(
        path: impl Into<PathBuf>,
        config: &SqlConfig,
        default_ip: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let columns = Columns::from_config(config)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            // WAL mode for concurrent readers
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )
        });
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .build(manager)?;

        let backend = Self {
            path,
            columns,
            default_ip: default_ip.into(),
            pool: RwLock::new(Some(pool)),
        };
        backend.setup()?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn setup(&self) -> Result<(), StoreError> {
        let guard = self.pool.read();
        let Some(pool) = guard.as_ref() else {
            return Ok(());
        };
        let conn = pool.get()?;
        let c = &self.columns;

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                {identity} VARCHAR(36) NOT NULL,
                {name} VARCHAR(255) NOT NULL,
                {password} VARCHAR(255) NOT NULL,
                {ip} VARCHAR(40) NOT NULL,
                {last_login} BIGINT
            );",
            table = c.table,
            identity = c.identity,
            name = c.name,
            password = c.password,
            ip = c.ip,
            last_login = c.last_login,
        ))?;

        let present = existing_columns(&conn, &c.table)?;
        for (column, ty) in c.definitions() {
            if present.iter().any(|p| p.eq_ignore_ascii_case(column)) {
                continue;
            }
            // SQLite refuses NOT NULL additions without a default
            let ty = if ty.ends_with("NOT NULL") {
                format!("{ty} DEFAULT ''")
            } else {
                ty.to_string()
            };
            conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {column} {ty};", c.table))?;
            tracing::info!(table = %c.table, column, "Added missing auth column");
        }

        // Existing duplicate identities make this fail; the table is still usable.
        if let Err(e) = conn.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_{identity} ON {table} ({identity});",
            table = c.table,
            identity = c.identity,
        )) {
            tracing::debug!(table = %c.table, "Unique identity index not created: {e}");
        }

        tracing::info!(path = %self.path.display(), table = %c.table, "SQLite auth store ready");
        Ok(())
    }

    /// Run `f` with a pooled connection. `None` when closed, when no
    /// connection is available in time, or when `f` fails.
    fn with_conn<T>(&self, op: &str, f: impl FnOnce(&Conn) -> rusqlite::Result<T>) -> Option<T> {
        let guard = self.pool.read();
        let Some(pool) = guard.as_ref() else {
            tracing::warn!(op, "SQLite auth store used after close");
            return None;
        };
        let conn = match pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(op, "No database connection available: {e}");
                return None;
            }
        };
        match f(&conn) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(op, "SQLite auth store query failed: {e}");
                None
            }
        }
    }
}

fn existing_columns(conn: &Conn, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    names.collect()
}

impl StorageBackend for SqlBackend {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn exists(&self, identity: &str) -> bool {
        let c = &self.columns;
        let sql = format!("SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1", c.table, c.identity);
        self.with_conn("exists", |conn| {
            conn.query_row(&sql, params![identity], |_| Ok(()))
                .optional()
                .map(|row| row.is_some())
        })
        .unwrap_or(false)
    }

    fn fetch(&self, identity: &str) -> Option<AuthRecord> {
        let c = &self.columns;
        let sql = format!(
            "SELECT {id}, {name}, {pw}, {ip}, COALESCE({ll}, 0) FROM {table} WHERE {id} = ?1 LIMIT 1",
            id = c.identity,
            name = c.name,
            pw = c.password,
            ip = c.ip,
            ll = c.last_login,
            table = c.table,
        );
        self.with_conn("fetch", |conn| {
            conn.query_row(&sql, params![identity], |row| {
                let ip: String = row.get(3)?;
                Ok(AuthRecord::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    normalize_ip(&ip, &self.default_ip),
                    row.get::<_, i64>(4)?,
                ))
            })
            .optional()
        })
        .flatten()
    }

    fn create(&self, record: &AuthRecord) -> bool {
        let c = &self.columns;
        let sql = format!(
            "INSERT INTO {table} ({id}, {name}, {pw}, {ip}, {ll})
             SELECT ?1, ?2, ?3, ?4, ?5
             WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {id} = ?1)",
            table = c.table,
            id = c.identity,
            name = c.name,
            pw = c.password,
            ip = c.ip,
            ll = c.last_login,
        );
        let inserted = self
            .with_conn("create", |conn| {
                conn.execute(
                    &sql,
                    params![
                        record.identity,
                        record.display_name,
                        record.credential_hash,
                        record.last_ip,
                        record.last_login,
                    ],
                )
            })
            .unwrap_or(0);
        if inserted == 0 {
            tracing::debug!(identity = %record.identity, "Auth record not created");
        }
        inserted > 0
    }

    fn update_credential(&self, identity: &str, credential_hash: &str) -> bool {
        let c = &self.columns;
        let sql = format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", c.table, c.password, c.identity);
        self.with_conn("update_credential", |conn| {
            conn.execute(&sql, params![credential_hash, identity])
        })
        .is_some_and(|rows| rows > 0)
    }

    fn update_session(&self, identity: &str, display_name: &str, ip: &str, last_login: i64) -> bool {
        let c = &self.columns;
        let sql = format!(
            "UPDATE {} SET {} = ?1, {} = ?2, {} = ?3 WHERE {} = ?4",
            c.table, c.name, c.ip, c.last_login, c.identity
        );
        self.with_conn("update_session", |conn| {
            conn.execute(&sql, params![display_name, ip, last_login, identity])
        })
        .is_some_and(|rows| rows > 0)
    }

    fn delete(&self, identity: &str) -> bool {
        let c = &self.columns;
        let sql = format!("DELETE FROM {} WHERE {} = ?1", c.table, c.identity);
        self.with_conn("delete", |conn| conn.execute(&sql, params![identity]))
            .is_some_and(|rows| rows > 0)
    }

    fn purge_older_than(&self, cutoff: i64) -> usize {
        let c = &self.columns;
        let sql = format!(
            "DELETE FROM {} WHERE COALESCE({}, 0) < ?1",
            c.table, c.last_login
        );
        self.with_conn("purge", |conn| conn.execute(&sql, params![cutoff]))
            .unwrap_or(0)
    }

    fn close(&self) {
        if self.pool.write().take().is_some() {
            tracing::info!(path = %self.path.display(), "SQLite auth store closed");
        }
    }
}
