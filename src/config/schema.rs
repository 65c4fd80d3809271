use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::record::DEFAULT_SENTINEL_IP;

// ── Top level ───────────────────────────────────────────────────

/// Root configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that relative paths below are resolved against.
    pub data_dir: PathBuf,
    pub storage: StorageConfig,
    pub sessions: SessionConfig,
    pub resolver: ResolverConfig,
    pub migration: MigrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage: StorageConfig::default(),
            sessions: SessionConfig::default(),
            resolver: ResolverConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "authvault")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the backends cannot work with.
    pub fn validate(&self) -> Result<()> {
        let sql = &self.storage.sql;
        if sql.pool_size == 0 {
            bail!("storage.sql.pool_size must be at least 1");
        }
        if sql.acquire_timeout_ms == 0 {
            bail!("storage.sql.acquire_timeout_ms must be greater than 0");
        }
        for ident in sql.identifiers() {
            if !is_sql_identifier(ident) {
                bail!("'{ident}' is not a valid SQL table/column name");
            }
        }
        if self.storage.default_ip.contains(':') {
            bail!("storage.default_ip must not contain ':' (it is the flat-file delimiter)");
        }
        if self.resolver.mode == ResolverMode::Online && self.resolver.endpoint.is_empty() {
            bail!("resolver.endpoint is required when resolver.mode = \"online\"");
        }
        Ok(())
    }

    /// Resolve a configured path against `data_dir`.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn auth_file(&self) -> PathBuf {
        self.resolve_path(&self.storage.file.path)
    }

    pub fn sql_file(&self) -> PathBuf {
        self.resolve_path(&self.storage.sql.path)
    }

    pub fn legacy_file(&self) -> PathBuf {
        self.resolve_path(&self.migration.legacy_file)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_sql_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── Storage ─────────────────────────────────────────────────────

/// Which durable backend to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Sql,
    /// Volatile, for tests and dry runs.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Wrap the backend in the write-through cache.
    pub cache: bool,
    /// Address substituted when a record has no IP.
    pub default_ip: String,
    pub file: FileConfig,
    pub sql: SqlConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            cache: true,
            default_ip: DEFAULT_SENTINEL_IP.to_string(),
            file: FileConfig::default(),
            sql: SqlConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("auths-uuid.db"),
        }
    }
}

/// Pooled SQLite store settings. Table and column names are configurable
/// so an existing schema can be reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub path: PathBuf,
    /// Fixed pool capacity.
    pub pool_size: u32,
    /// Longest wait for a pooled connection before an operation gives up.
    pub acquire_timeout_ms: u64,
    /// SQLite busy handler timeout per connection.
    pub busy_timeout_ms: u64,
    pub table: String,
    pub column_identity: String,
    pub column_name: String,
    pub column_password: String,
    pub column_ip: String,
    pub column_last_login: String,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("authme.sqlite"),
            pool_size: 10,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 5_000,
            table: "authme".into(),
            column_identity: "uuid".into(),
            column_name: "username".into(),
            column_password: "password".into(),
            column_ip: "ip".into(),
            column_last_login: "lastlogin".into(),
        }
    }
}

impl SqlConfig {
    /// Every name that ends up interpolated into SQL text.
    pub fn identifiers(&self) -> [&str; 6] {
        [
            self.table.as_str(),
            self.column_identity.as_str(),
            self.column_name.as_str(),
            self.column_password.as_str(),
            self.column_ip.as_str(),
            self.column_last_login.as_str(),
        ]
    }
}

// ── Sessions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Allow reconnecting players to resume without a password.
    pub enabled: bool,
    /// Resume window after the last login; 0 = unlimited.
    pub timeout_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_minutes: 10,
        }
    }
}

// ── Identity resolution ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolverMode {
    #[default]
    Offline,
    Online,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub mode: ResolverMode,
    /// Base URL of the profile lookup service.
    pub endpoint: String,
    pub timeout_ms: u64,
    /// Use the offline identity for names the service does not know.
    pub fallback_offline: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mode: ResolverMode::default(),
            endpoint: "https://api.mojang.com".into(),
            timeout_ms: 5_000,
            fallback_offline: false,
        }
    }
}

// ── Migration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Name-keyed file from before stable identities existed.
    pub legacy_file: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            legacy_file: PathBuf::from("auths.db"),
        }
    }
}
