//! One-shot conversion of the name-keyed account file.
//!
//! Provides:
//! - [`LegacyMigrator`]: rewrites `name:hash[:ip[:lastLogin]]` lines into
//!   identity-keyed records, resolving each name through an
//!   [`IdentityResolver`]
//! - [`MigrationReport`]: converted/skipped counts for the operator
//!
//! ## Design Decisions
//! - A non-empty target is renamed to `<target>.bak` before anything is
//!   written. An older backup is moved to a temp name first and only
//!   deleted once the rename succeeded; on failure it is put back and the
//!   target is untouched.
//! - Output goes to a temp file in the target directory and replaces the
//!   target only once the whole legacy file was processed. A failure after
//!   the backup renames the backup back.
//! - Bad lines, lines that are not UTF-8 and unresolvable names are skipped
//!   and logged, never fatal.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::identity::IdentityResolver;
use crate::auth::record::{AuthRecord, FIELD_DELIMITER};
use crate::error::MigrationError;

type RenameFn = fn(&Path, &Path) -> io::Result<()>;

fn rename_file(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

/// Result of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy file; nothing was touched.
    NothingToDo,
    Completed(MigrationReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub converted: usize,
    pub skipped: usize,
    pub target: PathBuf,
    /// Where the previous target was moved, if it had content.
    pub backup: Option<PathBuf>,
}

impl MigrationReport {
    /// One-line operator message.
    pub fn summary(&self) -> String {
        let file = self
            .target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.target.display().to_string());
        format!(
            "Converted {} accounts to {} ({} skipped)",
            self.converted, file, self.skipped
        )
    }

    /// Skipped lines were logged with their reason.
    pub fn needs_log_review(&self) -> bool {
        self.skipped > 0
    }
}

/// Converts legacy account files.
pub struct LegacyMigrator {
    resolver: Arc<dyn IdentityResolver>,
    default_ip: String,
    rename: RenameFn,
}

impl std::fmt::Debug for LegacyMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyMigrator")
            .field("default_ip", &self.default_ip)
            .finish_non_exhaustive()
    }
}

impl LegacyMigrator {
    pub fn new(resolver: Arc<dyn IdentityResolver>, default_ip: impl Into<String>) -> Self {
        Self {
            resolver,
            default_ip: default_ip.into(),
            rename: rename_file,
        }
    }

    #[cfg(test)]
    fn with_rename(mut self, rename: RenameFn) -> Self {
        self.rename = rename;
        self
    }

    /// Convert `legacy` into `target`.
    pub fn migrate(&self, legacy: &Path, target: &Path) -> Result<MigrationOutcome, MigrationError> {
        if !legacy.is_file() {
            tracing::info!(path = %legacy.display(), "No legacy account file, nothing to migrate");
            return Ok(MigrationOutcome::NothingToDo);
        }

        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|source| MigrationError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        let backup = self.back_up(&dir, target)?;

        match self.convert(legacy, &dir, target) {
            Ok((converted, skipped)) => {
                let report = MigrationReport {
                    converted,
                    skipped,
                    target: target.to_path_buf(),
                    backup,
                };
                tracing::info!(
                    converted,
                    skipped,
                    target = %target.display(),
                    "Legacy migration finished"
                );
                Ok(MigrationOutcome::Completed(report))
            }
            Err(err) => {
                tracing::error!("Legacy migration failed: {err}");
                if let Some(backup) = backup {
                    fs::rename(&backup, target)
                        .map_err(|source| MigrationError::Rollback { backup: backup.clone(), source })?;
                    tracing::info!(target = %target.display(), "Restored previous account file");
                }
                Err(err)
            }
        }
    }

    /// Move a non-empty target aside. Returns the backup path if one was taken.
    fn back_up(&self, dir: &Path, target: &Path) -> Result<Option<PathBuf>, MigrationError> {
        let has_content = fs::metadata(target).map(|m| m.len() > 0).unwrap_or(false);
        if !has_content {
            return Ok(None);
        }

        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".bak");
        let backup = dir.join(name);

        let stash = if fs::symlink_metadata(&backup).is_ok() {
            Some(self.stash_backup(dir, &backup)?)
        } else {
            None
        };

        if let Err(source) = (self.rename)(target, &backup) {
            if let Some(stash) = stash {
                if let Err(e) = fs::rename(&stash, &backup) {
                    tracing::error!(
                        stash = %stash.display(),
                        backup = %backup.display(),
                        "Failed to restore previous backup: {e}"
                    );
                    // Leave the stash on disk for the operator.
                    let _ = stash.keep();
                }
            }
            return Err(MigrationError::Backup {
                path: target.to_path_buf(),
                source,
            });
        }

        if let Some(stash) = stash {
            if let Err(e) = stash.close() {
                tracing::warn!("Failed to delete previous backup: {e}");
            }
        }

        tracing::info!(backup = %backup.display(), "Backed up existing account file");
        Ok(Some(backup))
    }

    /// Move an existing backup to a fresh temp name in `dir`. The returned
    /// path deletes the old backup when dropped.
    fn stash_backup(&self, dir: &Path, backup: &Path) -> Result<tempfile::TempPath, MigrationError> {
        let remove_err = |source| MigrationError::RemoveBackup {
            path: backup.to_path_buf(),
            source,
        };
        let stash = tempfile::Builder::new()
            .prefix(".authvault-bak")
            .tempfile_in(dir)
            .map_err(remove_err)?
            .into_temp_path();
        fs::rename(backup, &stash).map_err(remove_err)?;
        Ok(stash)
    }

    fn convert(&self, legacy: &Path, dir: &Path, target: &Path) -> Result<(usize, usize), MigrationError> {
        let read_err = |source| MigrationError::Read {
            path: legacy.to_path_buf(),
            source,
        };
        let write_err = |source| MigrationError::Write {
            path: target.to_path_buf(),
            source,
        };

        let reader = BufReader::new(fs::File::open(legacy).map_err(read_err)?);
        let mut out = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        let mut converted = 0;
        let mut skipped = 0;

        {
            let mut writer = io::BufWriter::new(out.as_file_mut());
            for (index, chunk) in reader.split(b'\n').enumerate() {
                let mut raw = chunk.map_err(read_err)?;
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                if raw.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let Ok(line) = std::str::from_utf8(&raw) else {
                    tracing::warn!(line = index + 1, "Skipping legacy account line that is not UTF-8");
                    skipped += 1;
                    continue;
                };
                match self.convert_line(line) {
                    Some(record) => {
                        writer.write_all(record.to_line().as_bytes()).map_err(write_err)?;
                        writer.write_all(b"\n").map_err(write_err)?;
                        converted += 1;
                    }
                    None => {
                        tracing::warn!(line = index + 1, "Skipping legacy account line");
                        skipped += 1;
                    }
                }
            }
            writer.flush().map_err(write_err)?;
        }

        out.as_file().sync_all().map_err(write_err)?;
        out.persist(target).map_err(|e| write_err(e.error))?;
        Ok((converted, skipped))
    }

    /// `None` when the line is malformed or the name cannot be resolved.
    fn convert_line(&self, line: &str) -> Option<AuthRecord> {
        let mut fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        // Trailing empty fields do not count, so `Name:` has a single field.
        while fields.last().is_some_and(|field| field.is_empty()) {
            fields.pop();
        }
        if fields.len() < 2 {
            return None;
        }

        let name = fields[0].trim();
        let hash = fields[1].trim();
        if name.is_empty() {
            return None;
        }

        let ip = fields
            .get(2)
            .map(|ip| ip.trim())
            .filter(|ip| !ip.is_empty())
            .unwrap_or(&self.default_ip);
        let last_login = fields
            .get(3)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0);

        let identity = match self.resolver.resolve(name) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(name, "No identity for legacy account: {e}");
                return None;
            }
        };

        Some(AuthRecord::new(identity, name.to_lowercase(), hash, ip, last_login))
    }
}
