//! Flat-file backend.
//!
//! Layout, one record per line, no header:
//!
//! ```text
//! identity:displayName:credentialHash:ip:lastLoginEpochMillis
//! ```
//!
//! There is no in-memory index. Every lookup scans the file and every
//! mutation rewrites it whole (temp file in the same directory, then
//! rename), all under one per-instance lock.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::auth::record::{AuthRecord, FIELD_DELIMITER};
use crate::error::StoreError;

use super::traits::StorageBackend;

/// One non-blank line of the file.
#[derive(Debug)]
enum Line {
    Record(AuthRecord),
    /// Fewer than three fields, or not UTF-8. Carried through rewrites
    /// byte for byte.
    Unparsed(Vec<u8>),
}

impl Line {
    fn has_identity(&self, identity: &str) -> bool {
        match self {
            Self::Record(record) => record.identity == identity,
            Self::Unparsed(raw) => {
                let end = raw
                    .iter()
                    .position(|&b| b == FIELD_DELIMITER as u8)
                    .unwrap_or(raw.len());
                &raw[..end] == identity.as_bytes()
            }
        }
    }

    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Self::Record(record) => writer.write_all(record.to_line().as_bytes())?,
            Self::Unparsed(raw) => writer.write_all(raw)?,
        }
        writer.write_all(b"\n")
    }
}

/// Flat-file store guarded by a single lock.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    default_ip: String,
    lock: Mutex<()>,
}

impl FileBackend {
    /// Open the store at `path`, creating the file and its parent
    /// directory when missing.
    pub fn open(path: impl Into<PathBuf>, default_ip: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::debug!(path = %path.display(), "Flat-file auth store ready");
        Ok(Self {
            path,
            default_ip: default_ip.into(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every parsable record, in file order.
    pub fn records(&self) -> Vec<AuthRecord> {
        let _guard = self.lock.lock();
        match self.read_lines() {
            Ok(lines) => lines
                .into_iter()
                .filter_map(|line| match line {
                    Line::Record(record) => Some(record),
                    Line::Unparsed(_) => None,
                })
                .collect(),
            Err(e) => {
                self.log_read_error(&e);
                Vec::new()
            }
        }
    }

    fn read_lines(&self) -> io::Result<Vec<Line>> {
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut lines = Vec::new();
        for (index, chunk) in reader.split(b'\n').enumerate() {
            let mut raw = chunk?;
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let parsed = match std::str::from_utf8(&raw) {
                Ok(text) => AuthRecord::parse_line(text, &self.default_ip),
                Err(_) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        "Auth file line is not valid UTF-8"
                    );
                    None
                }
            };
            match parsed {
                Some(record) => lines.push(Line::Record(record)),
                None => lines.push(Line::Unparsed(raw)),
            }
        }
        Ok(lines)
    }

    /// Replace the file contents in one pass.
    fn write_lines(&self, lines: &[Line]) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = io::BufWriter::new(tmp.as_file_mut());
            for line in lines {
                line.write_to(&mut writer)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Read, transform, write back. The closure returns the operation
    /// result and whether anything changed; unchanged files are not
    /// rewritten. `None` on I/O failure.
    fn rewrite<T>(&self, op: &str, f: impl FnOnce(&mut Vec<Line>) -> (T, bool)) -> Option<T> {
        let _guard = self.lock.lock();
        let mut lines = match self.read_lines() {
            Ok(lines) => lines,
            Err(e) => {
                self.log_read_error(&e);
                return None;
            }
        };

        let (result, changed) = f(&mut lines);
        if changed {
            if let Err(e) = self.write_lines(&lines) {
                tracing::error!(path = %self.path.display(), op, "Failed to rewrite auth file: {e}");
                return None;
            }
        }
        Some(result)
    }

    fn log_read_error(&self, e: &io::Error) {
        tracing::warn!(path = %self.path.display(), "Failed to read auth file: {e}");
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn exists(&self, identity: &str) -> bool {
        let _guard = self.lock.lock();
        match self.read_lines() {
            Ok(lines) => lines.iter().any(|line| line.has_identity(identity)),
            Err(e) => {
                self.log_read_error(&e);
                false
            }
        }
    }

    fn fetch(&self, identity: &str) -> Option<AuthRecord> {
        let _guard = self.lock.lock();
        match self.read_lines() {
            Ok(lines) => lines.into_iter().find_map(|line| match line {
                Line::Record(record) if record.identity == identity => Some(record),
                _ => None,
            }),
            Err(e) => {
                self.log_read_error(&e);
                None
            }
        }
    }

    fn create(&self, record: &AuthRecord) -> bool {
        self.rewrite("create", |lines| {
            if lines.iter().any(|line| line.has_identity(&record.identity)) {
                return (false, false);
            }
            lines.push(Line::Record(record.clone()));
            (true, true)
        })
        .unwrap_or(false)
    }

    fn update_credential(&self, identity: &str, credential_hash: &str) -> bool {
        self.rewrite("update_credential", |lines| {
            let found = lines.iter_mut().find_map(|line| match line {
                Line::Record(record) if record.identity == identity => Some(record),
                _ => None,
            });
            match found {
                Some(record) => {
                    record.credential_hash = credential_hash.to_string();
                    (true, true)
                }
                None => (false, false),
            }
        })
        .unwrap_or(false)
    }

    fn update_session(&self, identity: &str, display_name: &str, ip: &str, last_login: i64) -> bool {
        self.rewrite("update_session", |lines| {
            let found = lines.iter_mut().find_map(|line| match line {
                Line::Record(record) if record.identity == identity => Some(record),
                _ => None,
            });
            match found {
                Some(record) => {
                    record.apply_session(display_name, ip, last_login);
                    (true, true)
                }
                None => (false, false),
            }
        })
        .unwrap_or(false)
    }

    fn delete(&self, identity: &str) -> bool {
        self.rewrite("delete", |lines| {
            let before = lines.len();
            lines.retain(|line| !line.has_identity(identity));
            let removed = lines.len() != before;
            (removed, removed)
        })
        .unwrap_or(false)
    }

    fn purge_older_than(&self, cutoff: i64) -> usize {
        self.rewrite("purge", |lines| {
            let before = lines.len();
            lines.retain(|line| match line {
                Line::Record(record) => record.last_login >= cutoff,
                Line::Unparsed(_) => true,
            });
            let removed = before - lines.len();
            (removed, removed > 0)
        })
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::record::DEFAULT_SENTINEL_IP;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, FileBackend) {
        let tmp = TempDir::new().unwrap();
        let store = FileBackend::open(tmp.path().join("auths-uuid.db"), DEFAULT_SENTINEL_IP).unwrap();
        (tmp, store)
    }

    fn record(identity: &str, last_login: i64) -> AuthRecord {
        AuthRecord::new(identity, format!("name-{identity}"), "$SHA$s$h", "10.0.0.1", last_login)
    }

    #[test]
    fn open_creates_file_and_parent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("auths-uuid.db");
        let store = FileBackend::open(&path, DEFAULT_SENTINEL_IP).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
        assert!(store.records().is_empty());
    }

    #[test]
    fn create_then_fetch_roundtrip() {
        let (_tmp, store) = test_store();
        let r = record("id-1", 1000);

        assert!(store.create(&r));
        assert!(store.exists("id-1"));
        assert!(store.fetch("id-1").unwrap().fields_eq(&r));
    }

    #[test]
    fn duplicate_create_leaves_record_unchanged() {
        let (_tmp, store) = test_store();
        let original = record("id-1", 1000);
        assert!(store.create(&original));

        let imposter = AuthRecord::new("id-1", "mallory", "other", "6.6.6.6", 5);
        assert!(!store.create(&imposter));
        assert!(store.fetch("id-1").unwrap().fields_eq(&original));
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn update_credential_changes_only_hash() {
        let (_tmp, store) = test_store();
        let r = record("id-1", 1000);
        store.create(&r);

        assert!(store.update_credential("id-1", "new-hash"));
        let fetched = store.fetch("id-1").unwrap();
        assert_eq!(fetched.credential_hash, "new-hash");
        assert_eq!(fetched.display_name, r.display_name);
        assert_eq!(fetched.last_ip, r.last_ip);
        assert_eq!(fetched.last_login, r.last_login);

        assert!(!store.update_credential("ghost", "x"));
    }

    #[test]
    fn update_session_keeps_hash() {
        let (_tmp, store) = test_store();
        store.create(&record("id-1", 1000));

        assert!(store.update_session("id-1", "renamed", "8.8.8.8", 2000));
        let fetched = store.fetch("id-1").unwrap();
        assert_eq!(fetched.display_name, "renamed");
        assert_eq!(fetched.last_ip, "8.8.8.8");
        assert_eq!(fetched.last_login, 2000);
        assert_eq!(fetched.credential_hash, "$SHA$s$h");

        assert!(!store.update_session("ghost", "x", "y", 1));
    }

    #[test]
    fn delete_twice() {
        let (_tmp, store) = test_store();
        store.create(&record("id-1", 1000));
        store.create(&record("id-2", 1000));

        assert!(store.delete("id-1"));
        assert!(!store.exists("id-1"));
        assert!(!store.delete("id-1"));
        assert!(store.exists("id-2"));
    }

    #[test]
    fn purge_removes_strictly_older() {
        let (_tmp, store) = test_store();
        store.create(&record("old", 10));
        store.create(&record("older", 5));
        store.create(&record("edge", 100));
        store.create(&record("new", 500));

        assert_eq!(store.purge_older_than(100), 2);
        let left: Vec<String> = store.records().into_iter().map(|r| r.identity).collect();
        assert_eq!(left, vec!["edge".to_string(), "new".to_string()]);

        assert_eq!(store.purge_older_than(100), 0);
    }

    #[test]
    fn reads_tolerate_short_and_bad_fields() {
        let (_tmp, store) = test_store();
        std::fs::write(
            store.path(),
            "id-1:alice:h1\n\nid-2:bob:h2::abc\nid-3:carol:h3:9.9.9.9:77\n",
        )
        .unwrap();

        let records = store.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].last_ip, DEFAULT_SENTINEL_IP);
        assert_eq!(records[0].last_login, 0);
        assert_eq!(records[1].last_ip, DEFAULT_SENTINEL_IP);
        assert_eq!(records[1].last_login, 0);
        assert_eq!(records[2].last_ip, "9.9.9.9");
        assert_eq!(records[2].last_login, 77);
    }

    #[test]
    fn n_records_roundtrip_through_file() {
        let (_tmp, store) = test_store();
        let written: Vec<AuthRecord> = (0..25).map(|i| record(&format!("id-{i}"), i * 10)).collect();
        for r in &written {
            assert!(store.create(r));
        }

        let reopened = FileBackend::open(store.path(), DEFAULT_SENTINEL_IP).unwrap();
        let read = reopened.records();
        assert_eq!(read.len(), written.len());
        for r in &written {
            assert!(read.iter().any(|x| x.fields_eq(r)));
        }
    }

    #[test]
    fn unparsable_lines_survive_rewrites() {
        let (_tmp, store) = test_store();
        std::fs::write(store.path(), "garbage\nid-1:alice:h1:1.1.1.1:5\n").unwrap();

        assert!(store.update_credential("id-1", "h2"));
        assert_eq!(store.purge_older_than(1_000), 1);

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents, "garbage\n");
    }

    #[test]
    fn invalid_utf8_line_does_not_block_other_records() {
        let (_tmp, store) = test_store();
        std::fs::write(store.path(), b"id-1:alice:h:1.1.1.1:5\n\xff\xfe:bad:h\n").unwrap();

        assert!(store.exists("id-1"));
        assert_eq!(store.fetch("id-1").unwrap().display_name, "alice");
        assert!(store.create(&record("id-2", 7)));
        assert!(store.update_credential("id-1", "h2"));

        let contents = std::fs::read(store.path()).unwrap();
        assert!(contents.windows(8).any(|w| w == b"\xff\xfe:bad:h"));
        assert_eq!(store.records().len(), 2);
        assert!(store.delete("id-1"));
        assert!(store.exists("id-2"));
    }

    #[test]
    fn missing_file_fails_gracefully() {
        let (_tmp, store) = test_store();
        std::fs::remove_file(store.path()).unwrap();

        assert!(!store.exists("id-1"));
        assert!(store.fetch("id-1").is_none());
        assert!(!store.create(&record("id-1", 1)));
        assert!(!store.update_credential("id-1", "h"));
        assert_eq!(store.purge_older_than(10), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn concurrent_creates_are_all_kept() {
        let (_tmp, store) = test_store();
        let store = Arc::new(store);

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..20 {
                        assert!(store.create(&record(&format!("w{worker}-{i}"), i)));
                    }
                });
            }
        });

        assert_eq!(store.records().len(), 80);
    }
}
