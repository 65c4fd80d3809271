//! The persisted account record and its flat-file line codec.

use std::hash::{Hash, Hasher};

/// Placeholder address stored when a player's IP is unknown or empty.
pub const DEFAULT_SENTINEL_IP: &str = "198.18.0.1";

/// Field delimiter of the flat-file formats. Fields are never escaped.
pub const FIELD_DELIMITER: char = ':';

/// One player account as owned by a storage backend.
///
/// ## Equality
/// Two records compare equal when their `identity` **and** `last_ip` match.
/// This mirrors the legacy data model, where a record doubled as a
/// "session key" for one identity connecting from one address. Use
/// [`AuthRecord::fields_eq`] for full field-wise comparison.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    /// Stable account key; never changes after creation.
    pub identity: String,
    /// Last used player name, lowercase by convention.
    pub display_name: String,
    /// Opaque password hash.
    pub credential_hash: String,
    /// Last seen address, or the sentinel.
    pub last_ip: String,
    /// Unix epoch milliseconds of the last login.
    pub last_login: i64,
}

impl AuthRecord {
    pub fn new(
        identity: impl Into<String>,
        display_name: impl Into<String>,
        credential_hash: impl Into<String>,
        last_ip: impl Into<String>,
        last_login: i64,
    ) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            credential_hash: credential_hash.into(),
            last_ip: last_ip.into(),
            last_login,
        }
    }

    /// True when every field matches, unlike `==` which only looks at
    /// `(identity, last_ip)`.
    pub fn fields_eq(&self, other: &Self) -> bool {
        self.identity == other.identity
            && self.display_name == other.display_name
            && self.credential_hash == other.credential_hash
            && self.last_ip == other.last_ip
            && self.last_login == other.last_login
    }

    /// Overwrite the three session fields in place.
    pub fn apply_session(&mut self, display_name: &str, ip: &str, last_login: i64) {
        self.display_name = display_name.to_string();
        self.last_ip = ip.to_string();
        self.last_login = last_login;
    }

    /// Encode as `identity:displayName:credentialHash:ip:lastLogin`.
    pub fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.identity, self.display_name, self.credential_hash, self.last_ip, self.last_login
        )
    }

    /// Decode a current-format line.
    ///
    /// Returns `None` for lines with fewer than three fields. A missing or
    /// empty IP becomes `default_ip`; a missing or non-numeric timestamp
    /// becomes `0`.
    pub fn parse_line(line: &str, default_ip: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        if fields.len() < 3 {
            return None;
        }

        let last_ip = match fields.get(3) {
            Some(ip) if !ip.is_empty() => (*ip).to_string(),
            _ => default_ip.to_string(),
        };
        let last_login = fields
            .get(4)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0);

        Some(Self {
            identity: fields[0].to_string(),
            display_name: fields[1].to_string(),
            credential_hash: fields[2].to_string(),
            last_ip,
            last_login,
        })
    }
}

impl PartialEq for AuthRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && self.last_ip == other.last_ip
    }
}

impl Eq for AuthRecord {}

impl Hash for AuthRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.last_ip.hash(state);
    }
}

/// Substitute the sentinel for an empty address.
pub fn normalize_ip(ip: &str, default_ip: &str) -> String {
    if ip.is_empty() {
        default_ip.to_string()
    } else {
        ip.to_string()
    }
}
