//! Salted SHA-256 password hashes in the `$SHA$<salt>$<hex>` format.
//!
//! The storage layer treats these strings as opaque; only the operator
//! binary and [`AuthContext`](crate::context::AuthContext) produce or check them.

use sha2::{Digest, Sha256};

/// Prefix identifying the hash scheme.
const SCHEME_PREFIX: &str = "$SHA$";

/// Salt length in hex characters.
const SALT_CHARS: usize = 16;

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt = generate_salt();
    hash_with_salt(password, &salt)
}

/// Check a password against a stored `$SHA$` hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some(rest) = stored.strip_prefix(SCHEME_PREFIX) else {
        return false;
    };
    let Some((salt, _)) = rest.split_once('$') else {
        return false;
    };
    let attempt = hash_with_salt(password, salt);
    constant_time_eq(attempt.as_bytes(), stored.as_bytes())
}

fn hash_with_salt(password: &str, salt: &str) -> String {
    let inner = sha256_hex(password.as_bytes());
    let outer = sha256_hex(format!("{inner}{salt}").as_bytes());
    format!("{SCHEME_PREFIX}{salt}${outer}")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Random hex salt (v4 UUID entropy).
fn generate_salt() -> String {
    let mut salt = uuid::Uuid::new_v4().simple().to_string();
    salt.truncate(SALT_CHARS);
    salt
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
