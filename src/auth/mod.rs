//! Account model and authentication helpers.
//!
//! Provides:
//! - [`AuthRecord`]: the persisted account entity and its flat-file codec
//! - [`SessionCache`]: in-memory "past login" index for connected players
//! - Identity resolution (offline name-based UUIDs or an online profile service)
//! - Salted SHA-256 credential hashes
//!
//! ## Design Decisions
//! - Record equality follows the legacy `(identity, ip)` rule; full
//!   comparison is explicit via [`AuthRecord::fields_eq`].
//! - The session cache is an owned value inside
//!   [`AuthContext`](crate::context::AuthContext), not a global.

pub mod credential;
pub mod identity;
pub mod record;
pub mod session;

pub use identity::{resolver_from_config, HttpResolver, IdentityResolver, OfflineResolver};
pub use record::{AuthRecord, DEFAULT_SENTINEL_IP};
pub use session::SessionCache;
