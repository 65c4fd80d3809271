//! Process-level wiring: the active store, the session cache and the
//! identity resolver, built once from [`Config`] and passed around
//! explicitly.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::auth::credential;
use crate::auth::identity::{resolver_from_config, IdentityResolver};
use crate::auth::record::AuthRecord;
use crate::auth::session::SessionCache;
use crate::config::{Config, SessionConfig};
use crate::error::{ResolveError, StoreError};
use crate::storage::{create_store, StorageBackend};

const MILLIS_PER_MINUTE: i64 = 60_000;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Result of [`AuthContext::register`].
#[derive(Debug)]
pub enum RegisterOutcome {
    Registered { identity: String },
    AlreadyRegistered,
    /// The name could not be mapped to an identity.
    Unresolved(ResolveError),
    /// The store refused or failed the write (details are in the log).
    StoreFailed,
}

/// Shared authentication state for one running server.
pub struct AuthContext {
    store: RwLock<Arc<dyn StorageBackend>>,
    sessions: SessionCache,
    resolver: Arc<dyn IdentityResolver>,
    session_config: RwLock<SessionConfig>,
    default_ip: String,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("store", &self.store.read().name())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl AuthContext {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        resolver: Arc<dyn IdentityResolver>,
        session_config: SessionConfig,
        default_ip: impl Into<String>,
    ) -> Self {
        Self {
            store: RwLock::new(store),
            sessions: SessionCache::new(),
            resolver,
            session_config: RwLock::new(session_config),
            default_ip: default_ip.into(),
        }
    }

    /// Open the configured store and resolver.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = create_store(config).context("Failed to open auth store")?;
        let resolver =
            resolver_from_config(&config.resolver).context("Failed to set up identity resolver")?;
        Ok(Self::new(
            store,
            resolver,
            config.sessions.clone(),
            config.storage.default_ip.clone(),
        ))
    }

    /// The store currently in use.
    pub fn store(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.store.read())
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn identity_of(&self, name: &str) -> Result<String, ResolveError> {
        self.resolver.resolve(name)
    }

    /// Stored record for a player name, if any.
    pub fn lookup(&self, name: &str) -> Option<AuthRecord> {
        let identity = self.resolve_logged(name)?;
        self.store().fetch(&identity)
    }

    // ── Account administration ──────────────────────────────────

    pub fn register(&self, name: &str, password: &str) -> RegisterOutcome {
        let identity = match self.identity_of(name) {
            Ok(identity) => identity,
            Err(e) => return RegisterOutcome::Unresolved(e),
        };

        let store = self.store();
        if store.exists(&identity) {
            return RegisterOutcome::AlreadyRegistered;
        }

        let record = AuthRecord::new(
            identity.clone(),
            name.to_lowercase(),
            credential::hash_password(password),
            self.default_ip.clone(),
            0,
        );
        if !store.create(&record) {
            return RegisterOutcome::StoreFailed;
        }

        tracing::info!(%identity, name, "Account registered");
        RegisterOutcome::Registered { identity }
    }

    pub fn change_password(&self, name: &str, password: &str) -> bool {
        let Some(identity) = self.resolve_logged(name) else {
            return false;
        };
        let store = self.store();
        if !store.exists(&identity) {
            return false;
        }
        let changed = store.update_credential(&identity, &credential::hash_password(password));
        if changed {
            tracing::info!(%identity, name, "Password changed");
        }
        changed
    }

    /// Delete the account and end any session it has.
    pub fn unregister(&self, name: &str) -> bool {
        let Some(identity) = self.resolve_logged(name) else {
            return false;
        };
        if !self.store().delete(&identity) {
            return false;
        }
        self.sessions.remove(&identity);
        tracing::info!(%identity, name, "Account unregistered");
        true
    }

    // ── Login flow ───────────────────────────────────────────────

    /// Check a password against the stored hash.
    pub fn check_password(&self, identity: &str, password: &str) -> bool {
        self.store()
            .fetch(identity)
            .is_some_and(|record| credential::verify_password(password, &record.credential_hash))
    }

    /// Persist the login and mark the identity authenticated.
    pub fn login(&self, identity: &str, name: &str, ip: &str, now: i64) -> bool {
        let store = self.store();
        let Some(mut record) = store.fetch(identity) else {
            return false;
        };

        let name = name.to_lowercase();
        if !store.update_session(identity, &name, ip, now) {
            return false;
        }
        record.apply_session(&name, ip, now);
        self.sessions.add(record);
        true
    }

    /// Authenticate without a password when the player reconnects with
    /// the same name and address inside the session window.
    pub fn resume_session(&self, identity: &str, name: &str, ip: &str, now: i64) -> bool {
        let settings = self.session_config.read().clone();
        if !settings.enabled {
            return false;
        }
        let Some(record) = self.store().fetch(identity) else {
            return false;
        };

        let timeout = i64::try_from(settings.timeout_minutes)
            .unwrap_or(i64::MAX)
            .saturating_mul(MILLIS_PER_MINUTE);
        let within_window = timeout == 0 || now.saturating_sub(record.last_login) < timeout;
        if record.display_name != name.to_lowercase() || record.last_ip != ip || !within_window {
            return false;
        }

        tracing::info!(identity, ip, "Session resumed");
        self.sessions.add(record);
        true
    }

    pub fn logout(&self, identity: &str) -> bool {
        self.sessions.remove(identity).is_some()
    }

    pub fn is_authenticated(&self, identity: &str) -> bool {
        self.sessions.is_authenticated(identity)
    }

    // ── Housekeeping ─────────────────────────────────────────────

    /// Remove accounts that have not logged in for `days` days.
    pub fn purge_inactive_days(&self, days: u64, now: i64) -> usize {
        let span = i64::try_from(days)
            .unwrap_or(i64::MAX)
            .saturating_mul(MILLIS_PER_DAY);
        let cutoff = now.saturating_sub(span);
        let removed = self.store().purge_older_than(cutoff);
        tracing::info!(days, removed, "Purged inactive accounts");
        removed
    }

    /// Build a store from `config`, swap it in and close the old one.
    /// Session settings are refreshed too; open sessions are kept.
    pub fn reload_store(&self, config: &Config) -> Result<(), StoreError> {
        let fresh = create_store(config)?;
        let old = std::mem::replace(&mut *self.store.write(), fresh);
        *self.session_config.write() = config.sessions.clone();
        old.close();
        tracing::info!(backend = self.store().name(), "Auth store reloaded");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.store().close();
        tracing::info!("Auth store closed");
    }

    fn resolve_logged(&self, name: &str) -> Option<String> {
        match self.identity_of(name) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!(name, "Identity lookup failed: {e}");
                None
            }
        }
    }
}
