//! Player name → stable identity resolution.
//!
//! Two strategies:
//! - [`OfflineResolver`]: deterministic name-based UUID, no network.
//! - [`HttpResolver`]: profile lookup against an online identity service,
//!   optionally falling back to the offline id for unknown names.

use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use serde::Deserialize;

use crate::config::{ResolverConfig, ResolverMode};
use crate::error::ResolveError;

/// Namespace prefix hashed together with the name for offline identities.
const OFFLINE_PREFIX: &str = "OfflinePlayer:";

/// Maps a player name to a stable identity string.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String, ResolveError>;
}

impl<R: IdentityResolver + ?Sized> IdentityResolver for Arc<R> {
    #[inline]
    fn resolve(&self, name: &str) -> Result<String, ResolveError> {
        (**self).resolve(name)
    }
}

// ── Offline ──────────────────────────────────────────────────────

/// Name-based identity: version 3 UUID over MD5(`OfflinePlayer:<name>`).
///
/// The name is hashed exactly as given, so `Steve` and `steve` map to
/// different identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineResolver;

impl OfflineResolver {
    pub fn identity_for(name: &str) -> String {
        let digest = Md5::digest(format!("{OFFLINE_PREFIX}{name}").as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest);
        uuid::Builder::from_md5_bytes(bytes)
            .into_uuid()
            .hyphenated()
            .to_string()
    }
}

impl IdentityResolver for OfflineResolver {
    fn resolve(&self, name: &str) -> Result<String, ResolveError> {
        Ok(Self::identity_for(name))
    }
}

// ── Online ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Profile {
    id: String,
}

/// Blocking lookup against `{endpoint}/users/profiles/minecraft/{name}`.
pub struct HttpResolver {
    client: reqwest::blocking::Client,
    endpoint: String,
    fallback_offline: bool,
}

impl HttpResolver {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        fallback_offline: bool,
    ) -> Result<Self, ResolveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ResolveError::service)?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            fallback_offline,
        })
    }

    fn lookup(&self, name: &str) -> Result<String, ResolveError> {
        let url = format!("{}/users/profiles/minecraft/{}", self.endpoint, name);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(ResolveError::service)?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            return Err(ResolveError::Service(format!("HTTP {status} for '{name}'")));
        }

        let profile: Profile = response
            .json()
            .map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;
        let id = uuid::Uuid::parse_str(&profile.id)
            .map_err(|e| ResolveError::InvalidResponse(format!("{}: {e}", profile.id)))?;
        Ok(id.hyphenated().to_string())
    }
}

impl IdentityResolver for HttpResolver {
    fn resolve(&self, name: &str) -> Result<String, ResolveError> {
        match self.lookup(name) {
            Err(ResolveError::NotFound(_)) if self.fallback_offline => {
                tracing::debug!(name, "Unknown to identity service, using offline identity");
                Ok(OfflineResolver::identity_for(name))
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for HttpResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResolver")
            .field("endpoint", &self.endpoint)
            .field("fallback_offline", &self.fallback_offline)
            .finish_non_exhaustive()
    }
}

/// Build the resolver selected by configuration.
pub fn resolver_from_config(
    config: &ResolverConfig,
) -> Result<Arc<dyn IdentityResolver>, ResolveError> {
    match config.mode {
        ResolverMode::Offline => Ok(Arc::new(OfflineResolver)),
        ResolverMode::Online => Ok(Arc::new(HttpResolver::new(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
            config.fallback_offline,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn offline_identity_is_stable_v3_uuid() {
        let a = OfflineResolver::identity_for("Steve");
        let b = OfflineResolver.resolve("Steve").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 36);

        let parsed = uuid::Uuid::parse_str(&a).unwrap();
        assert_eq!(parsed.get_version_num(), 3);
        assert_eq!(parsed.get_variant(), uuid::Variant::RFC4122);
    }

    #[test]
    fn offline_identity_is_case_sensitive() {
        assert_ne!(
            OfflineResolver::identity_for("Steve"),
            OfflineResolver::identity_for("steve")
        );
    }

    // The blocking client must be built, used and dropped off the runtime.
    async fn resolve_blocking(
        endpoint: String,
        fallback_offline: bool,
        name: &'static str,
    ) -> Result<String, ResolveError> {
        tokio::task::spawn_blocking(move || {
            let resolver = HttpResolver::new(endpoint, Duration::from_secs(5), fallback_offline)?;
            resolver.resolve(name)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn online_lookup_hyphenates_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/profiles/minecraft/Notch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "069a79f444e94726a5befca90e38aaf5",
                "name": "Notch"
            })))
            .mount(&server)
            .await;

        let id = resolve_blocking(server.uri(), false, "Notch").await.unwrap();
        assert_eq!(id, "069a79f4-44e9-4726-a5be-fca90e38aaf5");
    }

    #[tokio::test]
    async fn online_unknown_name_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/profiles/minecraft/ghost"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let err = resolve_blocking(server.uri(), false, "ghost").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn online_unknown_name_falls_back_to_offline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let id = resolve_blocking(server.uri(), true, "ghost").await.unwrap();
        assert_eq!(id, OfflineResolver::identity_for("ghost"));
    }

    #[tokio::test]
    async fn online_server_error_is_service_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = resolve_blocking(server.uri(), true, "anyone").await.unwrap_err();
        assert!(matches!(err, ResolveError::Service(_)));
    }

    #[tokio::test]
    async fn online_garbage_id_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "nope" })),
            )
            .mount(&server)
            .await;

        let err = resolve_blocking(server.uri(), false, "anyone").await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidResponse(_)));
    }

    #[test]
    fn config_selects_offline_by_default() {
        let resolver = resolver_from_config(&ResolverConfig::default()).unwrap();
        assert_eq!(
            resolver.resolve("Alex").unwrap(),
            OfflineResolver::identity_for("Alex")
        );
    }
}
