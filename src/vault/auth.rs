//! # Vault Authentication
//!
//! Produces a usable bearer token for the Vault API, either a static value
//! from the resource spec or a cached, auto-refreshed token exchanged for a
//! Kubernetes service-account JWT.
//!
//! The exchanged variant caches its token under a read-write lock: cache hits
//! (the overwhelming majority) take the read side only. The lock protects the
//! cache fields, not the network call, so two reconciliations racing through
//! a refresh may both log in; duplicate logins are harmless.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::authentication::v1::TokenRequest;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::PostParams;
use kube::{Api, Client};
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::client::VaultClient;
use super::error::VaultError;

/// Projected token location inside a pod with automounted credentials.
const AUTO_MOUNT_TOKEN_PATH: &str = "/run/secrets/kubernetes.io/serviceaccount/token";

/// A source of Vault bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, VaultError>;
}

/// Fixed token taken verbatim from the resource spec. Cannot fail.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, VaultError> {
        Ok(self.0.clone())
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct CachedToken {
    value: String,
    #[zeroize(skip)]
    expires_at: DateTime<Utc>,
}

/// Exchanges a service-account JWT for a short-lived Vault token and caches
/// it until `refresh_margin` before expiry.
pub struct ServiceAccountAuth {
    name: String,
    namespace: String,
    role: String,
    auth_path: String,
    refresh_margin: Duration,
    vault: VaultClient,
    /// `None` means the JWT is read from the automounted projected token
    /// file instead of the TokenRequest API.
    kube: Option<Client>,
    cache: RwLock<Option<CachedToken>>,
}

impl fmt::Debug for ServiceAccountAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountAuth")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("role", &self.role)
            .field("auth_path", &self.auth_path)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountAuth {
    pub fn new(
        vault: VaultClient,
        kube: Option<Client>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        role: impl Into<String>,
        auth_path: impl Into<String>,
        refresh_margin: std::time::Duration,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            role: role.into(),
            auth_path: auth_path.into(),
            refresh_margin: Duration::from_std(refresh_margin).unwrap_or_else(|_| Duration::seconds(60)),
            vault,
            kube,
            cache: RwLock::new(None),
        }
    }

    async fn cached(&self) -> Option<String> {
        let guard = self.cache.read().await;
        let cached = guard.as_ref()?;
        (Utc::now() + self.refresh_margin < cached.expires_at).then(|| cached.value.clone())
    }

    async fn fetch_jwt(&self) -> Result<String, VaultError> {
        match &self.kube {
            None => tokio::fs::read_to_string(AUTO_MOUNT_TOKEN_PATH)
                .await
                .map(|token| token.trim().to_string())
                .map_err(|e| {
                    VaultError::IdentityUnavailable(format!(
                        "could not read {AUTO_MOUNT_TOKEN_PATH:?}: {e}"
                    ))
                }),
            Some(client) => {
                let accounts: Api<ServiceAccount> =
                    Api::namespaced(client.clone(), &self.namespace);
                let issued = accounts
                    .create_token_request(&self.name, &PostParams::default(), &TokenRequest::default())
                    .await
                    .map_err(|e| {
                        VaultError::IdentityUnavailable(format!(
                            "token request for {}/{} failed: {e}",
                            self.namespace, self.name
                        ))
                    })?;
                issued
                    .status
                    .map(|status| status.token)
                    .ok_or_else(|| {
                        VaultError::IdentityUnavailable(
                            "token request returned no status".to_string(),
                        )
                    })
            }
        }
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountAuth {
    async fn token(&self) -> Result<String, VaultError> {
        if let Some(token) = self.cached().await {
            return Ok(token);
        }

        let jwt = self.fetch_jwt().await?;
        let issued_at = Utc::now();
        let (token, ttl) = match self.vault.login(&self.auth_path, &self.role, &jwt).await {
            Ok(login) => {
                crate::metrics::increment_vault_logins();
                login
            }
            Err(e) => {
                crate::metrics::increment_vault_login_errors();
                return Err(e);
            }
        };
        let expires_at = token_expiry(issued_at, ttl);

        debug!(
            service_account = %self.name,
            namespace = %self.namespace,
            ttl,
            "exchanged service-account JWT for Vault token"
        );

        let mut guard = self.cache.write().await;
        *guard = Some(CachedToken {
            value: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

/// When the token expires. A lease duration too large for timestamp
/// arithmetic clamps to the far future instead of panicking on a response
/// Vault should never send.
fn token_expiry(issued_at: DateTime<Utc>, ttl_seconds: u64) -> DateTime<Utc> {
    i64::try_from(ttl_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| issued_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Process-wide cache of exchange handles, keyed by the full identity tuple
/// so distinct addresses/roles never share a credential. Shared across
/// concurrent reconciliations; owned by the reconciler for process lifetime.
#[derive(Debug, Default)]
pub struct AuthCache {
    inner: RwLock<HashMap<String, Arc<ServiceAccountAuth>>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composite identity key for one resource's exchange coordinates.
    pub fn key(addr: &str, namespace: &str, name: &str, role: &str, auth_path: &str) -> String {
        format!("{addr}-{namespace}-{name}-{role}-{auth_path}")
    }

    pub async fn get_or_create<F>(
        &self,
        key: &str,
        create: F,
    ) -> Result<Arc<ServiceAccountAuth>, VaultError>
    where
        F: FnOnce() -> Result<ServiceAccountAuth, VaultError>,
    {
        if let Some(found) = self.inner.read().await.get(key) {
            return Ok(Arc::clone(found));
        }
        let created = Arc::new(create()?);
        self.inner
            .write()
            .await
            .insert(key.to_string(), Arc::clone(&created));
        Ok(created)
    }
}
