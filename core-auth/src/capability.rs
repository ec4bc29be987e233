//! Caller-facing token capability.
//!
//! API wrappers only need "give me a bearer token for provider X". They
//! depend on [`CredentialProvider`] and never see credentials, storage or
//! refresh policy.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{AuthError, AuthErrorCode, Result};
use crate::manager::TokenRefreshManager;
use crate::types::Credential;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A currently valid access token for `provider_key`.
    async fn access_token(&self, provider_key: &str) -> Result<String>;
}

/// [`CredentialProvider`] backed by stored credentials.
///
/// Credentials are loaded lazily from the [`CredentialStore`](crate::CredentialStore)
/// on first use and cached per canonical provider. A refresh replaces the
/// cached entry. Unknown provider keys yield `MISSING_CONFIG` rather than
/// a panic, since keys here often come from user configuration.
///
/// Calls for one provider are serialized from cache read to cache update,
/// so a caller never presents a refresh token that another caller has
/// already rotated.
pub struct ManagedCredentials {
    manager: TokenRefreshManager,
    cache: RwLock<HashMap<&'static str, Credential>>,
    provider_locks: Mutex<HashMap<&'static str, Arc<Mutex<()>>>>,
}

impl ManagedCredentials {
    pub fn new(manager: TokenRefreshManager) -> Self {
        Self {
            manager,
            cache: RwLock::new(HashMap::new()),
            provider_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &TokenRefreshManager {
        &self.manager
    }

    /// Drop the cached credential so the next call reloads it from storage,
    /// e.g. after the user signed in again outside this process.
    pub async fn invalidate(&self, provider_key: &str) {
        if let Some(descriptor) = self.manager.registry().resolve(provider_key) {
            self.cache.write().await.remove(descriptor.canonical_name);
            self.manager.reset_backoff(descriptor.canonical_name);
        }
    }

    async fn provider_lock(&self, canonical: &'static str) -> Arc<Mutex<()>> {
        let mut locks = self.provider_locks.lock().await;
        locks
            .entry(canonical)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn cached_or_loaded(&self, canonical: &'static str) -> Option<Credential> {
        if let Some(credential) = self.cache.read().await.get(canonical) {
            return Some(credential.clone());
        }

        let credential = self.manager.load_credential(canonical).await?;
        debug!(provider = canonical, "Loaded credential into cache");
        self.cache
            .write()
            .await
            .insert(canonical, credential.clone());
        Some(credential)
    }
}

#[async_trait]
impl CredentialProvider for ManagedCredentials {
    async fn access_token(&self, provider_key: &str) -> Result<String> {
        let descriptor = self.manager.registry().resolve(provider_key).ok_or_else(|| {
            AuthError::new(AuthErrorCode::MissingConfig)
                .with_details(format!("unknown provider '{}'", provider_key))
        })?;
        let canonical = descriptor.canonical_name;

        let lock = self.provider_lock(canonical).await;
        let _guard = lock.lock().await;

        let credential = self
            .cached_or_loaded(canonical)
            .await
            .ok_or_else(|| AuthError::no_credentials(descriptor.display_name))?;

        let token = self
            .manager
            .get_valid_access_token(canonical, &credential)
            .await?;

        if let Some(updated) = token.credential {
            self.cache.write().await.insert(canonical, updated);
        }
        Ok(token.access_token)
    }
}

impl std::fmt::Debug for ManagedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedCredentials")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
