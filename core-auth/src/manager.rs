//! # Token Refresh Manager
//!
//! Turns a stored credential into a usable access token, refreshing it
//! against the provider's token endpoint when needed.
//!
//! ## Overview
//!
//! Callers hand over a provider key (any registered alias) and the
//! credential they hold. The manager returns the current access token when
//! it is still valid, or performs a refresh-token grant, persists the
//! result through the [`CredentialStore`] and returns the new token.
//!
//! ## Features
//!
//! - Alias resolution: `"anthropic"` and `"claude"` share one backoff and
//!   one in-flight refresh
//! - Single-flight refreshes per provider and account, so a rotating
//!   refresh token is never spent twice
//! - Exponential backoff after failures, with no network call while cooling down
//! - Soft persistence failures: a refreshed token is returned even when no
//!   storage tier accepts it
//! - Lifecycle events on the [`EventBus`]
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{Credential, TokenRefreshManager};
//! use core_runtime::config::CoreConfig;
//!
//! # async fn example(config: CoreConfig, stored: Credential) -> core_auth::Result<()> {
//! let manager = TokenRefreshManager::builder(&config).build();
//!
//! let token = manager.get_valid_access_token("anthropic", &stored).await?;
//! if let Some(updated) = token.credential {
//!     // keep `updated` for the next call
//! #   let _ = updated;
//! }
//! # Ok(())
//! # }
//! ```

use bridge_traits::{Clock, HttpClient};
use core_runtime::config::{AuthPolicy, CoreConfig};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use core_runtime::logging::sanitize_token;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn, Instrument};

use crate::backoff::BackoffTracker;
use crate::credential_store::CredentialStore;
use crate::env::{EnvSource, ProcessEnv};
use crate::error::{AuthError, Result};
use crate::providers::{ProviderContext, ProviderDescriptor, ProviderRegistry};
use crate::refresh::{build_refreshed_credential, request_refresh, RefreshGrant};
use crate::types::{Credential, RefreshOptions, ValidToken};

/// Account scope used when a credential carries no account id.
const DEFAULT_ACCOUNT: &str = "default";

type SharedRefresh = Shared<BoxFuture<'static, Result<ValidToken>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlightKey {
    provider: &'static str,
    account: String,
}

impl FlightKey {
    fn new(descriptor: &ProviderDescriptor, credential: &Credential) -> Self {
        Self {
            provider: descriptor.canonical_name,
            account: credential
                .account_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string()),
        }
    }
}

struct Inner {
    registry: ProviderRegistry,
    store: CredentialStore,
    http: Arc<dyn HttpClient>,
    backoff: BackoffTracker,
    env: Arc<dyn EnvSource>,
    clock: Arc<dyn Clock>,
    context: ProviderContext,
    policy: AuthPolicy,
    events: EventBus,
    in_flight: Mutex<HashMap<FlightKey, SharedRefresh>>,
}

/// Credential lifecycle orchestrator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenRefreshManager {
    inner: Arc<Inner>,
}

/// Builder for [`TokenRefreshManager`].
pub struct TokenRefreshManagerBuilder {
    config: CoreConfig,
    registry: Option<ProviderRegistry>,
    env: Option<Arc<dyn EnvSource>>,
    context: Option<ProviderContext>,
    events: Option<EventBus>,
}

impl TokenRefreshManagerBuilder {
    /// Default: [`ProviderRegistry::builtin`]
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Default: the process environment
    pub fn env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = Some(env);
        self
    }

    /// Default: [`ProviderContext::from_env`] over the configured environment
    pub fn context(mut self, context: ProviderContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Default: a new bus sized by `CoreConfig::event_buffer_size`
    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> TokenRefreshManager {
        let config = self.config;
        let env = self
            .env
            .unwrap_or_else(|| Arc::new(ProcessEnv) as Arc<dyn EnvSource>);
        let context = self
            .context
            .unwrap_or_else(|| ProviderContext::from_env(env.as_ref()));
        let policy = config.auth.clone();

        let store = CredentialStore::new(
            config.secure_store.clone(),
            config.file_system.clone(),
            config.clock.clone(),
            policy.write_mode,
        );
        let backoff = BackoffTracker::new(
            config.clock.clone(),
            policy.backoff_base,
            policy.backoff_cap,
        );

        TokenRefreshManager {
            inner: Arc::new(Inner {
                registry: self.registry.unwrap_or_default(),
                store,
                http: config.http_client.clone(),
                backoff,
                env,
                clock: config.clock.clone(),
                context,
                policy,
                events: self
                    .events
                    .unwrap_or_else(|| EventBus::new(config.event_buffer_size)),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl TokenRefreshManager {
    pub fn builder(config: &CoreConfig) -> TokenRefreshManagerBuilder {
        TokenRefreshManagerBuilder {
            config: config.clone(),
            registry: None,
            env: None,
            context: None,
            events: None,
        }
    }

    /// Manager over the builtin providers and the process environment.
    pub fn new(config: &CoreConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn context(&self) -> &ProviderContext {
        &self.inner.context
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.inner.backoff
    }

    /// Return a usable access token for `provider_key`, refreshing if the
    /// credential is expired or within the refresh margin.
    ///
    /// On a refresh, [`ValidToken::credential`] holds the replacement
    /// credential, which has also been written to storage.
    ///
    /// # Errors
    ///
    /// - `NO_CREDENTIALS` when the credential has no access token
    /// - `NO_REFRESH_TOKEN` when a refresh is needed but impossible
    /// - `REFRESH_FAILED` when the provider is cooling down after a failure,
    ///   or the token endpoint call fails for any reason
    /// - `MISSING_CONFIG` when the OAuth client id or secret is not set
    ///
    /// # Panics
    ///
    /// Panics if `provider_key` is not a registered alias.
    pub async fn get_valid_access_token(
        &self,
        provider_key: &str,
        credential: &Credential,
    ) -> Result<ValidToken> {
        self.get_valid_access_token_with(provider_key, credential, RefreshOptions::default())
            .await
    }

    /// [`get_valid_access_token`](Self::get_valid_access_token) with per-call options.
    ///
    /// # Panics
    ///
    /// Panics if `provider_key` is not a registered alias.
    #[instrument(skip(self, credential), fields(provider = %provider_key, force = options.force))]
    pub async fn get_valid_access_token_with(
        &self,
        provider_key: &str,
        credential: &Credential,
        options: RefreshOptions,
    ) -> Result<ValidToken> {
        let descriptor = self.descriptor(provider_key);
        let provider = descriptor.display_name;

        let Some(access_token) = credential.access_token() else {
            debug!("Credential has no access token");
            return Err(AuthError::no_credentials(provider));
        };

        let now_ms = self.inner.clock.unix_timestamp_millis();
        if !options.force && !credential.needs_refresh(now_ms, self.inner.policy.refresh_margin)
        {
            debug!("Access token still valid");
            return Ok(ValidToken {
                access_token: access_token.to_string(),
                refreshed: false,
                credential: None,
            });
        }

        let Some(refresh_token) = credential.refresh_token() else {
            warn!("Refresh needed but credential has no refresh token");
            return Err(AuthError::no_refresh_token(provider));
        };

        if !self.inner.backoff.should_attempt(descriptor.canonical_name) {
            let until = self
                .inner
                .backoff
                .state(descriptor.canonical_name)
                .map(|state| state.cooldown_until.to_rfc3339())
                .unwrap_or_default();
            debug!(cooldown_until = %until, "Refresh suppressed by backoff");
            return Err(self.report_failure(
                descriptor,
                AuthError::refresh_failed(
                    provider,
                    format!("refresh suppressed by backoff until {}", until),
                ),
            ));
        }

        let env = self.inner.env.as_ref();
        let Some(client_id) = descriptor.client_id(env) else {
            return Err(self.report_failure(
                descriptor,
                AuthError::missing_config(provider, "OAuth client id"),
            ));
        };
        let Some(client_secret) = descriptor.client_secret(env) else {
            return Err(self.report_failure(
                descriptor,
                AuthError::missing_config(provider, "OAuth client secret"),
            ));
        };

        let grant = RefreshGrant::new(client_id, client_secret, refresh_token);
        self.join_or_start(descriptor, credential, grant).await
    }

    /// Read `provider_key`'s stored credential.
    ///
    /// # Panics
    ///
    /// Panics if `provider_key` is not a registered alias.
    pub async fn load_credential(&self, provider_key: &str) -> Option<Credential> {
        let descriptor = self.descriptor(provider_key);
        self.inner
            .store
            .read_credential(descriptor, &self.inner.context)
            .await
    }

    /// Delete `provider_key`'s stored credential from every tier.
    ///
    /// # Panics
    ///
    /// Panics if `provider_key` is not a registered alias.
    pub async fn remove_credential(&self, provider_key: &str) -> bool {
        let descriptor = self.descriptor(provider_key);
        self.inner.backoff.reset(descriptor.canonical_name);
        self.inner
            .store
            .remove_credential(descriptor, &self.inner.context)
            .await
    }

    /// Clear any cooldown for `provider_key`, e.g. after the user signed in
    /// again. Unknown keys are ignored.
    pub fn reset_backoff(&self, provider_key: &str) {
        if let Some(descriptor) = self.inner.registry.resolve(provider_key) {
            self.inner.backoff.reset(descriptor.canonical_name);
        }
    }

    fn descriptor(&self, provider_key: &str) -> &'static ProviderDescriptor {
        match self.inner.registry.resolve(provider_key) {
            Some(descriptor) => descriptor,
            None => panic!("unknown provider key: {:?}", provider_key),
        }
    }

    async fn join_or_start(
        &self,
        descriptor: &'static ProviderDescriptor,
        credential: &Credential,
        grant: RefreshGrant,
    ) -> Result<ValidToken> {
        let key = FlightKey::new(descriptor, credential);

        let flight = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(account = %key.account, "Joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    let flight = self.start_flight(descriptor, credential.clone(), grant, key.clone());
                    in_flight.insert(key, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Run the refresh as its own task so it completes, and clears its map
    /// entry, even when every caller stops waiting.
    fn start_flight(
        &self,
        descriptor: &'static ProviderDescriptor,
        original: Credential,
        grant: RefreshGrant,
        key: FlightKey,
    ) -> SharedRefresh {
        let this = self.clone();
        let task = tokio::spawn(
            async move {
                let result = this.refresh(descriptor, original, grant).await;
                this.inner.in_flight.lock().await.remove(&key);
                result
            }
            .in_current_span(),
        );

        let provider = descriptor.display_name;
        task.map(move |joined| match joined {
            Ok(result) => result,
            Err(e) => Err(AuthError::refresh_failed(
                provider,
                format!("refresh task ended unexpectedly: {}", e),
            )),
        })
        .boxed()
        .shared()
    }

    async fn refresh(
        &self,
        descriptor: &'static ProviderDescriptor,
        original: Credential,
        grant: RefreshGrant,
    ) -> Result<ValidToken> {
        let canonical = descriptor.canonical_name;
        let endpoint = descriptor.token_endpoint(self.inner.env.as_ref());

        info!(provider = canonical, "Refreshing access token");
        self.emit(AuthEvent::TokenRefreshing {
            provider: canonical.to_string(),
        });

        let response = match request_refresh(
            self.inner.http.as_ref(),
            &endpoint,
            &grant,
            self.inner.policy.request_timeout,
        )
        .await
        {
            Ok(response) => response,
            Err(failure) => {
                self.inner.backoff.record_failure(canonical);
                let error = AuthError::refresh_failed(descriptor.display_name, failure.to_string());
                return Err(self.report_failure(descriptor, error));
            }
        };

        let now_ms = self.inner.clock.unix_timestamp_millis();
        let refreshed = build_refreshed_credential(&original, &response, now_ms);
        debug!(
            access_token = %sanitize_token(&response.access_token),
            rotated = response.refresh_token.is_some(),
            "Token endpoint issued new credential"
        );

        let outcome = self
            .inner
            .store
            .write_credential(descriptor, &self.inner.context, &refreshed)
            .await;
        if !outcome.is_durable() {
            warn!(provider = canonical, "Refreshed credential was not persisted");
            self.emit(AuthEvent::PersistenceDegraded {
                provider: canonical.to_string(),
                reason: "no storage tier accepted the refreshed credential".to_string(),
            });
        }

        self.inner.backoff.record_success(canonical);

        let expires_at = refreshed.expires_at.unwrap_or(now_ms);
        info!(provider = canonical, expires_at, "Access token refreshed");
        self.emit(AuthEvent::TokenRefreshed {
            provider: canonical.to_string(),
            expires_at,
        });

        Ok(ValidToken {
            access_token: response.access_token,
            refreshed: true,
            credential: Some(refreshed),
        })
    }

    fn report_failure(&self, descriptor: &ProviderDescriptor, error: AuthError) -> AuthError {
        warn!(
            provider = descriptor.canonical_name,
            code = %error.code(),
            details = error.details().unwrap_or_default(),
            "Token refresh failed"
        );
        self.emit(AuthEvent::RefreshFailed {
            provider: descriptor.canonical_name.to_string(),
            code: error.code().as_str().to_string(),
            recoverable: error.is_recoverable(),
        });
        error
    }

    fn emit(&self, event: AuthEvent) {
        trace!(provider = event.provider(), "{}", event);
        let _ = self.inner.events.emit(CoreEvent::Auth(event));
    }
}

impl std::fmt::Debug for TokenRefreshManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshManager")
            .field("registry", &self.inner.registry)
            .field("policy", &self.inner.policy)
            .field("backoff", &self.inner.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthErrorCode, RecoveryAction};
    use crate::providers::CLAUDE;
    use crate::test_support::{client_env, ManualClock, ReadOnlyFileSystem, ScriptedHttpClient};
    use bridge_desktop::TokioFileSystem;
    use bridge_traits::{BridgeError, FileSystemAccess};
    use core_runtime::events::Receiver;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    struct Harness {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        http: Arc<ScriptedHttpClient>,
        manager: TokenRefreshManager,
    }

    impl Harness {
        fn new() -> Self {
            Self::build(ScriptedHttpClient::new(), client_env(), None)
        }

        fn build(
            http: ScriptedHttpClient,
            env: HashMap<String, String>,
            file_system: Option<Arc<dyn FileSystemAccess>>,
        ) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let clock = Arc::new(ManualClock::default());
            let http = Arc::new(http);
            let config = CoreConfig::builder()
                .http_client(http.clone())
                .file_system(file_system.unwrap_or_else(|| {
                    Arc::new(TokioFileSystem::new()) as Arc<dyn FileSystemAccess>
                }))
                .without_secure_store()
                .clock(clock.clone())
                .build()
                .unwrap();
            let manager = TokenRefreshManager::builder(&config)
                .env(Arc::new(env))
                .context(ProviderContext::with_home(dir.path()))
                .build();
            Self {
                _dir: dir,
                clock,
                http,
                manager,
            }
        }

        fn now_ms(&self) -> i64 {
            self.clock.unix_timestamp_millis()
        }

        fn expired(&self) -> Credential {
            Credential::new("OLD", "RT-OLD", self.now_ms() - 1_000)
                .with_scopes(vec!["user:inference".into(), "user:profile".into()])
        }

        fn valid(&self) -> Credential {
            Credential::new("CURRENT", "RT", self.now_ms() + 3_600_000)
        }

        fn ok_response(&self) {
            self.http.push_json(
                200,
                json!({ "access_token": "NEW", "refresh_token": "NEW2", "expires_in": 3600 }),
            );
        }

        fn events(&self) -> Receiver<CoreEvent> {
            self.manager.events().subscribe()
        }
    }

    fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<AuthEvent> {
        let mut events = Vec::new();
        while let Ok(CoreEvent::Auth(event)) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_valid_token_returned_without_side_effects() {
        let h = Harness::new();
        let mut rx = h.events();

        let token = h.manager.get_valid_access_token("claude", &h.valid()).await.unwrap();

        assert_eq!(token.access_token, "CURRENT");
        assert!(!token.refreshed);
        assert!(token.credential.is_none());
        assert_eq!(h.http.calls(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let h = Harness::new();
        h.ok_response();
        let soon = Credential::new("CURRENT", "RT", h.now_ms() + 60_000);

        let token = h.manager.get_valid_access_token("claude", &soon).await.unwrap();
        assert!(token.refreshed);
        assert_eq!(h.http.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let h = Harness::new();
        h.ok_response();
        let mut rx = h.events();
        let original = h.expired();

        let token = h.manager.get_valid_access_token("claude", &original).await.unwrap();

        assert_eq!(token.access_token, "NEW");
        assert!(token.refreshed);
        assert_eq!(
            h.http.request_json(0),
            json!({
                "grant_type": "refresh_token",
                "client_id": "claude-id",
                "client_secret": "claude-secret",
                "refresh_token": "RT-OLD"
            })
        );
        assert_eq!(h.http.requests()[0].url, CLAUDE.token_endpoint);

        let updated = token.credential.unwrap();
        assert_eq!(updated.refresh_token(), Some("NEW2"));
        assert_eq!(updated.expires_at, Some(h.now_ms() + 3_600_000));
        assert_eq!(updated.scopes, original.scopes);

        let stored = h.manager.load_credential("claude").await.unwrap();
        assert_eq!(stored, updated);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                AuthEvent::TokenRefreshing {
                    provider: "claude".into()
                },
                AuthEvent::TokenRefreshed {
                    provider: "claude".into(),
                    expires_at: h.now_ms() + 3_600_000
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_response_scope_replaces_original() {
        let h = Harness::new();
        h.http.push_json(
            200,
            json!({ "access_token": "NEW", "expires_in": 60, "scope": "user:inference" }),
        );

        let token = h.manager.get_valid_access_token("claude", &h.expired()).await.unwrap();
        let updated = token.credential.unwrap();
        assert_eq!(updated.scopes, Some(vec!["user:inference".to_string()]));
        assert_eq!(updated.refresh_token(), Some("RT-OLD"));
    }

    #[tokio::test]
    async fn test_aliases_share_provider_state() {
        let h = Harness::new();
        h.http.push_raw(401, r#"{"error":"invalid_grant"}"#);

        let first = h
            .manager
            .get_valid_access_token("anthropic", &h.expired())
            .await
            .unwrap_err();
        assert_eq!(first.code(), AuthErrorCode::RefreshFailed);

        let second = h
            .manager
            .get_valid_access_token("claude-code", &h.expired())
            .await
            .unwrap_err();
        assert_eq!(second.code(), AuthErrorCode::RefreshFailed);
        assert_eq!(h.http.calls(), 1);
        assert!(h.manager.backoff().state("claude").is_some());
    }

    #[tokio::test]
    async fn test_aliases_refresh_identically() {
        for (alias, canonical) in [
            ("claude-code", "claude"),
            ("anthropic", "claude"),
            ("openai-codex", "codex"),
            ("openai", "codex"),
        ] {
            let by_alias = Harness::new();
            let by_name = Harness::new();
            by_alias.ok_response();
            by_name.ok_response();

            let a = by_alias
                .manager
                .get_valid_access_token(alias, &by_alias.expired())
                .await
                .unwrap();
            let b = by_name
                .manager
                .get_valid_access_token(canonical, &by_name.expired())
                .await
                .unwrap();

            assert_eq!(a, b, "{}", alias);
            assert_eq!(by_alias.http.request_json(0), by_name.http.request_json(0));
            assert_eq!(by_alias.http.requests()[0].url, by_name.http.requests()[0].url);

            let stored = by_alias.manager.load_credential(canonical).await;
            assert!(stored.is_some());
            assert_eq!(stored, by_name.manager.load_credential(alias).await);
        }
    }

    #[tokio::test]
    async fn test_missing_access_token_is_no_credentials() {
        let h = Harness::new();
        let error = h
            .manager
            .get_valid_access_token("claude", &Credential::default())
            .await
            .unwrap_err();
        assert_eq!(error.code(), AuthErrorCode::NoCredentials);

        let credential = Credential {
            access_token: Some(String::new()),
            refresh_token: Some("RT".into()),
            ..Credential::default()
        };

        let error = h
            .manager
            .get_valid_access_token("codex", &credential)
            .await
            .unwrap_err();
        assert_eq!(error.code(), AuthErrorCode::NoCredentials);
        assert_eq!(error.recovery(), RecoveryAction::Setup);
        assert_eq!(h.http.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let h = Harness::new();
        let credential = Credential {
            access_token: Some("OLD".into()),
            expires_at: Some(h.now_ms() - 1),
            ..Credential::default()
        };

        let error = h
            .manager
            .get_valid_access_token("claude", &credential)
            .await
            .unwrap_err();
        assert_eq!(error.code(), AuthErrorCode::NoRefreshToken);
        assert_eq!(error.recovery(), RecoveryAction::Reauth);
    }

    #[tokio::test]
    async fn test_missing_client_config_makes_no_call() {
        let mut env = client_env();
        env.remove("OPENAI_OAUTH_CLIENT_SECRET");
        let h = Harness::build(ScriptedHttpClient::new(), env, None);
        let mut rx = h.events();

        let error = h
            .manager
            .get_valid_access_token("openai", &h.expired())
            .await
            .unwrap_err();
        assert_eq!(error.code(), AuthErrorCode::MissingConfig);
        assert_eq!(error.recovery(), RecoveryAction::ContactSupport);
        assert!(!error.is_recoverable());
        assert_eq!(h.http.calls(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![AuthEvent::RefreshFailed {
                provider: "codex".into(),
                code: "MISSING_CONFIG".into(),
                recoverable: false
            }]
        );

        let h = Harness::build(ScriptedHttpClient::new(), HashMap::new(), None);
        let error = h
            .manager
            .get_valid_access_token("codex", &h.expired())
            .await
            .unwrap_err();
        assert_eq!(error.code(), AuthErrorCode::MissingConfig);
        assert_eq!(h.http.calls(), 0);
    }

    #[tokio::test]
    async fn test_http_401_is_refresh_failed() {
        let h = Harness::new();
        h.http.push_raw(401, r#"{"error":"invalid_grant"}"#);

        let error = h
            .manager
            .get_valid_access_token("claude", &h.expired())
            .await
            .unwrap_err();
        assert_eq!(error.code(), AuthErrorCode::RefreshFailed);
        assert_eq!(error.recovery(), RecoveryAction::Reauth);
        assert!(error.details().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_network_error_is_refresh_failed() {
        let h = Harness::new();
        h.http
            .push_error(BridgeError::Http("network connection failed: refused".into()));

        let error = h
            .manager
            .get_valid_access_token("codex", &h.expired())
            .await
            .unwrap_err();
        assert_eq!(error.code(), AuthErrorCode::RefreshFailed);
        assert_eq!(error.recovery(), RecoveryAction::Reauth);
        assert!(error.details().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_backoff_blocks_then_expires() {
        let h = Harness::new();
        h.http.push_raw(500, "upstream");
        let mut rx = h.events();

        h.manager
            .get_valid_access_token("claude", &h.expired())
            .await
            .unwrap_err();
        let blocked = h
            .manager
            .get_valid_access_token("claude", &h.expired())
            .await
            .unwrap_err();
        assert_eq!(blocked.code(), AuthErrorCode::RefreshFailed);
        assert_eq!(blocked.recovery(), RecoveryAction::Reauth);
        assert_eq!(h.http.calls(), 1);

        let failures = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AuthEvent::RefreshFailed { .. }))
            .count();
        assert_eq!(failures, 2);

        h.clock.advance(Duration::from_secs(30));
        h.ok_response();
        let token = h.manager.get_valid_access_token("claude", &h.expired()).await.unwrap();
        assert!(token.refreshed);
        assert_eq!(h.http.calls(), 2);
        assert!(h.manager.backoff().state("claude").is_none());
    }

    #[tokio::test]
    async fn test_reset_backoff_allows_immediate_retry() {
        let h = Harness::new();
        h.http.push_raw(400, "bad");
        h.manager
            .get_valid_access_token("claude", &h.expired())
            .await
            .unwrap_err();

        h.manager.reset_backoff("anthropic");
        h.manager.reset_backoff("not-a-provider");
        h.ok_response();
        assert!(h
            .manager
            .get_valid_access_token("claude", &h.expired())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_forced_refresh_of_valid_token() {
        let h = Harness::new();
        h.ok_response();

        let token = h
            .manager
            .get_valid_access_token_with("claude", &h.valid(), RefreshOptions::forced())
            .await
            .unwrap();
        assert!(token.refreshed);
        assert_eq!(token.access_token, "NEW");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_request() {
        let h = Harness::build(
            ScriptedHttpClient::new().with_delay(Duration::from_millis(200)),
            client_env(),
            None,
        );
        h.ok_response();
        let credential = h.expired();

        let (a, b) = tokio::join!(
            h.manager.get_valid_access_token("claude", &credential),
            h.manager.get_valid_access_token("anthropic", &credential),
        );

        assert_eq!(h.http.calls(), 1);
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.access_token, "NEW");
        assert_eq!(a, b);

        h.ok_response();
        h.manager
            .get_valid_access_token("claude", &credential)
            .await
            .unwrap();
        assert_eq!(h.http.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failure_is_shared() {
        let h = Harness::build(
            ScriptedHttpClient::new().with_delay(Duration::from_millis(200)),
            client_env(),
            None,
        );
        h.http.push_raw(401, "revoked");
        let credential = h.expired();

        let (a, b) = tokio::join!(
            h.manager.get_valid_access_token("codex", &credential),
            h.manager.get_valid_access_token("codex", &credential),
        );

        assert_eq!(h.http.calls(), 1);
        assert_eq!(a.unwrap_err().code(), AuthErrorCode::RefreshFailed);
        assert_eq!(b.unwrap_err().code(), AuthErrorCode::RefreshFailed);
        assert_eq!(h.manager.backoff().state("codex").unwrap().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_refresh_finishes_and_clears_flight() {
        let h = Harness::build(
            ScriptedHttpClient::new().with_delay(Duration::from_secs(5)),
            client_env(),
            Some(Arc::new(ReadOnlyFileSystem)),
        );
        h.ok_response();
        let mut rx = h.events();
        let credential = h.expired();

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            h.manager.get_valid_access_token("claude", &credential),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(h.http.calls(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.manager.inner.in_flight.lock().await.is_empty());
        assert_eq!(Arc::strong_count(&h.manager.inner), 1);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AuthEvent::TokenRefreshed { .. })));

        h.http.push_json(
            200,
            json!({ "access_token": "FRESH", "refresh_token": "NEW3", "expires_in": 3600 }),
        );
        let token = h.manager.get_valid_access_token("claude", &credential).await.unwrap();
        assert_eq!(token.access_token, "FRESH");
        assert_eq!(h.http.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_accounts_and_providers_refresh_independently() {
        let h = Harness::build(
            ScriptedHttpClient::new().with_delay(Duration::from_millis(200)),
            client_env(),
            None,
        );
        for _ in 0..3 {
            h.ok_response();
        }
        let first = h.expired().with_account_id("acct-1");
        let second = h.expired().with_account_id("acct-2");
        let claude = h.expired();

        let (a, b, c) = tokio::join!(
            h.manager.get_valid_access_token("codex", &first),
            h.manager.get_valid_access_token("codex", &second),
            h.manager.get_valid_access_token("claude", &claude),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(h.http.calls(), 3);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_returns_token() {
        let h = Harness::build(
            ScriptedHttpClient::new(),
            client_env(),
            Some(Arc::new(ReadOnlyFileSystem)),
        );
        h.ok_response();
        let mut rx = h.events();

        let token = h.manager.get_valid_access_token("codex", &h.expired()).await.unwrap();

        assert_eq!(token.access_token, "NEW");
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AuthEvent::PersistenceDegraded { provider, .. } if provider == "codex")));
        assert!(h.manager.backoff().state("codex").is_none());
    }

    #[tokio::test]
    async fn test_endpoint_override_from_env() {
        let mut env = client_env();
        env.insert("CODEX_TOKEN_URL".into(), "http://127.0.0.1:4010/token".into());
        let h = Harness::build(ScriptedHttpClient::new(), env, None);
        h.ok_response();

        h.manager.get_valid_access_token("codex", &h.expired()).await.unwrap();
        assert_eq!(h.http.requests()[0].url, "http://127.0.0.1:4010/token");
    }

    #[tokio::test]
    async fn test_remove_credential_after_refresh() {
        let h = Harness::new();
        h.ok_response();
        h.manager.get_valid_access_token("codex", &h.expired()).await.unwrap();
        assert!(h.manager.load_credential("openai-codex").await.is_some());

        assert!(h.manager.remove_credential("codex").await);
        assert!(h.manager.load_credential("codex").await.is_none());
    }

    #[tokio::test]
    #[should_panic(expected = "unknown provider key")]
    async fn test_unknown_provider_panics() {
        let h = Harness::new();
        let _ = h.manager.get_valid_access_token("gemini", &h.valid()).await;
    }
}
