//! # Core Configuration Module
//!
//! Builder-based configuration holding the injected platform bridges and the
//! credential refresh policy.
//!
//! ## Dependencies
//!
//! | Bridge | Required | Desktop default (`desktop-shims`) |
//! |--------|----------|-----------------------------------|
//! | `HttpClient` | yes | `ReqwestHttpClient` |
//! | `FileSystemAccess` | yes | `TokioFileSystem` |
//! | `SecureStore` | no | `KeyringSecureStore` on macOS, none elsewhere |
//! | `Clock` | no | `SystemClock` |
//!
//! Without a secure store the credential chain simply skips its first tier.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{AuthPolicy, CoreConfig, WriteMode};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .auth_policy(
//!         AuthPolicy::default()
//!             .with_backoff(Duration::from_secs(10), Duration::from_secs(600))
//!             .with_write_mode(WriteMode::Mirror),
//!     )
//!     .build()?;
//! ```
//!
//! Missing capabilities fail fast with an actionable message:
//!
//! ```ignore
//! // Without desktop-shims and without an HttpClient:
//! let err = CoreConfig::builder().build().unwrap_err();
//! assert!(matches!(err, Error::CapabilityMissing { .. }));
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, SecureStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Tokens expiring within this window are refreshed proactively.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Upper bound on a single token endpoint call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// First cooldown after a failed refresh.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(30);

/// Cooldowns never grow beyond this.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30 * 60);

/// Where a refreshed credential is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Secure store when available, fallback file otherwise or on failure.
    #[default]
    PreferSecure,
    /// Both tiers, for redundancy.
    Mirror,
}

/// Refresh and persistence policy for the credential subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    pub refresh_margin: Duration,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub write_mode: WriteMode,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            write_mode: WriteMode::default(),
        }
    }
}

impl AuthPolicy {
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Token request timeout must be greater than zero".to_string(),
            ));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::Config(
                "Backoff base delay must be greater than zero".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(Error::Config(format!(
                "Backoff base delay ({:?}) exceeds the cap ({:?})",
                self.backoff_base, self.backoff_cap
            )));
        }
        Ok(())
    }
}

/// Fully resolved configuration. Build with [`CoreConfig::builder`].
#[derive(Clone)]
pub struct CoreConfig {
    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    /// `None` disables the secure-store tier
    pub secure_store: Option<Arc<dyn SecureStore>>,
    pub clock: Arc<dyn Clock>,
    pub auth: AuthPolicy,
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field(
                "secure_store",
                &self.secure_store.as_ref().map(|_| "SecureStore { ... }"),
            )
            .field("auth", &self.auth)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "An HttpClient is required to reach token endpoints. \
                  Desktop: enable the 'desktop-shims' feature for the reqwest client. \
                  Other hosts: inject a platform HTTP adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess is required for fallback credential files. \
                  Desktop: enable the 'desktop-shims' feature for the tokio file system. \
                  Other hosts: inject a platform file adapter."
            .to_string(),
    })
}

#[cfg(all(feature = "desktop-shims", target_os = "macos"))]
fn provide_default_secure_store() -> Option<Arc<dyn SecureStore>> {
    Some(Arc::new(bridge_desktop::KeyringSecureStore::new()))
}

#[cfg(not(all(feature = "desktop-shims", target_os = "macos")))]
fn provide_default_secure_store() -> Option<Arc<dyn SecureStore>> {
    None
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    disable_secure_store: bool,
    clock: Option<Arc<dyn Clock>>,
    auth: Option<AuthPolicy>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self.disable_secure_store = false;
        self
    }

    /// Skip the secure-store tier even where a platform default exists.
    pub fn without_secure_store(mut self) -> Self {
        self.secure_store = None;
        self.disable_secure_store = true;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn auth_policy(mut self, policy: AuthPolicy) -> Self {
        self.auth = Some(policy);
        self
    }

    /// Default: [`DEFAULT_EVENT_BUFFER_SIZE`](crate::events::DEFAULT_EVENT_BUFFER_SIZE)
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a required bridge is absent and no
    ///   platform default is compiled in
    /// - [`Error::Config`] when the policy is inconsistent
    pub fn build(self) -> Result<CoreConfig> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };
        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };
        let secure_store = if self.disable_secure_store {
            None
        } else {
            self.secure_store.or_else(provide_default_secure_store)
        };

        let config = CoreConfig {
            http_client,
            file_system,
            secure_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            auth: self.auth.unwrap_or_default(),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;
        Ok(config)
    }
}
