//! Workspace facade crate.
//!
//! Re-exports the credential core and its host bridges so an application
//! can depend on `keyward` alone. The `desktop-shims` feature (default)
//! pulls in the keychain, file system and reqwest adapters from
//! `bridge-desktop` and lets [`CoreConfig::builder`](core_runtime::config::CoreConfig::builder)
//! fill in missing bridges with them.

pub use bridge_traits;
pub use core_auth;
pub use core_runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

pub use core_auth::{
    AuthError, AuthErrorCode, Credential, CredentialProvider, ManagedCredentials,
    RecoveryAction, TokenRefreshManager, ValidToken,
};
pub use core_runtime::config::{AuthPolicy, CoreConfig, WriteMode};
pub use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
