//! # Credential Lifecycle
//!
//! OAuth credential storage and token refresh for CLI-issued provider
//! credentials (Claude, Codex).
//!
//! ## Overview
//!
//! The provider CLIs write their OAuth credentials to the OS keychain or
//! to a dotfile. This crate reads those credentials, keeps the access
//! token fresh with refresh-token grants, and writes the rotated
//! credential back in each CLI's native format so both sides keep working.
//!
//! ## Features
//!
//! - Provider aliases resolved to one canonical identity ([`ProviderRegistry`])
//! - Two-tier storage, secure store first, JSON file as fallback ([`CredentialStore`])
//! - Single-flight refresh with exponential backoff ([`TokenRefreshManager`])
//! - Typed errors with one recovery action each ([`AuthError`])
//! - A minimal [`CredentialProvider`] capability for API wrappers
//!
//! Storage failures never surface as errors: an unreadable or corrupt
//! credential is reported as absent, and a refreshed credential that no
//! tier accepts is still returned to the caller.

pub mod backoff;
pub mod capability;
pub mod credential_store;
pub mod env;
pub mod error;
pub mod formats;
pub mod manager;
pub mod providers;
pub mod refresh;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use backoff::{BackoffState, BackoffTracker};
pub use capability::{CredentialProvider, ManagedCredentials};
pub use credential_store::{CredentialStore, PersistOutcome, StorageTier};
pub use env::{EnvSource, ProcessEnv};
pub use error::{
    AuthError, AuthErrorCode, AuthErrorPayload, RecoveryAction, RecoveryGuidance, Result,
};
pub use formats::{ClaudeOauthFormat, CodexAuthFormat, CredentialFormat};
pub use manager::{TokenRefreshManager, TokenRefreshManagerBuilder};
pub use providers::{
    ProviderContext, ProviderDescriptor, ProviderRegistry, StorageLocation, CLAUDE, CODEX,
};
pub use refresh::{RefreshFailure, RefreshGrant, TokenResponse};
pub use types::{Credential, RefreshOptions, ValidToken};
