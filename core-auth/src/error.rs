//! Structured authentication errors.
//!
//! Every negative outcome of the credential subsystem is an [`AuthError`]
//! carrying a closed [`AuthErrorCode`] and a [`RecoveryAction`] that a
//! presentation layer can turn into exactly one button.

use bridge_traits::BridgeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    NoCredentials,
    TokenExpired,
    RefreshFailed,
    NetworkError,
    InvalidToken,
    CsrfMismatch,
    OauthCancelled,
    MissingConfig,
    /// The stored credential has no refresh token to use
    NoRefreshToken,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::NoCredentials => "NO_CREDENTIALS",
            AuthErrorCode::TokenExpired => "TOKEN_EXPIRED",
            AuthErrorCode::RefreshFailed => "REFRESH_FAILED",
            AuthErrorCode::NetworkError => "NETWORK_ERROR",
            AuthErrorCode::InvalidToken => "INVALID_TOKEN",
            AuthErrorCode::CsrfMismatch => "CSRF_MISMATCH",
            AuthErrorCode::OauthCancelled => "OAUTH_CANCELLED",
            AuthErrorCode::MissingConfig => "MISSING_CONFIG",
            AuthErrorCode::NoRefreshToken => "NO_REFRESH_TOKEN",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            AuthErrorCode::NoCredentials => {
                "Not authenticated. Please set up authentication to continue."
            }
            AuthErrorCode::TokenExpired => "Your session has expired. Please re-authenticate.",
            AuthErrorCode::RefreshFailed => {
                "Unable to refresh authentication. Please re-authenticate."
            }
            AuthErrorCode::NetworkError => {
                "Network error during authentication. Please check your connection and try again."
            }
            AuthErrorCode::InvalidToken => {
                "Authentication token is invalid. Please re-authenticate."
            }
            AuthErrorCode::CsrfMismatch => {
                "Security validation failed. Please try authenticating again."
            }
            AuthErrorCode::OauthCancelled => "Authentication was cancelled. Please try again.",
            AuthErrorCode::MissingConfig => {
                "Authentication is not configured. Please contact support."
            }
            AuthErrorCode::NoRefreshToken => {
                "No refresh token is available. Please re-authenticate."
            }
        }
    }

    pub fn default_recovery(&self) -> RecoveryAction {
        match self {
            AuthErrorCode::NoCredentials => RecoveryAction::Setup,
            AuthErrorCode::TokenExpired
            | AuthErrorCode::RefreshFailed
            | AuthErrorCode::InvalidToken
            | AuthErrorCode::NoRefreshToken => RecoveryAction::Reauth,
            AuthErrorCode::NetworkError
            | AuthErrorCode::CsrfMismatch
            | AuthErrorCode::OauthCancelled => RecoveryAction::Retry,
            AuthErrorCode::MissingConfig => RecoveryAction::ContactSupport,
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user can do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Setup,
    Reauth,
    Retry,
    ContactSupport,
}

/// UI copy for a recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryGuidance {
    pub action: &'static str,
    pub description: &'static str,
    pub button: &'static str,
}

impl RecoveryGuidance {
    const SETUP: Self = Self {
        action: "Set up authentication",
        description: "Configure your authentication credentials to continue.",
        button: "Set up now",
    };
    const REAUTH: Self = Self {
        action: "Re-authenticate",
        description: "Your authentication needs to be refreshed.",
        button: "Re-authenticate",
    };
    const RETRY: Self = Self {
        action: "Try again",
        description: "A temporary error occurred. Please try again.",
        button: "Retry",
    };
    const CONTACT_SUPPORT: Self = Self {
        action: "Contact support",
        description: "This issue requires assistance from the support team.",
        button: "Get help",
    };

    /// Guidance used for recovery names this version does not know.
    pub const FALLBACK: Self = Self::RETRY;

    /// Look up guidance by wire name (`"reauth"`, `"contact_support"`, ...).
    pub fn for_name(name: &str) -> Self {
        RecoveryAction::parse(name)
            .map(|action| action.guidance())
            .unwrap_or(Self::FALLBACK)
    }
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Setup => "setup",
            RecoveryAction::Reauth => "reauth",
            RecoveryAction::Retry => "retry",
            RecoveryAction::ContactSupport => "contact_support",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "setup" => Some(RecoveryAction::Setup),
            "reauth" => Some(RecoveryAction::Reauth),
            "retry" => Some(RecoveryAction::Retry),
            "contact_support" => Some(RecoveryAction::ContactSupport),
            _ => None,
        }
    }

    pub fn guidance(&self) -> RecoveryGuidance {
        match self {
            RecoveryAction::Setup => RecoveryGuidance::SETUP,
            RecoveryAction::Reauth => RecoveryGuidance::REAUTH,
            RecoveryAction::Retry => RecoveryGuidance::RETRY,
            RecoveryAction::ContactSupport => RecoveryGuidance::CONTACT_SUPPORT,
        }
    }

    /// Everything except `contact_support` can be resolved by the user.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RecoveryAction::ContactSupport)
    }
}

/// Authentication failure.
///
/// Immutable once built. `details` carries diagnostic context (an upstream
/// error, an HTTP status) and is deliberately left out of [`AuthError::to_json`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuthError {
    code: AuthErrorCode,
    message: String,
    recovery: RecoveryAction,
    details: Option<String>,
    timestamp: DateTime<Utc>,
}

/// API-safe serialized form of an [`AuthError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthErrorPayload {
    pub error: String,
    pub code: AuthErrorCode,
    pub message: String,
    pub recovery: RecoveryAction,
    pub timestamp: DateTime<Utc>,
}

impl AuthError {
    /// Error with the code's default message and recovery.
    pub fn new(code: AuthErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            recovery: code.default_recovery(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryAction) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn no_credentials(provider: &str) -> Self {
        Self::new(AuthErrorCode::NoCredentials).with_message(format!(
            "No {} credentials found. Please set up authentication to continue.",
            provider
        ))
    }

    pub fn token_expired(provider: &str) -> Self {
        Self::new(AuthErrorCode::TokenExpired).with_message(format!(
            "Your {} session has expired. Please re-authenticate.",
            provider
        ))
    }

    pub fn refresh_failed(provider: &str, reason: impl Into<String>) -> Self {
        Self::new(AuthErrorCode::RefreshFailed)
            .with_message(format!(
                "Unable to refresh {} authentication. Please re-authenticate.",
                provider
            ))
            .with_details(reason)
    }

    pub fn missing_config(provider: &str, what: &str) -> Self {
        Self::new(AuthErrorCode::MissingConfig)
            .with_details(format!("{} {} is not configured", provider, what))
    }

    pub fn no_refresh_token(provider: &str) -> Self {
        Self::new(AuthErrorCode::NoRefreshToken).with_message(format!(
            "No {} refresh token is available. Please re-authenticate.",
            provider
        ))
    }

    pub fn code(&self) -> AuthErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn recovery(&self) -> RecoveryAction {
        self.recovery
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_recoverable(&self) -> bool {
        self.recovery.is_recoverable()
    }

    pub fn recovery_guidance(&self) -> RecoveryGuidance {
        self.recovery.guidance()
    }

    pub fn to_payload(&self) -> AuthErrorPayload {
        AuthErrorPayload {
            error: "AuthError".to_string(),
            code: self.code,
            message: self.message.clone(),
            recovery: self.recovery,
            timestamp: self.timestamp,
        }
    }

    /// `{error:"AuthError", code, message, recovery, timestamp}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.to_payload()).unwrap_or_else(|_| {
            serde_json::json!({
                "error": "AuthError",
                "code": self.code.as_str(),
                "message": self.message,
                "recovery": self.recovery.as_str(),
                "timestamp": self.timestamp.to_rfc3339(),
            })
        })
    }

    /// Best-effort classification of an untyped upstream error.
    ///
    /// An `AuthError` passes through unchanged. Anything else is classified
    /// by substrings of its lower-cased message; `default_code` applies when
    /// nothing matches. Use at transport boundaries only. Code that knows
    /// what went wrong constructs a typed error directly.
    pub fn from_error<E>(error: E, default_code: AuthErrorCode) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let boxed = error.into();
        let boxed = match boxed.downcast::<AuthError>() {
            Ok(auth) => return *auth,
            Err(other) => other,
        };

        let text = boxed.to_string();
        Self::new(classify_message(&text, default_code)).with_details(text)
    }
}

fn classify_message(message: &str, default_code: AuthErrorCode) -> AuthErrorCode {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["401", "unauthorized"]) {
        AuthErrorCode::InvalidToken
    } else if has(&["403", "forbidden"]) {
        AuthErrorCode::TokenExpired
    } else if has(&["network", "econnrefused", "timeout"]) {
        AuthErrorCode::NetworkError
    } else if has(&["refresh"]) {
        AuthErrorCode::RefreshFailed
    } else {
        default_code
    }
}

impl From<BridgeError> for AuthError {
    fn from(error: BridgeError) -> Self {
        AuthError::from_error(error, AuthErrorCode::NetworkError)
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
