use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Provider-neutral OAuth credential.
///
/// All fields are optional at the type level because records read from disk
/// or handed over by callers may be partial. A record is only usable for a
/// refresh when [`is_complete`](Credential::is_complete) holds.
///
/// `metadata` collects every other field of the provider's native record
/// (e.g. `rateLimitTier`, `id_token`) so a write-back preserves it untouched.
///
/// # Examples
///
/// ```
/// use core_auth::Credential;
///
/// let credential = Credential::new("at-123", "rt-456", 1_900_000_000_000)
///     .with_scopes(vec!["user:inference".to_string()]);
/// assert!(credential.is_complete());
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute expiry, unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_subscription_type(mut self, subscription_type: impl Into<String>) -> Self {
        self.subscription_type = Some(subscription_type.into());
        self
    }

    /// Non-empty access token, if any.
    pub fn access_token(&self) -> Option<&str> {
        non_empty(&self.access_token)
    }

    /// Non-empty refresh token, if any.
    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(&self.refresh_token)
    }

    /// Access token, refresh token and expiry are all present.
    pub fn is_complete(&self) -> bool {
        self.access_token().is_some() && self.refresh_token().is_some() && self.expires_at.is_some()
    }

    /// True when the token is expired or expires within `margin` of `now_ms`.
    ///
    /// A missing expiry counts as expired.
    pub fn needs_refresh(&self, now_ms: i64, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let margin_ms = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX);
                now_ms >= expires_at.saturating_sub(margin_ms)
            }
            None => true,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("subscription_type", &self.subscription_type)
            .field("account_id", &self.account_id)
            .field("metadata_keys", &self.metadata.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Result of [`TokenRefreshManager::get_valid_access_token`](crate::TokenRefreshManager::get_valid_access_token).
#[derive(Clone, PartialEq, Eq)]
pub struct ValidToken {
    pub access_token: String,
    /// Whether a refresh call produced this token
    pub refreshed: bool,
    /// The refreshed credential, present only when `refreshed` is true.
    /// Callers holding a cached credential should replace it with this.
    pub credential: Option<Credential>,
}

impl fmt::Debug for ValidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidToken")
            .field("access_token", &"[REDACTED]")
            .field("refreshed", &self.refreshed)
            .field("credential", &self.credential)
            .finish()
    }
}

/// Per-call knobs for a token request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Refresh even if the current token is still valid
    pub force: bool,
}

impl RefreshOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}
