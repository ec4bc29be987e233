//! Refresh-token grant against a provider's token endpoint.
//!
//! One POST, never retried: refresh tokens are commonly single-use, so a
//! blind retry after an ambiguous failure can burn the grant.

use bridge_traits::{BridgeError, HttpClient, HttpMethod, HttpRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::types::Credential;

/// Lifetime assumed when the endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest error body kept in failure details.
const MAX_ERROR_BODY: usize = 512;

/// JSON body of a refresh-token grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshGrant {
    pub grant_type: &'static str,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl RefreshGrant {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            grant_type: "refresh_token",
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Why a refresh call produced no token.
#[derive(Debug, Error)]
pub enum RefreshFailure {
    #[error("token request could not be sent: {0}")]
    Request(BridgeError),

    #[error("token endpoint unreachable: {0}")]
    Transport(BridgeError),

    #[error("token endpoint timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// POST `grant` to `endpoint` and parse the response.
///
/// `timeout` bounds the whole exchange, including a client that ignores
/// the per-request timeout hint.
#[instrument(skip(http, grant), fields(endpoint = %endpoint))]
pub async fn request_refresh(
    http: &dyn HttpClient,
    endpoint: &str,
    grant: &RefreshGrant,
    timeout: Duration,
) -> Result<TokenResponse, RefreshFailure> {
    let request = HttpRequest::new(HttpMethod::Post, endpoint)
        .header("Accept", "application/json")
        .timeout(timeout)
        .json(grant)
        .map_err(RefreshFailure::Request)?;

    debug!("Sending refresh-token grant");

    let response = match tokio::time::timeout(timeout, http.execute(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(RefreshFailure::Transport(e)),
        Err(_) => return Err(RefreshFailure::Timeout(timeout)),
    };

    if !response.is_success() {
        let mut body = response.text_lossy();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        warn!(status = response.status, "Token endpoint rejected refresh");
        return Err(RefreshFailure::Status {
            status: response.status,
            body,
        });
    }

    let token: TokenResponse = response
        .json()
        .map_err(|e| RefreshFailure::InvalidResponse(e.to_string()))?;
    if token.access_token.is_empty() {
        return Err(RefreshFailure::InvalidResponse(
            "response has an empty access_token".to_string(),
        ));
    }
    Ok(token)
}

/// Merge a token response into the credential it refreshed.
///
/// A missing `refresh_token` keeps the old one. A missing `scope` keeps the
/// old scopes. Metadata and identity fields carry over unchanged.
pub fn build_refreshed_credential(
    original: &Credential,
    response: &TokenResponse,
    now_ms: i64,
) -> Credential {
    let expires_in = response
        .expires_in
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    let refresh_token = response
        .refresh_token
        .clone()
        .filter(|token| !token.is_empty())
        .or_else(|| original.refresh_token.clone());

    let scopes = match response.scope.as_deref().map(str::trim) {
        Some(scope) if !scope.is_empty() => {
            Some(scope.split_whitespace().map(str::to_string).collect())
        }
        _ => original.scopes.clone(),
    };

    Credential {
        access_token: Some(response.access_token.clone()),
        refresh_token,
        expires_at: Some(now_ms.saturating_add(expires_in.saturating_mul(1000))),
        scopes,
        subscription_type: original.subscription_type.clone(),
        account_id: original.account_id.clone(),
        metadata: original.metadata.clone(),
    }
}
