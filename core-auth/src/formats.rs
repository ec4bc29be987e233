//! Native on-disk credential shapes.
//!
//! Each provider's CLI owns a JSON document with its own layout. A
//! [`CredentialFormat`] converts between that layout and [`Credential`],
//! touching only the keys it owns so that other fields of a shared document
//! survive a write-back.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::types::Credential;

pub trait CredentialFormat: Send + Sync + fmt::Debug {
    /// Extract a credential from a whole document. May return a partial
    /// record; completeness is checked by the caller.
    fn decode(&self, document: &Value) -> Option<Credential>;

    /// Merge `credential` into `document`, leaving unrelated keys alone.
    fn encode_into(&self, document: &mut Map<String, Value>, credential: &Credential, now: DateTime<Utc>);

    /// Remove this provider's keys from `document`.
    fn remove_from(&self, document: &mut Map<String, Value>);
}

/// `{ "claudeAiOauth": { accessToken, refreshToken, expiresAt, scopes, subscriptionType, ... } }`
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeOauthFormat;

const CLAUDE_KEY: &str = "claudeAiOauth";

impl CredentialFormat for ClaudeOauthFormat {
    fn decode(&self, document: &Value) -> Option<Credential> {
        let record = document.get(CLAUDE_KEY)?;
        serde_json::from_value(record.clone()).ok()
    }

    fn encode_into(&self, document: &mut Map<String, Value>, credential: &Credential, _now: DateTime<Utc>) {
        let record = serde_json::to_value(credential).unwrap_or_else(|_| Value::Object(Map::new()));
        document.insert(CLAUDE_KEY.to_string(), record);
    }

    fn remove_from(&self, document: &mut Map<String, Value>) {
        document.remove(CLAUDE_KEY);
    }
}

/// `{ "tokens": { access_token, refresh_token, account_id, scope, subscription_type, ... }, "last_refresh": RFC 3339 }`
///
/// The file stores no expiry; tokens are assumed valid for
/// [`CODEX_TOKEN_TTL_MS`] after `last_refresh`. Scopes are kept as one
/// space-separated `scope` string, as token endpoints return them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexAuthFormat;

/// Implicit lifetime of a Codex access token after `last_refresh`.
pub const CODEX_TOKEN_TTL_MS: i64 = 60 * 60 * 1000;

#[derive(Deserialize)]
struct CodexAuthFile {
    tokens: Option<CodexTokens>,
    last_refresh: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CodexTokens {
    access_token: Option<String>,
    refresh_token: Option<String>,
    account_id: Option<String>,
    scope: Option<String>,
    subscription_type: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl CredentialFormat for CodexAuthFormat {
    fn decode(&self, document: &Value) -> Option<Credential> {
        let file: CodexAuthFile = serde_json::from_value(document.clone()).ok()?;
        let tokens = file.tokens?;

        Some(Credential {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: file
                .last_refresh
                .map(|at| at.timestamp_millis() + CODEX_TOKEN_TTL_MS),
            scopes: tokens
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_string).collect()),
            subscription_type: tokens.subscription_type,
            account_id: tokens.account_id,
            metadata: tokens.extra,
        })
    }

    fn encode_into(&self, document: &mut Map<String, Value>, credential: &Credential, now: DateTime<Utc>) {
        let mut tokens = match document.remove("tokens") {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };

        for (key, value) in &credential.metadata {
            tokens.insert(key.clone(), value.clone());
        }
        let mut set = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                tokens.insert(key.to_string(), Value::String(value.clone()));
            }
        };
        set("access_token", &credential.access_token);
        set("refresh_token", &credential.refresh_token);
        set("account_id", &credential.account_id);
        set("subscription_type", &credential.subscription_type);
        set("scope", &credential.scopes.as_ref().map(|scopes| scopes.join(" ")));

        document.insert("tokens".to_string(), Value::Object(tokens));
        document.insert("last_refresh".to_string(), Value::String(now.to_rfc3339()));
    }

    fn remove_from(&self, document: &mut Map<String, Value>) {
        document.remove("tokens");
        document.remove("last_refresh");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_claude_decode() {
        let doc = json!({
            "claudeAiOauth": {
                "accessToken": "sk-ant-oat01-a",
                "refreshToken": "sk-ant-ort01-r",
                "expiresAt": 1_760_000_000_000i64,
                "scopes": ["user:inference", "user:profile"],
                "subscriptionType": "pro"
            }
        });
        let credential = ClaudeOauthFormat.decode(&doc).unwrap();
        assert!(credential.is_complete());
        assert_eq!(credential.expires_at, Some(1_760_000_000_000));
        assert_eq!(credential.scopes.as_ref().unwrap().len(), 2);
        assert_eq!(credential.subscription_type.as_deref(), Some("pro"));
    }

    #[test]
    fn test_claude_decode_missing_key() {
        assert!(ClaudeOauthFormat.decode(&json!({ "other": 1 })).is_none());
        assert!(ClaudeOauthFormat.decode(&json!({ "claudeAiOauth": "nope" })).is_none());
    }

    #[test]
    fn test_claude_encode_preserves_other_keys() {
        let mut doc = json!({ "mcpServers": { "x": 1 }, "claudeAiOauth": { "accessToken": "old" } })
            .as_object()
            .cloned()
            .unwrap();
        let mut credential = Credential::new("new", "r2", 42);
        credential
            .metadata
            .insert("rateLimitTier".into(), Value::from("tier"));

        ClaudeOauthFormat.encode_into(&mut doc, &credential, Utc::now());

        assert_eq!(doc["mcpServers"], json!({ "x": 1 }));
        assert_eq!(doc["claudeAiOauth"]["accessToken"], "new");
        assert_eq!(doc["claudeAiOauth"]["refreshToken"], "r2");
        assert_eq!(doc["claudeAiOauth"]["expiresAt"], 42);
        assert_eq!(doc["claudeAiOauth"]["rateLimitTier"], "tier");
    }

    #[test]
    fn test_codex_decode_derives_expiry() {
        let doc = json!({
            "OPENAI_API_KEY": null,
            "tokens": {
                "id_token": "idt",
                "access_token": "at",
                "refresh_token": "rt",
                "account_id": "acct-1"
            },
            "last_refresh": "2025-01-15T10:30:00Z"
        });
        let credential = CodexAuthFormat.decode(&doc).unwrap();
        let last = Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap();

        assert!(credential.is_complete());
        assert_eq!(
            credential.expires_at,
            Some(last.timestamp_millis() + 3_600_000)
        );
        assert_eq!(credential.account_id.as_deref(), Some("acct-1"));
        assert_eq!(credential.metadata.get("id_token"), Some(&Value::from("idt")));
    }

    #[test]
    fn test_codex_decode_without_last_refresh_is_partial() {
        let doc = json!({ "tokens": { "access_token": "at", "refresh_token": "rt" } });
        let credential = CodexAuthFormat.decode(&doc).unwrap();
        assert!(!credential.is_complete());
    }

    #[test]
    fn test_codex_encode_merges_tokens() {
        let mut doc = json!({
            "OPENAI_API_KEY": "sk-keep",
            "tokens": { "id_token": "idt", "access_token": "old", "refresh_token": "old-r" },
            "last_refresh": "2024-01-01T00:00:00Z"
        })
        .as_object()
        .cloned()
        .unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let credential = Credential::new("new", "new-r", 0).with_account_id("acct");

        CodexAuthFormat.encode_into(&mut doc, &credential, now);

        assert_eq!(doc["OPENAI_API_KEY"], "sk-keep");
        assert_eq!(doc["tokens"]["id_token"], "idt");
        assert_eq!(doc["tokens"]["access_token"], "new");
        assert_eq!(doc["tokens"]["refresh_token"], "new-r");
        assert_eq!(doc["tokens"]["account_id"], "acct");
        assert_eq!(doc["last_refresh"], now.to_rfc3339());
    }

    #[test]
    fn test_codex_scopes_survive_write_back() {
        let mut doc = Map::new();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let credential = Credential::new("at", "rt", 0)
            .with_scopes(vec!["openid".into(), "offline_access".into()])
            .with_subscription_type("plus");

        CodexAuthFormat.encode_into(&mut doc, &credential, now);
        assert_eq!(doc["tokens"]["scope"], "openid offline_access");

        let reloaded = CodexAuthFormat.decode(&Value::Object(doc)).unwrap();
        assert_eq!(reloaded.scopes, credential.scopes);
        assert_eq!(reloaded.subscription_type.as_deref(), Some("plus"));
        assert!(reloaded.metadata.is_empty());
    }

    #[test]
    fn test_remove_from() {
        let mut doc = json!({ "tokens": {}, "last_refresh": "x", "OPENAI_API_KEY": "k" })
            .as_object()
            .cloned()
            .unwrap();
        CodexAuthFormat.remove_from(&mut doc);
        assert_eq!(Value::Object(doc), json!({ "OPENAI_API_KEY": "k" }));
    }
}
