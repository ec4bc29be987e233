//! Provider descriptors and alias resolution.
//!
//! The registry is a read-only table built once at startup. Lookups are
//! exact and case-sensitive; callers pass lower-case keys.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::env::EnvSource;
use crate::formats::{ClaudeOauthFormat, CodexAuthFormat, CredentialFormat};

/// Host-specific inputs needed to locate stored credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderContext {
    pub home_dir: PathBuf,
    /// Codex state directory (`$CODEX_HOME`, default `~/.codex`)
    pub codex_home: PathBuf,
}

impl ProviderContext {
    /// Context rooted at `home_dir`, with every other path at its default.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        let codex_home = home_dir.join(".codex");
        Self {
            home_dir,
            codex_home,
        }
    }

    pub fn with_codex_home(mut self, codex_home: impl Into<PathBuf>) -> Self {
        self.codex_home = codex_home.into();
        self
    }

    /// Resolve from the user's home directory and `CODEX_HOME`.
    ///
    /// A leading `~` in `CODEX_HOME` is expanded. The path is canonicalized
    /// when it exists so the keychain account derived from it is stable
    /// across symlinked spellings.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let context = Self::with_home(home_dir);

        match env.first_non_empty(&["CODEX_HOME"]) {
            Some(raw) => {
                let expanded = expand_tilde(raw.trim(), &context.home_dir);
                let resolved = std::fs::canonicalize(&expanded).unwrap_or(expanded);
                context.with_codex_home(resolved)
            }
            None => context,
        }
    }
}

fn expand_tilde(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        home.to_path_buf()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(raw)
    }
}

/// Where one provider's credential lives, per storage tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    /// Secure-store service name
    pub service: String,
    /// Secure-store account, `None` for the platform default
    pub account: Option<String>,
    /// Plaintext JSON fallback file
    pub file_path: PathBuf,
}

/// Static description of an identity provider.
pub struct ProviderDescriptor {
    pub canonical_name: &'static str,
    pub display_name: &'static str,
    /// Every accepted key, including the canonical name
    pub aliases: &'static [&'static str],
    pub token_endpoint: &'static str,
    /// Environment variable that overrides `token_endpoint`
    pub token_endpoint_env: Option<&'static str>,
    /// Checked in order, first non-empty wins
    pub client_id_env_vars: &'static [&'static str],
    pub client_secret_env_vars: &'static [&'static str],
    pub storage: fn(&ProviderContext) -> StorageLocation,
    pub format: &'static dyn CredentialFormat,
}

impl ProviderDescriptor {
    pub fn token_endpoint(&self, env: &dyn EnvSource) -> String {
        self.token_endpoint_env
            .and_then(|name| env.first_non_empty(&[name]))
            .unwrap_or_else(|| self.token_endpoint.to_string())
    }

    pub fn client_id(&self, env: &dyn EnvSource) -> Option<String> {
        env.first_non_empty(self.client_id_env_vars)
    }

    pub fn client_secret(&self, env: &dyn EnvSource) -> Option<String> {
        env.first_non_empty(self.client_secret_env_vars)
    }

    pub fn location(&self, context: &ProviderContext) -> StorageLocation {
        (self.storage)(context)
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("canonical_name", &self.canonical_name)
            .field("aliases", &self.aliases)
            .field("token_endpoint", &self.token_endpoint)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ProviderDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_name == other.canonical_name
    }
}

pub const CLAUDE_KEYCHAIN_SERVICE: &str = "Claude Code-credentials";
pub const CODEX_KEYCHAIN_SERVICE: &str = "Codex Auth";

static CLAUDE_FORMAT: ClaudeOauthFormat = ClaudeOauthFormat;
static CODEX_FORMAT: CodexAuthFormat = CodexAuthFormat;

fn claude_storage(context: &ProviderContext) -> StorageLocation {
    StorageLocation {
        service: CLAUDE_KEYCHAIN_SERVICE.to_string(),
        account: None,
        file_path: context.home_dir.join(".claude").join(".credentials.json"),
    }
}

fn codex_storage(context: &ProviderContext) -> StorageLocation {
    StorageLocation {
        service: CODEX_KEYCHAIN_SERVICE.to_string(),
        account: Some(codex_keychain_account(&context.codex_home)),
        file_path: context.codex_home.join("auth.json"),
    }
}

/// `cli|` followed by the first 16 hex digits of SHA-256 over the Codex home path.
pub fn codex_keychain_account(codex_home: &Path) -> String {
    let digest = Sha256::digest(codex_home.to_string_lossy().as_bytes());
    let hex = format!("{:x}", digest);
    format!("cli|{}", &hex[..16])
}

pub static CLAUDE: ProviderDescriptor = ProviderDescriptor {
    canonical_name: "claude",
    display_name: "Claude",
    aliases: &["claude", "anthropic", "claude-code"],
    token_endpoint: "https://console.anthropic.com/v1/oauth/token",
    token_endpoint_env: Some("CLAUDE_CODE_TOKEN_URL"),
    client_id_env_vars: &["CLAUDE_OAUTH_CLIENT_ID", "CLAUDE_CODE_OAUTH_CLIENT_ID"],
    client_secret_env_vars: &["CLAUDE_OAUTH_CLIENT_SECRET", "CLAUDE_CODE_OAUTH_CLIENT_SECRET"],
    storage: claude_storage,
    format: &CLAUDE_FORMAT,
};

pub static CODEX: ProviderDescriptor = ProviderDescriptor {
    canonical_name: "codex",
    display_name: "Codex",
    aliases: &["codex", "openai-codex", "openai"],
    token_endpoint: "https://api.openai.com/oauth/token",
    token_endpoint_env: Some("CODEX_TOKEN_URL"),
    client_id_env_vars: &["OPENAI_OAUTH_CLIENT_ID", "CODEX_OAUTH_CLIENT_ID"],
    client_secret_env_vars: &["OPENAI_OAUTH_CLIENT_SECRET", "CODEX_OAUTH_CLIENT_SECRET"],
    storage: codex_storage,
    format: &CODEX_FORMAT,
};

/// Alias → descriptor table.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<&'static ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Registry with the Claude and Codex providers.
    pub fn builtin() -> Self {
        Self {
            providers: vec![&CLAUDE, &CODEX],
        }
    }

    /// Registry over a custom provider set. Earlier entries win if two
    /// providers claim the same alias.
    pub fn with_providers(providers: Vec<&'static ProviderDescriptor>) -> Self {
        Self { providers }
    }

    pub fn resolve(&self, key: &str) -> Option<&'static ProviderDescriptor> {
        self.providers
            .iter()
            .copied()
            .find(|p| p.canonical_name == key || p.aliases.contains(&key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    pub fn providers(&self) -> impl Iterator<Item = &'static ProviderDescriptor> + '_ {
        self.providers.iter().copied()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
