//! Environment lookup.
//!
//! Client credentials, endpoint overrides and `CODEX_HOME` are read through
//! [`EnvSource`] so tests and embedding hosts can supply their own values
//! without mutating the process environment.

use std::collections::HashMap;

pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;

    /// First non-empty value among `names`, in order.
    fn first_non_empty(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| self.var(name))
            .find(|value| !value.trim().is_empty())
    }
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}
