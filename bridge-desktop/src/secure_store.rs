//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::debug;

/// Keyring-based secure storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain (generic passwords)
/// - Windows: Credential Manager
/// - Linux: kernel keyutils
///
/// The keyring API is synchronous and may block on an OS permission prompt,
/// so every call runs on the blocking thread pool.
pub struct KeyringSecureStore {
    default_account: String,
}

impl KeyringSecureStore {
    /// Items stored without an explicit account use the OS user name.
    pub fn new() -> Self {
        let default_account = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "default".to_string());
        Self { default_account }
    }

    pub fn with_default_account(account: impl Into<String>) -> Self {
        Self {
            default_account: account.into(),
        }
    }

    fn entry(service: &str, account: &str) -> Result<Entry> {
        Entry::new(service, account).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        match e {
            keyring::Error::NoEntry => BridgeError::NotFound("keyring entry".to_string()),
            keyring::Error::NoStorageAccess(inner) => {
                BridgeError::AccessDenied(format!("Keyring access refused: {}", inner))
            }
            other => BridgeError::OperationFailed(format!("Keyring error: {}", other)),
        }
    }

    async fn blocking<T, F>(f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Keyring task failed: {}", e)))?
    }

    fn account<'a>(&'a self, account: Option<&'a str>) -> String {
        account.unwrap_or(&self.default_account).to_string()
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn get_secret(&self, service: &str, account: Option<&str>) -> Result<Option<String>> {
        let service = service.to_string();
        let account = self.account(account);

        Self::blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match entry.get_password() {
                Ok(value) => {
                    debug!(service = %service, "Read keyring item");
                    Ok(Some(value))
                }
                Err(keyring::Error::NoEntry) => {
                    debug!(service = %service, "Keyring item not found");
                    Ok(None)
                }
                Err(e) => Err(Self::map_keyring_error(e)),
            }
        })
        .await
    }

    async fn set_secret(&self, service: &str, account: Option<&str>, value: &str) -> Result<()> {
        let service = service.to_string();
        let account = self.account(account);
        let value = value.to_string();

        Self::blocking(move || {
            let entry = Self::entry(&service, &account)?;
            entry
                .set_password(&value)
                .map_err(Self::map_keyring_error)?;
            debug!(service = %service, "Stored keyring item");
            Ok(())
        })
        .await
    }

    async fn delete_secret(&self, service: &str, account: Option<&str>) -> Result<()> {
        let service = service.to_string();
        let account = self.account(account);

        Self::blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {
                    debug!(service = %service, "Deleted keyring item");
                    Ok(())
                }
                Err(e) => Err(Self::map_keyring_error(e)),
            }
        })
        .await
    }
}
