//! Storage and File System Abstractions
//!
//! Provides platform-agnostic traits for plain file I/O and for the host's
//! secure credential store.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

use crate::error::Result;

/// File system access trait
///
/// Only the handful of operations needed to maintain small JSON documents
/// that may be shared with other programs.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn save(fs: &dyn FileSystemAccess, path: &Path, data: &[u8]) -> Result<()> {
///     if let Some(parent) = path.parent() {
///         fs.create_dir_all(parent).await?;
///     }
///     fs.write_file(path, Bytes::copy_from_slice(data)).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read an entire file.
    ///
    /// A missing file is reported as an error whose
    /// [`is_not_found`](crate::BridgeError::is_not_found) is true.
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Replace the file contents. Implementations should write atomically
    /// and restrict permissions to the owner where the platform allows it.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;
}

/// Secure credential storage trait
///
/// Items are addressed by `(service, account)`, matching the generic-password
/// model of the macOS Keychain. `account` is optional; backends that need one
/// pick a platform default (usually the OS user name).
///
/// Backends map their own failure modes as follows:
/// - item missing → `Ok(None)` from [`get_secret`](SecureStore::get_secret)
/// - user refused access → [`BridgeError::AccessDenied`](crate::BridgeError::AccessDenied)
/// - no backend on this platform → [`BridgeError::NotAvailable`](crate::BridgeError::NotAvailable)
///
/// Implementations MUST never log secret values.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Whether the backend is usable on this host at all.
    fn is_available(&self) -> bool {
        true
    }

    async fn get_secret(&self, service: &str, account: Option<&str>) -> Result<Option<String>>;

    /// Store `value`, replacing any existing item.
    async fn set_secret(&self, service: &str, account: Option<&str>, value: &str) -> Result<()>;

    /// Delete an item. Deleting a missing item is not an error.
    async fn delete_secret(&self, service: &str, account: Option<&str>) -> Result<()>;
}
