//! Tiered credential persistence.
//!
//! Tier 1 is the OS secure store, when one is configured and available.
//! Tier 2 is a plaintext JSON file that may be shared with the provider's
//! own CLI. Nothing in this module returns an error. Absence, corruption,
//! denied access and I/O failures are logged and reported as `None` or
//! `false`.

use bridge_traits::{BridgeError, Clock, FileSystemAccess, SecureStore};
use bytes::Bytes;
use core_runtime::config::WriteMode;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::providers::{ProviderContext, ProviderDescriptor, StorageLocation};
use crate::types::Credential;

/// Which tier a credential document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    SecureStore,
    File,
}

/// Per-tier result of a write-through. `None` means the tier was not tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub secure: Option<bool>,
    pub file: Option<bool>,
}

impl PersistOutcome {
    /// At least one tier accepted the write.
    pub fn is_durable(&self) -> bool {
        self.secure == Some(true) || self.file == Some(true)
    }
}

pub struct CredentialStore {
    secure_store: Option<Arc<dyn SecureStore>>,
    file_system: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    write_mode: WriteMode,
}

impl CredentialStore {
    pub fn new(
        secure_store: Option<Arc<dyn SecureStore>>,
        file_system: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        write_mode: WriteMode,
    ) -> Self {
        Self {
            secure_store,
            file_system,
            clock,
            write_mode,
        }
    }

    fn secure(&self) -> Option<&Arc<dyn SecureStore>> {
        self.secure_store.as_ref().filter(|store| store.is_available())
    }

    pub fn secure_store_available(&self) -> bool {
        self.secure().is_some()
    }

    // ---------------------------------------------------------------------
    // Tier 1: secure store
    // ---------------------------------------------------------------------

    /// Read and parse a secure-store item.
    ///
    /// Not found, access denied, an unavailable backend and unparseable
    /// content all yield `None`.
    pub async fn read(&self, service: &str, account: Option<&str>) -> Option<Value> {
        let store = self.secure()?;

        let raw = match store.get_secret(service, account).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(service = %service, "No secure-store item");
                return None;
            }
            Err(BridgeError::AccessDenied(reason)) => {
                warn!(service = %service, reason = %reason, "Secure-store access denied, treating as absent");
                return None;
            }
            Err(e) => {
                warn!(service = %service, error = %e, "Secure-store read failed, treating as absent");
                return None;
            }
        };

        parse_document(&raw, service)
    }

    /// Replace a secure-store item with `data`.
    ///
    /// The old item is deleted first because some backends reject duplicate
    /// keys; a failed delete is ignored.
    pub async fn write(&self, service: &str, account: Option<&str>, data: &Value) -> bool {
        let Some(store) = self.secure() else {
            return false;
        };

        let serialized = match serde_json::to_string(data) {
            Ok(s) => s,
            Err(e) => {
                warn!(service = %service, error = %e, "Could not serialize credential document");
                return false;
            }
        };

        if let Err(e) = store.delete_secret(service, account).await {
            debug!(service = %service, error = %e, "Pre-write delete failed, continuing");
        }

        match store.set_secret(service, account, &serialized).await {
            Ok(()) => {
                debug!(service = %service, "Wrote secure-store item");
                true
            }
            Err(e) => {
                warn!(service = %service, error = %e, "Secure-store write failed");
                false
            }
        }
    }

    /// Delete a secure-store item. A missing item counts as deleted.
    pub async fn delete(&self, service: &str, account: Option<&str>) -> bool {
        let Some(store) = self.secure() else {
            return false;
        };

        match store.delete_secret(service, account).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!(service = %service, error = %e, "Secure-store delete failed");
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Tier 2: JSON file
    // ---------------------------------------------------------------------

    /// Read the fallback file. Missing, empty and malformed files all yield `None`.
    pub async fn read_file(&self, path: &Path) -> Option<Value> {
        let bytes = match self.file_system.read_file(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!(path = ?path, "Credential file not found");
                return None;
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Credential file unreadable, treating as absent");
                return None;
            }
        };

        let text = String::from_utf8_lossy(&bytes);
        parse_document(&text, &path.display().to_string())
    }

    /// Apply `update` to the file's top-level object and write it back,
    /// preserving every key `update` does not touch. If the update leaves
    /// the object empty, the file is deleted.
    pub async fn update_file<F>(&self, path: &Path, update: F) -> bool
    where
        F: FnOnce(&mut Map<String, Value>) + Send,
    {
        let mut document = match self.read_file(path).await {
            Some(Value::Object(map)) => map,
            Some(_) => {
                warn!(path = ?path, "Credential file is not a JSON object, replacing it");
                Map::new()
            }
            None => Map::new(),
        };

        update(&mut document);

        if document.is_empty() {
            return match self.file_system.delete_file(path).await {
                Ok(()) => true,
                Err(e) if e.is_not_found() => true,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Could not delete empty credential file");
                    false
                }
            };
        }

        let bytes = match serde_json::to_vec_pretty(&Value::Object(document)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = ?path, error = %e, "Could not serialize credential file");
                return false;
            }
        };

        match self.file_system.write_file(path, Bytes::from(bytes)).await {
            Ok(()) => {
                debug!(path = ?path, "Wrote credential file");
                true
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Credential file write failed");
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Provider-level operations
    // ---------------------------------------------------------------------

    /// Load and normalize a provider's credential, secure store first.
    ///
    /// A tier whose document is missing, unparseable or holds only a
    /// partial record is skipped.
    #[instrument(skip(self, descriptor, context), fields(provider = descriptor.canonical_name))]
    pub async fn read_credential(
        &self,
        descriptor: &ProviderDescriptor,
        context: &ProviderContext,
    ) -> Option<Credential> {
        let location = descriptor.location(context);

        if let Some(document) = self.read(&location.service, location.account.as_deref()).await {
            if let Some(credential) = decode_complete(descriptor, &document, StorageTier::SecureStore) {
                return Some(credential);
            }
        }

        let document = self.read_file(&location.file_path).await?;
        decode_complete(descriptor, &document, StorageTier::File)
    }

    /// Write `credential` through according to the configured [`WriteMode`].
    #[instrument(skip(self, descriptor, context, credential), fields(provider = descriptor.canonical_name))]
    pub async fn write_credential(
        &self,
        descriptor: &ProviderDescriptor,
        context: &ProviderContext,
        credential: &Credential,
    ) -> PersistOutcome {
        let location = descriptor.location(context);
        let mut outcome = PersistOutcome::default();

        if self.secure_store_available() {
            outcome.secure = Some(self.write_secure_merged(descriptor, &location, credential).await);
        }

        let want_file = match self.write_mode {
            WriteMode::Mirror => true,
            WriteMode::PreferSecure => outcome.secure != Some(true),
        };
        if want_file {
            let now = self.clock.now();
            let written = self
                .update_file(&location.file_path, |document| {
                    descriptor.format.encode_into(document, credential, now)
                })
                .await;
            outcome.file = Some(written);
        }

        if !outcome.is_durable() {
            warn!(?outcome, "Credential could not be persisted to any tier");
        }
        outcome
    }

    /// Remove a provider's credential from both tiers.
    pub async fn remove_credential(
        &self,
        descriptor: &ProviderDescriptor,
        context: &ProviderContext,
    ) -> bool {
        let location = descriptor.location(context);

        let secure_ok = if self.secure_store_available() {
            self.delete(&location.service, location.account.as_deref()).await
        } else {
            true
        };

        let file_ok = if self.read_file(&location.file_path).await.is_some() {
            self.update_file(&location.file_path, |document| {
                descriptor.format.remove_from(document)
            })
            .await
        } else {
            true
        };

        secure_ok && file_ok
    }

    async fn write_secure_merged(
        &self,
        descriptor: &ProviderDescriptor,
        location: &StorageLocation,
        credential: &Credential,
    ) -> bool {
        let account = location.account.as_deref();
        let mut document = match self.read(&location.service, account).await {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        descriptor
            .format
            .encode_into(&mut document, credential, self.clock.now());

        self.write(&location.service, account, &Value::Object(document))
            .await
    }
}

fn parse_document(raw: &str, source: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        debug!(source = %source, "Credential document is empty");
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(source = %source, error = %e, "Credential document is not valid JSON");
            None
        }
    }
}

fn decode_complete(
    descriptor: &ProviderDescriptor,
    document: &Value,
    tier: StorageTier,
) -> Option<Credential> {
    match descriptor.format.decode(document) {
        Some(credential) if credential.is_complete() => {
            debug!(?tier, "Loaded credential");
            Some(credential)
        }
        Some(_) => {
            warn!(?tier, "Ignoring partial credential record");
            None
        }
        None => {
            debug!(?tier, "Document holds no credential for this provider");
            None
        }
    }
}
