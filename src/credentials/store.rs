//! Secure value stores for the cached credential and the stable user id.

use std::collections::HashMap;
use std::sync::Mutex;

/// Errors raised by a [`SecureStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Platform keyring access failed.
    #[error("Keyring access error: {0}")]
    KeyringAccess(String),

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Key/value storage for small secrets.
///
/// `get` returns `Ok(None)` for keys that were never set.
pub trait SecureStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Store backed by the OS keyring (Keychain, Secret Service, Credential Manager).
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| StoreError::KeyringAccess(format!("failed to open entry {key}: {e}")))
    }
}

impl SecureStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::KeyringAccess(format!(
                "failed to read {key}: {e}"
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::KeyringAccess(format!("failed to write {key}: {e}")))
    }
}

/// In-memory store for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, for seeding test fixtures.
    #[must_use]
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_owned(), value.to_owned());
        }
        self
    }
}

impl SecureStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self
            .values
            .lock()
            .map_err(|e| StoreError::StorageError(format!("store lock poisoned: {e}")))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StoreError::StorageError(format!("store lock poisoned: {e}")))?;
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("access_token").unwrap(), None);
        store.set("access_token", "tok-1").unwrap();
        assert_eq!(store.get("access_token").unwrap().as_deref(), Some("tok-1"));
    }

    #[test]
    fn memory_store_set_replaces_wholesale() {
        let store = MemoryStore::new().with_entry("access_token", "old");
        store.set("access_token", "new").unwrap();
        assert_eq!(store.get("access_token").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::KeyringAccess("locked".into());
        assert_eq!(err.to_string(), "Keyring access error: locked");
    }

    #[test]
    #[ignore] // Requires an unlocked OS keyring, run manually
    fn keyring_store_round_trip() {
        let store = KeyringStore::new("com.fitcoach.test");
        store.set("fitcoach.test.token", "secret").unwrap();
        assert_eq!(
            store.get("fitcoach.test.token").unwrap().as_deref(),
            Some("secret")
        );
    }
}
