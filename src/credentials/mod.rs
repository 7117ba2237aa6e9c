//! Credential storage and brokering.
//!
//! The cached bearer token and the stable user identifier live in a
//! [`SecureStore`]; the [`CredentialBroker`] is the only component that
//! writes to it, and only after a successful refresh.
//!
//! ## Usage
//!
//! ```no_run
//! use fitcoach::config::CoachConfig;
//! use fitcoach::credentials::{CredentialBroker, KeyringStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> fitcoach::Result<()> {
//! let config = CoachConfig::default();
//! let store = Arc::new(KeyringStore::new(&config.auth.keyring_service));
//! let broker = CredentialBroker::new(&config, store, reqwest::Client::new())?;
//! let credential = broker.valid_credential().await?;
//! # let _ = credential;
//! # Ok(())
//! # }
//! ```

mod broker;
mod store;

pub use broker::{Credential, CredentialBroker};
pub use store::{KeyringStore, MemoryStore, SecureStore, StoreError};
