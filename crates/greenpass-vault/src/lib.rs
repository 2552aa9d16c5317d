//! Local persistence for the greenpass holder.
//!
//! - [`secret_key`]: the installation's holder secret, created once and never transmitted
//! - [`in_memory_backend`] / [`storage`]: key-value records behind `StorageBackend`
//! - [`card_store`] / [`sqlite_card_store`]: GreenCard rows behind `GreenCardStore`

pub mod card_store;
pub mod error;
pub mod in_memory_backend;
pub mod secret_key;

#[cfg(feature = "sqlite")]
pub mod sqlite_card_store;
#[cfg(feature = "sqlite")]
pub mod storage;

pub use card_store::InMemoryGreenCardStore;
pub use error::*;
pub use in_memory_backend::InMemoryBackend;
pub use secret_key::{SecretKey, SecretKeyStore};

#[cfg(feature = "sqlite")]
pub use sqlite_card_store::SqliteGreenCardStore;
#[cfg(feature = "sqlite")]
pub use storage::SqliteBackend;
