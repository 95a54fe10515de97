//! Durable key/value storage for session tokens.
//!
//! The session layer persists exactly two string values, under
//! [`ACCESS_TOKEN_KEY`] and [`REFRESH_TOKEN_KEY`]. Backends:
//! - `FileStore`: a JSON file in the data directory
//! - `KeyringStore`: the OS keychain via keyring
//! - `MemoryStore`: an in-process map, nothing survives a restart

pub mod file;
pub mod keychain;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::StorageBackend;

pub use self::file::FileStore;
pub use self::keychain::KeyringStore;
pub use self::memory::MemoryStore;

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access-token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh-token";

/// Name of the token file inside the data directory
pub const TOKEN_FILE: &str = "session.json";

/// Durable string storage that survives process restarts
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Open the configured backend
pub fn open(backend: StorageBackend, data_dir: &Path) -> Arc<dyn KeyValueStore> {
    match backend {
        StorageBackend::File => Arc::new(FileStore::new(data_dir.join(TOKEN_FILE))),
        StorageBackend::Keyring => Arc::new(KeyringStore::default()),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    }
}
