use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use secstore_backend::memory::DEFAULT_MEMORY_CAPACITY;
use secstore_restore::registry::DEFAULT_CHANNEL_CAPACITY;
use secstore_store::StoreConfig;

use crate::error::{SdkError, SdkResult};

/// Which medium backs the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Memory {
        #[serde(default = "default_capacity")]
        capacity: u64,
    },
    Filesystem {
        root: PathBuf,
        #[serde(default = "default_capacity")]
        capacity: u64,
    },
}

fn default_capacity() -> u64 {
    DEFAULT_MEMORY_CAPACITY
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory {
            capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

/// Top-level configuration for a [`SecStore`](crate::SecStore).
///
/// ```toml
/// notify_channel_capacity = 32
///
/// [backend]
/// kind = "filesystem"
/// root = "/var/lib/secstore"
/// capacity = 1048576
///
/// [store]
/// rebuild_policy = "fail"
/// strict_integrity = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecStoreConfig {
    /// Capacity of the async restore event channel.
    pub notify_channel_capacity: usize,
    pub backend: BackendConfig,
    pub store: StoreConfig,
}

impl Default for SecStoreConfig {
    fn default() -> Self {
        Self {
            notify_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backend: BackendConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl SecStoreConfig {
    /// A filesystem-backed configuration with default tuning.
    pub fn filesystem(root: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            backend: BackendConfig::Filesystem {
                root: root.into(),
                capacity,
            },
            ..Default::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> SdkResult<Self> {
        toml::from_str(raw).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }
}
