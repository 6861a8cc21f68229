//! Registry configuration.

use std::path::{Path, PathBuf};

use replog_sync::SyncConfig;

/// Where bound logs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// One SQLite database per log, at `<root>/<name>`.
    Sqlite { root: PathBuf },
    /// In-memory logs kept for the lifetime of the registry.
    Memory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Sqlite {
            root: PathBuf::from("."),
        }
    }
}

impl StorageBackend {
    pub fn sqlite(root: impl AsRef<Path>) -> Self {
        StorageBackend::Sqlite {
            root: root.as_ref().to_path_buf(),
        }
    }
}

/// Configuration for the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Storage backend for `bind`.
    pub backend: StorageBackend,
    /// Sync configuration applied to every session.
    pub sync: SyncConfig,
}

impl RegistryConfig {
    /// All logs in memory, default sync settings.
    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sync: SyncConfig::default(),
        }
    }
}
