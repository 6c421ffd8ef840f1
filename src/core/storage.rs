//! Window-scoped persistence for captured manifests
//!
//! Storage is an opaque key/value collaborator: each browser window gets one
//! record holding its serialized manifest set.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::models::{AppError, AppResult, WindowId, NO_WINDOW};
use crate::utils::file_utils::{ensure_dir_exists, sanitize_filename};

/// Key used for captures outside any window
pub const DEFAULT_STORAGE_KEY: &str = "manifests_default";

/// Storage key for a window's manifest set
pub fn storage_key(window_id: WindowId) -> String {
    if window_id == NO_WINDOW {
        DEFAULT_STORAGE_KEY.to_string()
    } else {
        format!("manifests_window_{}", window_id)
    }
}

/// Opaque blob storage keyed by string
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn read(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    async fn write(&self, key: &str, value: Vec<u8>) -> AppResult<()>;

    async fn remove(&self, key: &str) -> AppResult<()>;
}

/// Process-local store, used when persistence is disabled and in tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ManifestStore for MemoryStore {
    async fn read(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> AppResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a data directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        ensure_dir_exists(&root).map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_filename(key)))
    }
}

#[async_trait]
impl ManifestStore for FileStore {
    async fn read(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> AppResult<()> {
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, value).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
