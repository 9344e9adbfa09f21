//! Durable storage for the credential pair
//!
//! The session manager only ever stores one JSON record under one key; the
//! trait is key/value so a single backend can be shared with other state.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::AuthError;

/// Key/value storage, modeled on browser local storage
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AuthError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError>;

    async fn remove_item(&self, key: &str) -> Result<(), AuthError>;
}

/// In-process storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AuthError> {
        let items = self
            .items
            .read()
            .map_err(|_| AuthError::StorageError("memory storage poisoned".into()))?;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| AuthError::StorageError("memory storage poisoned".into()))?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), AuthError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| AuthError::StorageError("memory storage poisoned".into()))?;
        items.remove(key);
        Ok(())
    }
}

/// One file per key inside a directory.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// reader never sees a half-written record.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> AuthError {
    AuthError::StorageError(format!("failed to {} {}: {}", action, path.display(), e))
}

#[async_trait]
impl TokenStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AuthError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", &path, e)),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), AuthError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("create", &self.dir, e))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("replace", &path, e))?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), AuthError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &path, e)),
        }
    }
}
