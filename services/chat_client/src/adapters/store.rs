//! services/chat_client/src/adapters/store.rs
//!
//! This module contains the file-backed identity store, the concrete implementation
//! of the `IdentityStore` port for a terminal client. Values live in a small JSON
//! object on disk so identities survive restarts.

use async_trait::async_trait;
use chat_sync_core::ports::{IdentityStore, PortError, PortResult};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

type Entries = BTreeMap<String, String>;

/// An identity store persisted as a JSON object in a single file.
pub struct FileIdentityStore {
    path: PathBuf,
    // Serializes read-modify-write cycles against the file.
    lock: Mutex<()>,
}

impl FileIdentityStore {
    /// Creates a store backed by `path`. The file is created on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> PortResult<Entries> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => Ok(Entries::new()),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                PortError::Storage(format!("{} is not a valid state file: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(storage(&self.path, e)),
        }
    }

    /// Writes to a sibling temp file first, then renames it over the target.
    async fn save(&self, entries: &Entries) -> PortResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage(parent, e))?;
        }
        let raw = serde_json::to_vec_pretty(entries)
            .map_err(|e| PortError::Storage(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| storage(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage(&self.path, e))
    }
}

fn storage(path: &Path, e: std::io::Error) -> PortError {
    PortError::Storage(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries).await
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(&entries).await
    }
}
