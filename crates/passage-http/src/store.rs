//! Provided token store implementations.
//!
//! Both stores swap the pair as a unit: a reader either sees the old pair,
//! the new pair, or nothing, never a mixed one.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use passage_core::error::StoreError;
use passage_core::{TokenPair, TokenStore};

/// In-memory token store.
///
/// The default when no persistence is injected: tokens live for the
/// lifetime of the process.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Option<TokenPair> {
        self.state.read().unwrap().clone()
    }

    async fn save(&self, pair: &TokenPair) -> Result<(), StoreError> {
        *self.state.write().unwrap() = Some(pair.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.state.write().unwrap() = None;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTokenStore")
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}

/// On-disk token format: the two well-known keys.
///
/// Absence of either key reads as a fully absent pair.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTokens {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// File-backed token store.
///
/// Writes go to a temp file in the same directory followed by a rename,
/// so a crash mid-write cannot leave a torn pair on disk. The file is
/// created with 0600 permissions since it holds bearer credentials.
/// Loads fail open: a missing, corrupt, or half-written file reads as an
/// absent pair rather than an error.
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    /// Create a store backed by the given file path.
    ///
    /// The file is not touched until the first `save` or `clear`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Option<TokenPair> {
        let contents = tokio::fs::read_to_string(&self.path).await.ok()?;
        let stored: StoredTokens = match serde_json::from_str(&contents) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file corrupt, treating as absent");
                return None;
            }
        };

        // Half a pair is no pair
        match (stored.access_token, stored.refresh_token) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access, refresh)),
            _ => None,
        }
    }

    async fn save(&self, pair: &TokenPair) -> Result<(), StoreError> {
        let stored = StoredTokens {
            access_token: Some(pair.access.as_str().to_string()),
            refresh_token: Some(pair.refresh.as_str().to_string()),
        };
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, &json).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "cleared stored tokens");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!("removing token file: {e}"))),
        }
    }
}

impl std::fmt::Debug for FileTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTokenStore")
            .field("path", &self.path)
            .finish()
    }
}

/// Write the token file atomically via temp file + rename.
async fn write_atomic(path: &Path, json: &str) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io("token path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError::Io(format!("writing temp token file: {e}")))?;

    // 0600: the file holds bearer credentials (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| StoreError::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted tokens");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert!(store.load().await.is_none());

        store.save(&TokenPair::new("at_1", "rt_1")).await.unwrap();
        let pair = store.load().await.unwrap();
        assert_eq!(pair.access.as_str(), "at_1");
        assert_eq!(pair.refresh.as_str(), "rt_1");

        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn memory_store_clear_is_idempotent() {
        let store = MemoryTokenStore::new();
        store.save(&TokenPair::new("at_1", "rt_1")).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::new(path.clone());
        store.save(&TokenPair::new("at_1", "rt_1")).await.unwrap();

        // A fresh instance reads the same pair back
        let store2 = FileTokenStore::new(path);
        let pair = store2.load().await.unwrap();
        assert_eq!(pair.access.as_str(), "at_1");
        assert_eq!(pair.refresh.as_str(), "rt_1");
    }

    #[tokio::test]
    async fn file_store_missing_file_reads_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn file_store_corrupt_file_reads_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = FileTokenStore::new(path);
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn file_store_half_pair_reads_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, r#"{"access_token":"at_1"}"#)
            .await
            .unwrap();

        let store = FileTokenStore::new(path);
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::new(path.clone());
        store.save(&TokenPair::new("at_1", "rt_1")).await.unwrap();

        store.clear().await.unwrap();
        assert!(!path.exists());
        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::new(path.clone());
        store.save(&TokenPair::new("at_1", "rt_1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn file_store_concurrent_saves_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = Arc::new(FileTokenStore::new(path));

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .save(&TokenPair::new(format!("at_{i}"), format!("rt_{i}")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whichever write won, the file holds one complete pair
        let pair = store.load().await.unwrap();
        let suffix = pair.access.as_str().trim_start_matches("at_").to_string();
        assert_eq!(pair.refresh.as_str(), format!("rt_{suffix}"));
    }
}
