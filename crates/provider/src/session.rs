//! Session credential storage.
//!
//! Credentials are opaque key material persisted between runs so a paired
//! session survives restarts. Purging them forces a fresh pairing.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    tracing::{debug, info, warn},
};

/// Persisted session credential artifacts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Delete all credential artifacts, best-effort. Returns the number
    /// removed; per-artifact failures are logged, not fatal.
    async fn purge(&self) -> Result<usize>;

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn save(&self, key: &str, material: &[u8]) -> Result<()>;
}

// ── Filesystem-backed store ─────────────────────────────────────────────────

/// Credentials as `<key>.json` files under an auth directory.
pub struct FsSessionStore {
    auth_dir: PathBuf,
}

impl FsSessionStore {
    pub fn new(auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            auth_dir: auth_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.auth_dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn purge(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.auth_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.auth_dir.display(), "auth dir absent, nothing to purge");
                return Ok(0);
            },
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading auth dir {}", self.auth_dir.display()));
            },
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove session file"),
            }
        }

        info!(removed, "purged session credentials");
        Ok(removed)
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("loading session key {key}")),
        }
    }

    async fn save(&self, key: &str, material: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.auth_dir)
            .await
            .with_context(|| format!("creating auth dir {}", self.auth_dir.display()))?;
        tokio::fs::write(self.path_for(key), material)
            .await
            .with_context(|| format!("saving session key {key}"))
    }
}

// ── In-memory store ─────────────────────────────────────────────────────────

/// In-memory session store for tests.
#[derive(Default)]
pub struct MemorySessionStore {
    material: Mutex<HashMap<String, Vec<u8>>>,
    purges: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `purge` has been called.
    pub fn purge_count(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn purge(&self) -> Result<usize> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        let mut material = self.material.lock().unwrap();
        let removed = material.len();
        material.clear();
        Ok(removed)
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.material.lock().unwrap().get(key).cloned())
    }

    async fn save(&self, key: &str, material: &[u8]) -> Result<()> {
        self.material
            .lock()
            .unwrap()
            .insert(key.to_string(), material.to_vec());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_purge_removes_only_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());

        store.save("creds", b"{}").await.unwrap();
        store.save("keys", b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"keep")
            .await
            .unwrap();

        assert_eq!(store.purge().await.unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(store.load("creds").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fs_purge_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path().join("never-created"));
        assert_eq!(store.purge().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_store_counts_purges() {
        let store = MemorySessionStore::new();
        store.save("creds", b"x").await.unwrap();

        assert_eq!(store.purge().await.unwrap(), 1);
        assert_eq!(store.purge().await.unwrap(), 0);
        assert_eq!(store.purge_count(), 2);
    }
}
