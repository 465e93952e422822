//! Raw file storage for document payloads.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    tracing::{debug, warn},
};

/// Stores and retrieves raw document bytes by filename.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<()>;

    /// `Ok(None)` when the file is not present.
    async fn retrieve(&self, filename: &str) -> Result<Option<Vec<u8>>>;
}

// ── Filesystem-backed store ─────────────────────────────────────────────────

/// File store writing into an uploads directory.
pub struct FsFileStore {
    uploads_dir: PathBuf,
}

impl FsFileStore {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Reject names that would escape the uploads directory.
    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let name = Path::new(filename);
        if filename.is_empty()
            || name.components().count() != 1
            || name.file_name().is_none()
        {
            bail!("invalid filename: {filename}");
        }
        Ok(self.uploads_dir.join(name))
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(filename)?;
        tokio::fs::create_dir_all(&self.uploads_dir)
            .await
            .with_context(|| format!("creating uploads dir {}", self.uploads_dir.display()))?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(filename, size = bytes.len(), "file stored");
        Ok(())
    }

    async fn retrieve(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(filename, error = %e, "failed to read stored file");
                Err(e).with_context(|| format!("reading {}", path.display()))
            },
        }
    }
}

// ── In-memory store ─────────────────────────────────────────────────────────

/// In-memory file store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Filenames that fail on `store`, for failure-path tests.
    reject: Mutex<Vec<String>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `store` fail for the given filename.
    pub fn reject_filename(&self, filename: impl Into<String>) {
        self.reject.lock().unwrap().push(filename.into());
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        if self.reject.lock().unwrap().iter().any(|f| f == filename) {
            bail!("storage rejected {filename}");
        }
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn retrieve(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.lock().unwrap().get(filename).cloned())
    }
}
