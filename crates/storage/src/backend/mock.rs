//! In-memory backend for tests in this and dependent crates.

use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock as SyncRwLock};
use tokio::sync::RwLock;

/// In-memory stand-in for a music directory.
///
/// Paths are compared exactly, like a case-sensitive filesystem. Individual
/// paths can be [locked](Self::lock) to simulate permission errors.
///
/// ```
/// use trackwright_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("album/01.mp3", b"ID3")]);
/// backend.rename(Path::new("album/01.mp3"), Path::new("album/01 - Intro.mp3")).await?;
/// assert!(backend.exists(Path::new("album/01 - Intro.mp3")).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockBackend {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
    locked: SyncRwLock<Vec<PathBuf>>,
}

impl MockBackend {
    /// Seeds the backend with `(path, contents)` pairs.
    ///
    /// Panics on a path that fails validation: a broken fixture should fail
    /// the test that uses it.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let files = files
            .into_iter()
            .map(|(path, data)| {
                let path = path.into();
                match validate_path(&path) {
                    Ok(valid) => (valid, data.into()),
                    Err(_) => panic!("MockBackend::with_files: invalid path {}", path.display()),
                }
            })
            .collect();
        Self {
            files: RwLock::new(files),
            locked: SyncRwLock::default(),
        }
    }

    /// Makes every rename from or to `path` fail with `PermissionDenied`.
    pub fn lock(&self, path: impl Into<PathBuf>) {
        self.locked.write().unwrap_or_else(PoisonError::into_inner).push(path.into());
    }

    /// Every stored path, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn is_locked(&self, path: &Path) -> bool {
        self.locked.read().unwrap_or_else(PoisonError::into_inner).iter().any(|p| p == path)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.files.read().await.contains_key(&path))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.files.write().await.insert(path, data.to_vec());
        Ok(())
    }

    /// Paths are compared exactly, so only identical paths are the same file.
    async fn is_same_file(&self, a: &Path, b: &Path) -> Result<bool> {
        let (a, b) = (validate_path(a)?, validate_path(b)?);
        Ok(a == b && self.files.read().await.contains_key(&a))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let (from, to) = (validate_path(from)?, validate_path(to)?);
        if self.is_locked(&from) || self.is_locked(&to) {
            exn::bail!(ErrorKind::PermissionDenied(to));
        }
        let mut files = self.files.write().await;
        if from != to && files.contains_key(&to) {
            exn::bail!(ErrorKind::Occupied(to));
        }
        let Some(data) = files.remove(&from) else {
            exn::bail!(ErrorKind::NotFound(from));
        };
        files.insert(to, data);
        Ok(())
    }
}
