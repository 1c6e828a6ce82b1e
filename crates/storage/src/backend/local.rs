//! Local filesystem storage backend.

use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::StorageBackend;
use async_trait::async_trait;
use std::fs::Metadata;
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::instrument;

/// A directory on the local filesystem, accessed through `tokio::fs`.
///
/// Two spellings of a path are recognised as one file by device and inode,
/// so case-only renames work on case-insensitive filesystems without ever
/// replacing a case-variant sibling on case-sensitive ones.
///
/// The existence check in [`rename`](StorageBackend::rename) and the rename
/// itself are two separate syscalls, so a file created in between by another
/// process can still be replaced.
///
/// # Examples
///
/// ```no_run
/// use trackwright_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("music", "/srv/music")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Uses `root` as the collection directory, creating it if missing.
    ///
    /// # Errors
    ///
    /// Fails if `root` is relative, or exists and is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        // Once per backend; not worth an async constructor.
        std::fs::create_dir_all(&root).map_err(|e| io_error(e, &root))?;
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The validated relative path and where it lives on disk.
    fn locate(&self, path: &Path) -> Result<(PathBuf, PathBuf)> {
        let relative = validate_path(path)?;
        let absolute = self.root.join(&relative);
        Ok((relative, absolute))
    }

    /// Identifies the file behind `path` independently of how the path is
    /// spelled, or `None` if nothing is there.
    async fn file_id(&self, path: &Path) -> Result<Option<FileId>> {
        let (relative, absolute) = self.locate(path)?;
        match fs::metadata(&absolute).await {
            Ok(metadata) => Ok(Some(FileId::new(&absolute, &metadata).await?)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => exn::bail!(io_error(e, &relative)),
        }
    }

    async fn create_parent(absolute: &Path, relative: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_error(e, relative))?;
        }
        Ok(())
    }
}

/// Device and inode on Unix.
#[cfg(unix)]
#[derive(PartialEq, Eq)]
struct FileId(u64, u64);
#[cfg(unix)]
impl FileId {
    async fn new(_absolute: &Path, metadata: &Metadata) -> Result<Self> {
        use std::os::unix::fs::MetadataExt;
        Ok(Self(metadata.dev(), metadata.ino()))
    }
}

/// The canonical path elsewhere, which carries the on-disk spelling.
#[cfg(not(unix))]
#[derive(PartialEq, Eq)]
struct FileId(PathBuf);
#[cfg(not(unix))]
impl FileId {
    async fn new(absolute: &Path, _metadata: &Metadata) -> Result<Self> {
        Ok(Self(fs::canonicalize(absolute).await.map_err(|e| io_error(e, absolute))?))
    }
}

fn io_error(e: IoError, path: &Path) -> ErrorKind {
    match e.kind() {
        IoErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        IoErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
        IoErrorKind::AlreadyExists => ErrorKind::Occupied(path.to_path_buf()),
        _ => ErrorKind::Io(e),
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let (relative, absolute) = self.locate(path)?;
        Ok(fs::try_exists(&absolute).await.map_err(|e| io_error(e, &relative))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let (relative, absolute) = self.locate(path)?;
        Self::create_parent(&absolute, &relative).await?;
        Ok(fs::write(&absolute, data).await.map_err(|e| io_error(e, &relative))?)
    }

    async fn is_same_file(&self, a: &Path, b: &Path) -> Result<bool> {
        let (Some(first), Some(second)) = (self.file_id(a).await?, self.file_id(b).await?) else {
            return Ok(false);
        };
        Ok(first == second)
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let (from, source) = self.locate(from)?;
        let (to, target) = self.locate(to)?;
        if !self.is_free_for(&from, &to).await? {
            exn::bail!(ErrorKind::Occupied(to));
        }
        Self::create_parent(&target, &to).await?;
        match fs::rename(&source, &target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(from)),
            Err(e) => exn::bail!(io_error(e, &to)),
        }
    }
}
