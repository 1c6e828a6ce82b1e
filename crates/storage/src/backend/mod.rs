//! Storage backend trait and implementations.
//!
//! The rename engine only ever needs to know whether a path is occupied and
//! to move a file from one path to another. [`StorageBackend`] captures that,
//! plus `write` so that tests and tooling can seed a backend.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::validate_path;
use async_trait::async_trait;
use std::path::Path;

/// Where the files of a batch live.
///
/// Every path is relative to the backend root. Implementations run each path
/// through [`validate_path`](crate::validate_path) and refuse what it
/// rejects.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use trackwright_storage::backend::StorageBackend;
/// use trackwright_storage::error::{ErrorKind, Result};
///
/// async fn move_if_free(backend: &dyn StorageBackend, from: &Path, to: &Path) -> Result<bool> {
///     match backend.rename(from, to).await {
///         Ok(()) => Ok(true),
///         Err(e) if matches!(&*e, ErrorKind::Occupied(_)) => Ok(false),
///         Err(e) => Err(e),
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Whether anything occupies `path`.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Store `data` at `path`, replacing whatever was there. Used to seed
    /// backends; the rename engine itself never writes file contents.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Whether `a` and `b` both exist and name the same file.
    ///
    /// Two spellings of one path are the same file on a case-insensitive
    /// filesystem, and different files on a case-sensitive one.
    async fn is_same_file(&self, a: &Path, b: &Path) -> Result<bool>;

    /// Move a file to another path of the same backend, creating parent
    /// directories as needed.
    ///
    /// Never replaces another file: fails with
    /// [`Occupied`](crate::error::ErrorKind::Occupied) unless `to` is
    /// [free](Self::is_free_for) for `from`. Fails with
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if `from` does not
    /// exist.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Whether `from` can move to `to` without replacing another file: `to`
    /// is either empty or `from` itself under another spelling.
    async fn is_free_for(&self, from: &Path, to: &Path) -> Result<bool> {
        if validate_path(from)? == validate_path(to)? {
            return Ok(true);
        }
        Ok(!self.exists(to).await? || self.is_same_file(from, to).await?)
    }
}
