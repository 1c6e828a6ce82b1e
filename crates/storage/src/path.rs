//! Path validation and comparison.
//!
//! Batch paths are relative to a backend root. [`validate`] keeps them there,
//! and [`comparison_key`] folds them into the form used to detect two paths
//! that would land on the same file on a case-insensitive filesystem.

use crate::error::{ErrorKind, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Resolves a path relative to the backend root, refusing anything that
/// would leave it.
///
/// `.` components and doubled separators are dropped and `..` is applied
/// lexically, so `a/../track.mp3` is fine but `../track.mp3` is not. Empty
/// results, Windows prefixes and NUL bytes are rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath). Backslashes are
/// left alone.
///
/// ```
/// use std::path::Path;
/// use trackwright_storage::validate_path;
/// assert!(validate_path("Daft Punk/01 - Give Life Back to Music.flac").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b.mp3").is_err());
/// assert_eq!(
///     validate_path("/incoming/./rips//../Bicep - Glue.flac").unwrap(),
///     Path::new("incoming/Bicep - Glue.flac")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(path.to_path_buf());
    let mut kept: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            // Components may carry NUL bytes on Unix, which C syscalls would
            // silently truncate at.
            Component::Normal(name) if name.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(name) => kept.push(name),
            Component::ParentDir if kept.pop().is_none() => exn::bail!(invalid()),
            Component::ParentDir | Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
        }
    }
    if kept.is_empty() {
        exn::bail!(invalid());
    }
    Ok(kept.into_iter().collect())
}

/// Folds a path into the key used for collision detection.
///
/// Comparison follows the most restrictive filesystem the engine supports:
/// case-insensitive, with `.` components and doubled separators removed.
/// Two paths with equal keys must never be handed out to different files.
///
/// ```
/// use trackwright_storage::comparison_key;
/// assert_eq!(comparison_key("Album/01 - Intro.MP3"), comparison_key("album//./01 - intro.mp3"));
/// assert_ne!(comparison_key("Album/01 - Intro.mp3"), comparison_key("Album/02 - Intro.mp3"));
/// ```
pub fn comparison_key(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_lowercase()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
