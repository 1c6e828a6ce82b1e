use crate::error::{ErrorKind, Result};
use crate::template::TemplateEngine;
use exn::ResultExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use trackwright_storage::{BackendHandle, comparison_key};

/// Hands out destination paths that are unique within one batch.
///
/// Paths are compared case-insensitively, as the most restrictive supported
/// filesystem would. A candidate is rejected when another file in the batch
/// already reserved it, or when something already exists there that the
/// backend does not recognise as the file's own source. Rejected candidates get a `" (n)"` disambiguator
/// before the extension, starting at 2, so the first file to ask claims the
/// bare name.
///
/// A ledger is scoped to a single batch and keeps no state beyond it.
pub struct ReservationLedger<'a> {
    backend: &'a BackendHandle,
    engine: &'a TemplateEngine,
    max_disambiguator: u32,
    reserved: HashSet<String>,
}
impl<'a> ReservationLedger<'a> {
    pub fn new(backend: &'a BackendHandle, engine: &'a TemplateEngine, max_disambiguator: u32) -> Self {
        Self {
            backend,
            engine,
            max_disambiguator,
            reserved: HashSet::new(),
        }
    }

    /// Reserves a destination for `source` renamed to `stem`, in the same
    /// directory and with the same extension.
    ///
    /// Fails with [`ErrorKind::CollisionUnresolved`] listing every name tried
    /// when all candidates up to the configured maximum are taken.
    pub async fn reserve(&mut self, source: &Path, stem: &str) -> Result<PathBuf> {
        let directory = source.parent().unwrap_or(Path::new(""));
        let extension = source.extension().and_then(|e| e.to_str());

        let mut attempted = Vec::new();
        for disambiguator in std::iter::once(None).chain((2..=self.max_disambiguator).map(Some)) {
            let candidate = directory.join(self.engine.file_name(stem, disambiguator, extension));
            let key = comparison_key(&candidate);
            let free = if self.reserved.contains(&key) {
                false
            } else if candidate == source {
                true
            } else {
                // Covers re-casing: a case variant of the source is only free
                // if it is the source itself or nothing at all.
                self.backend.is_free_for(source, &candidate).await.or_raise(|| ErrorKind::Storage)?
            };
            if free {
                self.reserved.insert(key);
                return Ok(candidate);
            }
            tracing::debug!(source = %source.display(), candidate = %candidate.display(), "Destination taken");
            attempted.push(candidate);
        }
        exn::bail!(ErrorKind::CollisionUnresolved { attempted })
    }

    /// Marks a path as taken without checking it, for files that stay where
    /// they are.
    pub fn hold(&mut self, path: &Path) {
        self.reserved.insert(comparison_key(path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Deref;
    use std::sync::Arc;
    use trackwright_config::TemplateConfig;
    use trackwright_storage::backend::MockBackend;

    fn engine() -> TemplateEngine {
        TemplateEngine::new(&TemplateConfig::default())
    }

    #[tokio::test]
    async fn test_first_file_claims_bare_name() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("in/1.mp3", b""), ("in/2.mp3", b"")]));
        let engine = engine();
        let mut ledger = ReservationLedger::new(&backend, &engine, 999);
        let first = ledger.reserve(Path::new("in/1.mp3"), "A - B").await.unwrap();
        let second = ledger.reserve(Path::new("in/2.mp3"), "A - B").await.unwrap();
        assert_eq!(first, PathBuf::from("in/A - B.mp3"));
        assert_eq!(second, PathBuf::from("in/A - B (2).mp3"));
    }

    #[tokio::test]
    async fn test_collisions_are_case_insensitive() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("1.mp3", b""), ("2.MP3", b"")]));
        let engine = engine();
        let mut ledger = ReservationLedger::new(&backend, &engine, 999);
        let first = ledger.reserve(Path::new("1.mp3"), "Daft Punk - One More Time").await.unwrap();
        let second = ledger.reserve(Path::new("2.MP3"), "daft punk - one more time").await.unwrap();
        assert_eq!(first, PathBuf::from("Daft Punk - One More Time.mp3"));
        assert_eq!(second, PathBuf::from("daft punk - one more time (2).MP3"));
    }

    #[tokio::test]
    async fn test_existing_file_is_avoided_unless_it_is_the_source() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("A - B.mp3", b""), ("x.mp3", b"")]));
        let engine = engine();
        let mut ledger = ReservationLedger::new(&backend, &engine, 999);
        assert_eq!(
            ledger.reserve(Path::new("x.mp3"), "A - B").await.unwrap(),
            PathBuf::from("A - B (2).mp3")
        );
        let mut ledger = ReservationLedger::new(&backend, &engine, 999);
        assert_eq!(
            ledger.reserve(Path::new("A - B.mp3"), "A - B").await.unwrap(),
            PathBuf::from("A - B.mp3")
        );
    }

    #[tokio::test]
    async fn test_case_variant_sibling_is_not_claimed() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("a - b.mp3", b"mine"), ("A - B.mp3", b"else")]));
        let engine = engine();
        let mut ledger = ReservationLedger::new(&backend, &engine, 999);
        let reserved = ledger.reserve(Path::new("a - b.mp3"), "A - B").await.unwrap();
        assert_eq!(reserved, PathBuf::from("A - B (2).mp3"));
    }

    #[tokio::test]
    async fn test_recasing_own_name_is_allowed() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("a - b.mp3", b"")]));
        let engine = engine();
        let mut ledger = ReservationLedger::new(&backend, &engine, 999);
        let reserved = ledger.reserve(Path::new("a - b.mp3"), "A - B").await.unwrap();
        assert_eq!(reserved, PathBuf::from("A - B.mp3"));
    }

    #[tokio::test]
    async fn test_held_paths_are_respected() {
        let backend: BackendHandle = Arc::new(MockBackend::default());
        let engine = engine();
        let mut ledger = ReservationLedger::new(&backend, &engine, 999);
        ledger.hold(Path::new("A - B.flac"));
        let reserved = ledger.reserve(Path::new("gone.flac"), "a - b").await.unwrap();
        assert_eq!(reserved, PathBuf::from("a - b (2).flac"));
    }

    #[tokio::test]
    async fn test_unresolved_collision_lists_attempts() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([
            ("A.mp3", b""),
            ("A (2).mp3", b""),
            ("A (3).mp3", b""),
            ("src.mp3", b""),
        ]));
        let engine = engine();
        let mut ledger = ReservationLedger::new(&backend, &engine, 3);
        let err = ledger.reserve(Path::new("src.mp3"), "A").await.unwrap_err();
        match &*err {
            ErrorKind::CollisionUnresolved { attempted } => assert_eq!(
                attempted,
                &[PathBuf::from("A.mp3"), PathBuf::from("A (2).mp3"), PathBuf::from("A (3).mp3")]
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.deref().to_string().ends_with("A.mp3, A (2).mp3, A (3).mp3"));
    }

    #[tokio::test]
    async fn test_mapping_is_injective() {
        let files: Vec<(String, &[u8])> = (0..50).map(|i| (format!("in/{i}.mp3"), b"".as_slice())).collect();
        let backend: BackendHandle = Arc::new(MockBackend::with_files(files.clone()));
        let engine = engine();
        let mut ledger = ReservationLedger::new(&backend, &engine, 999);
        let mut seen = HashSet::new();
        for (i, (source, _)) in files.iter().enumerate() {
            // Only a handful of distinct stems, differing in case.
            let stem = if i % 2 == 0 { format!("Track {}", i % 5) } else { format!("TRACK {}", i % 5) };
            let destination = ledger.reserve(Path::new(source), &stem).await.unwrap();
            assert!(seen.insert(comparison_key(&destination)), "{} reserved twice", destination.display());
        }
    }
}
