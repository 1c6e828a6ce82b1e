//! Fixtures shared by the unit tests of this crate.

use crate::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use trackwright_config::Config;
use trackwright_metadata::error::{ErrorKind as MetadataErrorKind, Result as MetadataResult};
use trackwright_metadata::models::{Field, PartialRecord, Provenance};
use trackwright_metadata::{MetadataProvider, MetadataResolver, ProviderHandle};
use trackwright_storage::backend::{MockBackend, StorageBackend};
use trackwright_storage::error::Result as StorageResult;
use trackwright_storage::BackendHandle;

/// Embedded tags looked up by path. Unknown paths have unreadable tags.
#[derive(Default)]
pub(crate) struct TagTable(HashMap<PathBuf, PartialRecord>);
impl TagTable {
    pub(crate) fn with(mut self, path: &str, tags: &[(Field, &str)]) -> Self {
        let record = tags.iter().map(|(f, v)| (*f, v.to_string())).collect();
        self.0.insert(PathBuf::from(path), record);
        self
    }
}
#[async_trait]
impl MetadataProvider for TagTable {
    fn name(&self) -> &str {
        "tag-table"
    }
    fn provenance(&self) -> Provenance {
        Provenance::Tag
    }
    async fn resolve(&self, path: &Path) -> MetadataResult<PartialRecord> {
        match self.0.get(path) {
            Some(record) => Ok(record.clone()),
            None => exn::bail!(MetadataErrorKind::SourceUnavailable(path.display().to_string())),
        }
    }
}

/// A tag reader that brings the worker down.
pub(crate) struct Panicking;
#[async_trait]
impl MetadataProvider for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }
    fn provenance(&self) -> Provenance {
        Provenance::Tag
    }
    async fn resolve(&self, _path: &Path) -> MetadataResult<PartialRecord> {
        panic!("tag reader exploded");
    }
}

/// A tag reader whose first read parks until released; later reads answer
/// straight away.
pub(crate) struct StallingTags {
    calls: AtomicUsize,
    pub(crate) reached: Arc<Notify>,
    pub(crate) release: Arc<Notify>,
}
impl StallingTags {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
#[async_trait]
impl MetadataProvider for StallingTags {
    fn name(&self) -> &str {
        "stalling-tags"
    }
    fn provenance(&self) -> Provenance {
        Provenance::Tag
    }
    async fn resolve(&self, path: &Path) -> MetadataResult<PartialRecord> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.reached.notify_one();
            self.release.notified().await;
        }
        Ok(PartialRecord::new()
            .with(Field::Artist, "Artist")
            .with(Field::Title, path.display().to_string()))
    }
}

/// Wraps a [`MockBackend`] and parks inside the `n`th rename, after it has
/// been applied, until released.
pub(crate) struct GatedBackend {
    inner: Arc<MockBackend>,
    park_after: usize,
    renames: AtomicUsize,
    pub(crate) reached: Arc<Notify>,
    pub(crate) release: Arc<Notify>,
}
impl GatedBackend {
    pub(crate) fn new(inner: Arc<MockBackend>, park_after: usize) -> Self {
        Self {
            inner,
            park_after,
            renames: AtomicUsize::new(0),
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}
#[async_trait]
impl StorageBackend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }
    async fn exists(&self, path: &Path) -> StorageResult<bool> {
        self.inner.exists(path).await
    }
    async fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.inner.write(path, data).await
    }
    async fn is_same_file(&self, a: &Path, b: &Path) -> StorageResult<bool> {
        self.inner.is_same_file(a, b).await
    }
    async fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        self.inner.rename(from, to).await?;
        if self.renames.fetch_add(1, Ordering::SeqCst) + 1 == self.park_after {
            self.reached.notify_one();
            self.release.notified().await;
        }
        Ok(())
    }
}

pub(crate) fn context(backend: BackendHandle, provider: impl MetadataProvider + 'static) -> Arc<Context> {
    context_with(backend, Arc::new(provider))
}

/// Like [`context`], for a provider the test keeps a handle to.
pub(crate) fn context_with(backend: BackendHandle, provider: ProviderHandle) -> Arc<Context> {
    let config = Config::default();
    let resolver = MetadataResolver::new(&config.resolver).with_provider_handle(provider);
    Arc::new(Context::new(&config, backend, resolver))
}

/// `n` files named `in/<i>.mp3`, each tagged with a distinct title.
pub(crate) fn numbered(n: usize) -> (Arc<MockBackend>, TagTable, Vec<PathBuf>) {
    let paths: Vec<PathBuf> = (1..=n).map(|i| PathBuf::from(format!("in/{i}.mp3"))).collect();
    let backend = Arc::new(MockBackend::with_files(paths.iter().map(|p| (p.clone(), "audio"))));
    let mut tags = TagTable::default();
    for (i, path) in paths.iter().enumerate() {
        let title = format!("Song {}", i + 1);
        let key = path.to_str().unwrap_or_default();
        tags = tags.with(key, &[(Field::Artist, "Artist"), (Field::Title, &title)]);
    }
    (backend, tags, paths)
}
