mod merge;

pub use self::merge::{MergePolicy, SourceReport, merge};

use crate::error::{ErrorKind, Result};
use crate::models::{Field, MetadataRecord, Provenance};
use crate::provider::{MetadataProvider, ProviderHandle};
use exn::ResultExt;
use futures::future;
use futures::stream::{self, StreamExt};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;
use trackwright_config::ResolverConfig;

/// Fields only audio analysis is expected to fill in reliably.
const ANALYSIS_FIELDS: [Field; 2] = [Field::Bpm, Field::Key];

/// When analysis providers are consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnalysisMode {
    Skip,
    /// Only when tags and lookups leave tempo or key empty.
    #[default]
    WhenMissing,
    /// Always; used to re-verify existing tags.
    Always,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub analysis: AnalysisMode,
}
impl ResolveOptions {
    pub fn reverify() -> Self {
        Self {
            analysis: AnalysisMode::Always,
        }
    }
}

/// Queries every registered provider for a file and merges the answers.
pub struct MetadataResolver {
    providers: Vec<ProviderHandle>,
    policy: MergePolicy,
    concurrency: usize,
}
impl MetadataResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            providers: Vec::new(),
            policy: MergePolicy::from(config),
            concurrency: config.resolve_concurrency.max(1),
        }
    }

    pub fn with_provider(self, provider: impl MetadataProvider + 'static) -> Self {
        self.with_provider_handle(Arc::new(provider))
    }

    pub fn with_provider_handle(mut self, provider: ProviderHandle) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Resolves one file.
    ///
    /// Fails only when a tag provider fails; an unavailable lookup or
    /// analyzer is logged and skipped, and resolution continues with what the
    /// remaining sources produced.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn resolve(&self, path: &Path, options: ResolveOptions) -> Result<MetadataRecord> {
        let mut reports = Vec::new();
        for provider in self.providers.iter().filter(|p| p.provenance() != Provenance::Analysis) {
            self.query(provider, path, &mut reports).await?;
        }

        let analyze = match options.analysis {
            AnalysisMode::Skip => false,
            AnalysisMode::Always => true,
            AnalysisMode::WhenMissing => {
                let so_far = merge(&reports, &self.policy);
                ANALYSIS_FIELDS.iter().any(|field| so_far.get(*field).is_none())
            },
        };
        if analyze {
            for provider in self.providers.iter().filter(|p| p.provenance() == Provenance::Analysis) {
                self.query(provider, path, &mut reports).await?;
            }
        }

        let record = merge(&reports, &self.policy);
        if !record.conflicts().is_empty() {
            tracing::debug!(conflicts = record.conflicts().len(), "Sources disagree");
        }
        Ok(record)
    }

    /// Resolves many files concurrently. Results come back in input order.
    pub async fn resolve_all(&self, paths: &[PathBuf], options: ResolveOptions) -> Vec<Result<MetadataRecord>> {
        let never = AtomicBool::new(false);
        self.resolve_all_until(paths, options, &never).await.unwrap_or_default()
    }

    /// Like [`resolve_all`](Self::resolve_all), but gives up once `stop` is
    /// set, returning `None`.
    ///
    /// The flag is checked before each file, so files already being resolved
    /// finish first and at most the configured concurrency is wasted.
    pub async fn resolve_all_until(
        &self,
        paths: &[PathBuf],
        options: ResolveOptions,
        stop: &AtomicBool,
    ) -> Option<Vec<Result<MetadataRecord>>> {
        let pending: Vec<_> = paths
            .iter()
            .map(|path| async move {
                if stop.load(Ordering::SeqCst) {
                    return None;
                }
                Some(self.resolve(path, options).await)
            })
            .collect();
        let records: Vec<_> = stream::iter(pending)
            .buffered(self.concurrency)
            .take_while(|record| future::ready(record.is_some()))
            .filter_map(future::ready)
            .collect()
            .await;
        if records.len() < paths.len() {
            tracing::debug!(resolved = records.len(), total = paths.len(), "Resolution stopped early");
            return None;
        }
        Some(records)
    }

    async fn query(&self, provider: &ProviderHandle, path: &Path, reports: &mut Vec<SourceReport>) -> Result<()> {
        match provider.resolve(path).await {
            Ok(record) => {
                reports.push(SourceReport::new(provider.name(), provider.provenance(), record));
                Ok(())
            },
            Err(e) if provider.provenance() == Provenance::Tag => {
                Err(e).or_raise(|| ErrorKind::TagsUnreadable(path.to_path_buf()))
            },
            Err(e) => {
                tracing::warn!(
                    source = provider.name(),
                    error = %e.deref(),
                    "Metadata source unavailable, continuing without it"
                );
                Ok(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartialRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        provenance: Provenance,
        record: Option<PartialRecord>,
        calls: Arc<AtomicUsize>,
    }
    impl Fixed {
        fn new(provenance: Provenance, record: Option<PartialRecord>) -> Self {
            Self {
                provenance,
                record,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }
    #[async_trait]
    impl MetadataProvider for Fixed {
        fn name(&self) -> &str {
            self.provenance.as_str()
        }
        fn provenance(&self) -> Provenance {
            self.provenance
        }
        async fn resolve(&self, path: &Path) -> Result<PartialRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.record {
                Some(record) => Ok(record.clone().with(Field::Title, path.display().to_string())),
                None => exn::bail!(ErrorKind::SourceUnavailable(self.provenance.to_string())),
            }
        }
    }

    fn resolver() -> MetadataResolver {
        MetadataResolver::new(&ResolverConfig::default())
    }

    #[tokio::test]
    async fn test_failing_tag_reader_fails_file() {
        let resolver = resolver().with_provider(Fixed::new(Provenance::Tag, None));
        let err = resolver.resolve(Path::new("a.mp3"), ResolveOptions::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TagsUnreadable(_)));
    }

    #[tokio::test]
    async fn test_failing_lookup_falls_back() {
        let resolver = resolver()
            .with_provider(Fixed::new(Provenance::Tag, Some(PartialRecord::new().with(Field::Artist, "Bicep"))))
            .with_provider(Fixed::new(Provenance::Lookup, None));
        let record = resolver.resolve(Path::new("a.mp3"), ResolveOptions::default()).await.unwrap();
        assert_eq!(record.get(Field::Artist), Some("Bicep"));
    }

    #[tokio::test]
    async fn test_analysis_only_when_needed() {
        let analysis = Fixed::new(Provenance::Analysis, Some(PartialRecord::new().with(Field::Bpm, "120")));
        let calls = analysis.calls.clone();
        let complete = PartialRecord::new().with(Field::Bpm, "128").with(Field::Key, "Am");
        let resolver = resolver()
            .with_provider(Fixed::new(Provenance::Tag, Some(complete)))
            .with_provider(analysis);

        let record = resolver.resolve(Path::new("a.mp3"), ResolveOptions::default()).await.unwrap();
        assert_eq!(record.get(Field::Bpm), Some("128"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let record = resolver.resolve(Path::new("a.mp3"), ResolveOptions::reverify()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Tags still win; the analyzer's disagreement is kept as a conflict.
        assert_eq!(record.get(Field::Bpm), Some("128"));
        assert!(record.conflicts().iter().any(|c| c.field == Field::Bpm && c.value == "120"));
    }

    #[tokio::test]
    async fn test_missing_key_triggers_analysis() {
        let analysis = Fixed::new(Provenance::Analysis, Some(PartialRecord::new().with(Field::Key, "Dm")));
        let calls = analysis.calls.clone();
        let resolver = resolver()
            .with_provider(Fixed::new(Provenance::Tag, Some(PartialRecord::new().with(Field::Bpm, "128"))))
            .with_provider(analysis);
        let record = resolver.resolve(Path::new("a.mp3"), ResolveOptions::default()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(record.get(Field::Camelot), Some("7A"));

        let skip = ResolveOptions {
            analysis: AnalysisMode::Skip,
        };
        resolver.resolve(Path::new("a.mp3"), skip).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_all_preserves_order() {
        let resolver = resolver().with_provider(Fixed::new(Provenance::Tag, Some(PartialRecord::new())));
        let paths: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("{i}.flac"))).collect();
        let records = resolver.resolve_all(&paths, ResolveOptions::default()).await;
        let titles: Vec<String> = records
            .into_iter()
            .map(|r| r.unwrap().get(Field::Title).unwrap().to_string())
            .collect();
        let expected: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        assert_eq!(titles, expected);
    }

    /// Raises `stop` on its `after`th call.
    struct Stopping {
        stop: Arc<AtomicBool>,
        after: usize,
        calls: AtomicUsize,
    }
    #[async_trait]
    impl MetadataProvider for Stopping {
        fn name(&self) -> &str {
            "stopping"
        }
        fn provenance(&self) -> Provenance {
            Provenance::Tag
        }
        async fn resolve(&self, _path: &Path) -> Result<PartialRecord> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.stop.store(true, Ordering::SeqCst);
            }
            Ok(PartialRecord::new().with(Field::Title, "x"))
        }
    }

    #[tokio::test]
    async fn test_resolve_all_until_stops_between_files() {
        let stop = Arc::new(AtomicBool::new(false));
        let provider = Arc::new(Stopping {
            stop: stop.clone(),
            after: 3,
            calls: AtomicUsize::new(0),
        });
        let config = ResolverConfig {
            resolve_concurrency: 1,
            ..ResolverConfig::default()
        };
        let resolver = MetadataResolver::new(&config).with_provider_handle(provider.clone());
        let paths: Vec<PathBuf> = (0..40).map(|i| PathBuf::from(format!("{i}.mp3"))).collect();

        assert!(resolver.resolve_all_until(&paths, ResolveOptions::default(), &stop).await.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolve_all_until_without_stop() {
        let resolver = resolver().with_provider(Fixed::new(Provenance::Tag, Some(PartialRecord::new())));
        let paths = vec![PathBuf::from("a.mp3"), PathBuf::from("b.mp3")];
        let stop = AtomicBool::new(false);
        let records = resolver.resolve_all_until(&paths, ResolveOptions::default(), &stop).await.unwrap();
        assert_eq!(records.len(), 2);

        stop.store(true, Ordering::SeqCst);
        assert!(resolver.resolve_all_until(&paths, ResolveOptions::default(), &stop).await.is_none());
    }
}
