use crate::error::Result;
use crate::models::{PartialRecord, Provenance};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub type ProviderHandle = Arc<dyn MetadataProvider>;

/// A source of metadata for a single audio file.
///
/// Tag readers, lookup services and analyzers all sit behind this one
/// interface; the resolver only cares about [`provenance`](Self::provenance)
/// when ranking what they return. Adding a source never touches the merge
/// policy.
///
/// Implementations doing CPU-heavy work (decoding, tempo detection) should
/// move it off the async executor themselves, e.g. with
/// `tokio::task::spawn_blocking`.
///
/// ```
/// use async_trait::async_trait;
/// use std::path::Path;
/// use trackwright_metadata::MetadataProvider;
/// use trackwright_metadata::error::Result;
/// use trackwright_metadata::models::{Field, PartialRecord, Provenance};
///
/// struct FilenameGuess;
///
/// #[async_trait]
/// impl MetadataProvider for FilenameGuess {
///     fn name(&self) -> &str {
///         "filename"
///     }
///     fn provenance(&self) -> Provenance {
///         Provenance::Lookup
///     }
///     async fn resolve(&self, path: &Path) -> Result<PartialRecord> {
///         let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
///         Ok(PartialRecord::new().with(Field::Title, stem).with_confidence(0.5))
///     }
/// }
/// ```
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Used for logging and for [`SourceReport`](crate::SourceReport)s.
    fn name(&self) -> &str;

    fn provenance(&self) -> Provenance;

    /// Produces whatever this source knows about `path`.
    ///
    /// Returns [`SourceUnavailable`](crate::error::ErrorKind::SourceUnavailable)
    /// when the source cannot answer at all. For a tag reader that fails
    /// resolution of the file; for any other source the resolver falls back.
    async fn resolve(&self, path: &Path) -> Result<PartialRecord>;
}
