use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::ledger::ReservationLedger;
use crate::template::Template;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use tracing::instrument;
use trackwright_metadata::models::MetadataRecord;
use trackwright_metadata::{AnalysisMode, ResolveOptions};
use trackwright_storage::validate_path;

const ALREADY_MATCHES: &str = "already matches";

/// A set of files to rename with one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Paths relative to the storage backend root.
    pub files: Vec<PathBuf>,
    pub template: String,
    /// Run audio analysis even where tags already supply tempo and key.
    pub reverify: bool,
}
impl Batch {
    pub fn new(files: impl IntoIterator<Item = impl Into<PathBuf>>, template: impl Into<String>) -> Self {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            template: template.into(),
            reverify: false,
        }
    }

    pub fn with_reverify(mut self, reverify: bool) -> Self {
        self.reverify = reverify;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Pending,
    WillRename,
    WillSkip,
    Error,
}
impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            FileStatus::Pending => "pending",
            FileStatus::WillRename => "will_rename",
            FileStatus::WillSkip => "will_skip",
            FileStatus::Error => "error",
        })
    }
}

/// The planned fate of one file in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub source: PathBuf,
    /// `None` when metadata could not be resolved.
    pub record: Option<MetadataRecord>,
    pub destination: Option<PathBuf>,
    pub status: FileStatus,
    /// Why the file is skipped or failed.
    pub reason: Option<String>,
}
impl FileEntry {
    fn pending(source: PathBuf) -> Self {
        Self {
            source,
            record: None,
            destination: None,
            status: FileStatus::Pending,
            reason: None,
        }
    }

    fn fail(&mut self, reason: impl Display) {
        self.status = FileStatus::Error;
        self.reason = Some(reason.to_string());
    }
}

/// Resolves metadata for every file in the batch and works out where each
/// one goes. Touches nothing on disk.
///
/// Per-file problems (unreadable tags, empty expansion, unresolvable
/// collision) are recorded on that file's entry; the rest of the batch is
/// still planned. Returns `None` if `cancel` is raised while metadata is
/// being resolved.
#[instrument(skip_all, fields(files = batch.files.len(), template = %template))]
pub(crate) async fn plan(
    ctx: &Context,
    batch: &Batch,
    template: &Template,
    analysis: AnalysisMode,
    cancel: &AtomicBool,
) -> Option<Vec<FileEntry>> {
    let mut entries: Vec<FileEntry> = batch.files.iter().cloned().map(FileEntry::pending).collect();

    let mut valid = Vec::new();
    for (idx, entry) in entries.iter_mut().enumerate() {
        match validate_path(&entry.source) {
            Ok(path) => {
                entry.source = path;
                valid.push(idx);
            },
            Err(e) => entry.fail(&*e),
        }
    }
    let sources: Vec<PathBuf> = valid.iter().map(|idx| entries[*idx].source.clone()).collect();
    let records = ctx.resolver.resolve_all_until(&sources, ResolveOptions { analysis }, cancel).await?;
    for (idx, record) in valid.into_iter().zip(records) {
        match record {
            Ok(record) => entries[idx].record = Some(record),
            Err(e) => {
                tracing::warn!(source = %entries[idx].source.display(), error = %e.deref(), "Metadata unavailable");
                entries[idx].fail(&*e);
            },
        }
    }

    let mut ledger = ReservationLedger::new(&ctx.backend, &ctx.templates, ctx.max_disambiguator);
    // Files that cannot move still occupy their names.
    for entry in entries.iter().filter(|e| e.status == FileStatus::Error) {
        ledger.hold(&entry.source);
    }
    for entry in entries.iter_mut().filter(|e| e.status == FileStatus::Pending) {
        match destination(ctx, &mut ledger, template, entry).await {
            Ok(destination) if destination == entry.source => {
                entry.status = FileStatus::WillSkip;
                entry.reason = Some(ALREADY_MATCHES.to_string());
                entry.destination = Some(destination);
            },
            Ok(destination) => {
                entry.status = FileStatus::WillRename;
                entry.destination = Some(destination);
            },
            Err(e) => {
                tracing::warn!(source = %entry.source.display(), error = %e.deref(), "Cannot plan destination");
                entry.fail(&*e);
            },
        }
    }
    Some(entries)
}

async fn destination(
    ctx: &Context,
    ledger: &mut ReservationLedger<'_>,
    template: &Template,
    entry: &FileEntry,
) -> Result<PathBuf> {
    let Some(record) = &entry.record else {
        exn::bail!(ErrorKind::Metadata);
    };
    let stem = ctx.templates.expand(template, record)?;
    ledger.reserve(&entry.source, &stem).await
}
