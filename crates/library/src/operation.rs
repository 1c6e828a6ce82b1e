//! Asynchronous batch execution.
//!
//! [`OperationManager::start`] plans and renames a batch on a background
//! task and returns straight away. Callers poll [`status`](OperationManager::status)
//! or await [`wait`](OperationManager::wait). Cancellation is cooperative:
//! the worker checks the flag between files, so a rename already in flight
//! always finishes, and files already renamed stay renamed.
//!
//! Every manager owns its registry; there is no process-wide state. All
//! operations of one manager share a single lock, which is fine for tens of
//! concurrent batches. Two operations touching the same directory at the same
//! time are not detected and may race on the same destination names.

use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::plan::{Batch, FileEntry, FileStatus, plan};
use crate::template::Template;
use crate::undo::{RenamePair, SessionId, UndoManager};
use derive_more::Display;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::UtcDateTime;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::instrument;
use trackwright_metadata::AnalysisMode;
use trackwright_storage::BackendHandle;
use uuid::Uuid;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);
impl OperationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    #[display("pending")]
    Pending,
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
    #[display("cancelled")]
    Cancelled,
    #[display("error")]
    Error,
}
impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }
}

/// What happened to one file when the batch ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Renamed { source: PathBuf, destination: PathBuf },
    Skipped { source: PathBuf, reason: String },
    Error { source: PathBuf, reason: String },
}
impl FileOutcome {
    pub fn source(&self) -> &Path {
        match self {
            FileOutcome::Renamed { source, .. } | FileOutcome::Skipped { source, .. } | FileOutcome::Error { source, .. } => {
                source
            },
        }
    }
}

/// A point-in-time view of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: OperationId,
    pub status: OperationStatus,
    /// Files processed so far.
    pub progress: usize,
    pub total: usize,
    pub current_file: Option<PathBuf>,
    pub created_at: UtcDateTime,
    pub started_at: Option<UtcDateTime>,
    pub finished_at: Option<UtcDateTime>,
    /// One entry per processed file, in batch order.
    pub results: Vec<FileOutcome>,
    /// Set when the batch completed with at least one rename.
    pub undo_session: Option<SessionId>,
    /// Why the operation itself failed, as opposed to a single file.
    pub error: Option<String>,
}
impl Operation {
    pub fn renamed(&self) -> usize {
        self.results.iter().filter(|r| matches!(r, FileOutcome::Renamed { .. })).count()
    }
}

struct Tracked {
    snapshot: Operation,
    cancel: Arc<AtomicBool>,
    done: watch::Sender<bool>,
}

struct Registry {
    ctx: Arc<Context>,
    undo: Arc<UndoManager>,
    operations: Mutex<HashMap<OperationId, Tracked>>,
}
impl Registry {
    fn operations(&self) -> MutexGuard<'_, HashMap<OperationId, Tracked>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to a live operation. Terminal operations are frozen.
    fn update(&self, id: OperationId, f: impl FnOnce(&mut Operation)) {
        if let Some(tracked) = self.operations().get_mut(&id)
            && !tracked.snapshot.status.is_terminal()
        {
            f(&mut tracked.snapshot);
        }
    }

    fn finish(&self, id: OperationId, status: OperationStatus, undo_session: Option<SessionId>, error: Option<String>) {
        let mut operations = self.operations();
        let Some(tracked) = operations.get_mut(&id) else {
            return;
        };
        if tracked.snapshot.status.is_terminal() {
            return;
        }
        let op = &mut tracked.snapshot;
        op.status = status;
        op.finished_at = Some(UtcDateTime::now());
        op.current_file = None;
        op.undo_session = undo_session;
        op.error = error;
        tracing::info!(
            operation = %id,
            status = %op.status,
            progress = op.progress,
            total = op.total,
            "Operation finished"
        );
        tracked.done.send_replace(true);
    }
}

/// Starts, tracks and cancels batch renames.
///
/// Cloning is cheap and clones share the same registry.
#[derive(Clone)]
pub struct OperationManager {
    registry: Arc<Registry>,
}
impl OperationManager {
    pub fn new(ctx: Arc<Context>, undo: Arc<UndoManager>) -> Self {
        Self {
            registry: Arc::new(Registry {
                ctx,
                undo,
                operations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validates the batch template and starts renaming in the background.
    ///
    /// Fails immediately on a template with unknown tokens; nothing is
    /// started in that case. Must be called from within a Tokio runtime.
    pub fn start(&self, batch: Batch) -> Result<OperationId> {
        let template: Template = batch.template.parse()?;
        let id = OperationId::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let (done, _) = watch::channel(false);
        let snapshot = Operation {
            id,
            status: OperationStatus::Pending,
            progress: 0,
            total: batch.files.len(),
            current_file: None,
            created_at: UtcDateTime::now(),
            started_at: None,
            finished_at: None,
            results: Vec::new(),
            undo_session: None,
            error: None,
        };
        self.registry.operations().insert(
            id,
            Tracked {
                snapshot,
                cancel: cancel.clone(),
                done,
            },
        );
        tracing::info!(
            operation = %id,
            backend = self.registry.ctx.backend.name(),
            files = batch.files.len(),
            template = %template,
            "Operation started"
        );

        let registry = self.registry.clone();
        tokio::spawn(async move {
            let worker = tokio::spawn(run(registry.clone(), id, batch, template, cancel));
            if let Err(e) = worker.await {
                let message = panic_message(e);
                tracing::warn!(operation = %id, error = %message, "Operation worker failed");
                registry.finish(id, OperationStatus::Error, None, Some(message));
            }
        });
        Ok(id)
    }

    /// Snapshot of an operation. Never blocks on the worker.
    pub fn status(&self, id: OperationId) -> Result<Operation> {
        match self.registry.operations().get(&id) {
            Some(tracked) => Ok(tracked.snapshot.clone()),
            None => exn::bail!(ErrorKind::OperationNotFound(id)),
        }
    }

    /// Asks a running operation to stop after the file it is on.
    ///
    /// Returns `false` for unknown or already finished operations.
    pub fn cancel(&self, id: OperationId) -> bool {
        match self.registry.operations().get(&id) {
            Some(tracked) if !tracked.snapshot.status.is_terminal() => {
                tracked.cancel.store(true, Ordering::SeqCst);
                tracing::info!(operation = %id, "Cancellation requested");
                true
            },
            _ => false,
        }
    }

    /// Waits until the operation reaches a terminal state and returns its
    /// final snapshot.
    pub async fn wait(&self, id: OperationId) -> Result<Operation> {
        let mut done = match self.registry.operations().get(&id) {
            Some(tracked) => tracked.done.subscribe(),
            None => exn::bail!(ErrorKind::OperationNotFound(id)),
        };
        // Only fails if the operation was pruned meanwhile, which `status` reports.
        let _ = done.wait_for(|finished| *finished).await;
        self.status(id)
    }

    /// Every known operation, oldest first.
    pub fn list(&self) -> Vec<Operation> {
        let mut all: Vec<Operation> = self.registry.operations().values().map(|t| t.snapshot.clone()).collect();
        all.sort_by_key(|op| op.created_at);
        all
    }

    /// Forgets finished operations. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut operations = self.registry.operations();
        let before = operations.len();
        operations.retain(|_, tracked| !tracked.snapshot.status.is_terminal());
        before - operations.len()
    }
}

#[instrument(skip_all, fields(operation = %id))]
async fn run(registry: Arc<Registry>, id: OperationId, batch: Batch, template: Template, cancel: Arc<AtomicBool>) {
    registry.update(id, |op| {
        op.status = OperationStatus::Running;
        op.started_at = Some(UtcDateTime::now());
    });

    let analysis = if batch.reverify { AnalysisMode::Always } else { AnalysisMode::WhenMissing };
    let Some(entries) = plan(&registry.ctx, &batch, &template, analysis, &cancel).await else {
        registry.finish(id, OperationStatus::Cancelled, None, None);
        return;
    };
    registry.update(id, |op| op.total = entries.len());

    let mut pairs = Vec::new();
    for entry in entries {
        if cancel.load(Ordering::SeqCst) {
            registry.finish(id, OperationStatus::Cancelled, None, None);
            return;
        }
        registry.update(id, |op| op.current_file = Some(entry.source.clone()));
        let outcome = execute(&registry.ctx.backend, entry).await;
        if let FileOutcome::Renamed { source, destination } = &outcome {
            pairs.push(RenamePair {
                original: source.clone(),
                renamed: destination.clone(),
            });
        }
        registry.update(id, |op| {
            op.progress += 1;
            op.results.push(outcome);
        });
    }

    let session = (!pairs.is_empty()).then(|| registry.undo.create(pairs));
    registry.finish(id, OperationStatus::Completed, session, None);
}

/// Applies one planned entry.
async fn execute(backend: &BackendHandle, entry: FileEntry) -> FileOutcome {
    let FileEntry {
        source,
        destination,
        status,
        reason,
        ..
    } = entry;
    let reason = reason.unwrap_or_default();
    let destination = match (status, destination) {
        (FileStatus::WillRename, Some(destination)) => destination,
        (FileStatus::WillSkip, _) => return FileOutcome::Skipped { source, reason },
        _ => return FileOutcome::Error { source, reason },
    };

    // Planning only reserved the name; something may have appeared there since.
    match backend.is_free_for(&source, &destination).await {
        Ok(true) => {},
        Ok(false) => {
            let reason = ErrorKind::DestinationOccupied(destination).to_string();
            tracing::warn!(source = %source.display(), reason = %reason, "Skipping rename");
            return FileOutcome::Error { source, reason };
        },
        Err(e) => {
            let reason = e.deref().to_string();
            return FileOutcome::Error { source, reason };
        },
    }
    match backend.rename(&source, &destination).await {
        Ok(()) => {
            tracing::debug!(source = %source.display(), destination = %destination.display(), "Renamed");
            FileOutcome::Renamed { source, destination }
        },
        Err(e) => {
            let reason = e.deref().to_string();
            tracing::warn!(source = %source.display(), reason = %reason, "Rename failed");
            FileOutcome::Error { source, reason }
        },
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "worker was cancelled".to_string();
    }
    let payload = err.into_panic();
    match payload.downcast_ref::<&str>() {
        Some(message) => format!("worker panicked: {message}"),
        None => match payload.downcast_ref::<String>() {
            Some(message) => format!("worker panicked: {message}"),
            None => "worker panicked".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{GatedBackend, Panicking, StallingTags, TagTable, context, context_with, numbered};
    use tempfile::TempDir;
    use trackwright_config::{Config, UndoConfig};
    use trackwright_metadata::models::Field;
    use trackwright_storage::backend::{LocalBackend, MockBackend, StorageBackend};

    const TEMPLATE: &str = "{artist} - {title}";

    fn manager(ctx: Arc<Context>) -> (OperationManager, Arc<UndoManager>) {
        let undo = Arc::new(UndoManager::new(ctx.backend().clone(), &UndoConfig::default()));
        (OperationManager::new(ctx, undo.clone()), undo)
    }

    #[tokio::test]
    async fn test_completed_batch_can_be_reverted_once() {
        let (backend, tags, paths) = numbered(3);
        let (operations, undo) = manager(context(backend.clone(), tags));

        let id = operations.start(Batch::new(paths.clone(), TEMPLATE)).unwrap();
        let op = operations.wait(id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!((op.progress, op.total, op.renamed()), (3, 3, 3));
        assert!(op.started_at.is_some() && op.finished_at.is_some());
        assert_eq!(op.current_file, None);
        assert_eq!(
            backend.paths().await,
            vec![
                PathBuf::from("in/Artist - Song 1.mp3"),
                PathBuf::from("in/Artist - Song 2.mp3"),
                PathBuf::from("in/Artist - Song 3.mp3"),
            ]
        );

        let session = op.undo_session.unwrap();
        let report = undo.revert(session).await.unwrap();
        assert_eq!((report.reverted, report.failed), (3, 0));
        assert_eq!(backend.paths().await, paths);

        let err = undo.revert(session).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SessionNotFoundOrExpired(_)));
    }

    #[tokio::test]
    async fn test_cancel_keeps_completed_renames() {
        let (mock, tags, paths) = numbered(5);
        let gated = Arc::new(GatedBackend::new(mock.clone(), 2));
        let (reached, release) = (gated.reached.clone(), gated.release.clone());
        let (operations, _undo) = manager(context(gated, tags));

        let id = operations.start(Batch::new(paths, TEMPLATE)).unwrap();
        reached.notified().await;
        assert_eq!(operations.status(id).unwrap().status, OperationStatus::Running);
        assert!(operations.cancel(id));
        release.notify_one();

        let op = operations.wait(id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Cancelled);
        assert_eq!(op.progress, 2);
        assert_eq!(op.results.len(), 2);
        assert_eq!(op.undo_session, None);
        assert_eq!(
            mock.paths().await,
            vec![
                PathBuf::from("in/3.mp3"),
                PathBuf::from("in/4.mp3"),
                PathBuf::from("in/5.mp3"),
                PathBuf::from("in/Artist - Song 1.mp3"),
                PathBuf::from("in/Artist - Song 2.mp3"),
            ]
        );
        assert!(!operations.cancel(id), "finished operations cannot be cancelled");
    }

    #[tokio::test]
    async fn test_destination_taken_after_planning_is_not_overwritten() {
        let (mock, tags, paths) = numbered(2);
        let gated = Arc::new(GatedBackend::new(mock.clone(), 1));
        let (reached, release) = (gated.reached.clone(), gated.release.clone());
        let (operations, undo) = manager(context(gated, tags));

        let id = operations.start(Batch::new(paths, TEMPLATE)).unwrap();
        reached.notified().await;
        mock.write(Path::new("in/Artist - Song 2.mp3"), b"someone else").await.unwrap();
        release.notify_one();

        let op = operations.wait(id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        match &op.results[1] {
            FileOutcome::Error { source, reason } => {
                assert_eq!(source, Path::new("in/2.mp3"));
                assert!(reason.contains("appeared after planning"), "{reason}");
            },
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(mock.exists(Path::new("in/2.mp3")).await.unwrap());
        let session = undo.get(op.undo_session.unwrap()).unwrap();
        assert_eq!(session.pairs.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_error_status() {
        let (backend, _tags, paths) = numbered(2);
        let (operations, _undo) = manager(context(backend.clone(), Panicking));
        let id = operations.start(Batch::new(paths.clone(), TEMPLATE)).unwrap();
        let op = operations.wait(id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Error);
        assert!(op.error.unwrap().contains("tag reader exploded"));
        assert_eq!(backend.paths().await, paths);
    }

    #[tokio::test]
    async fn test_nothing_to_rename_creates_no_undo_session() {
        let backend = Arc::new(MockBackend::with_files([("A - B.mp3", ""), ("untagged.mp3", "")]));
        let tags = TagTable::default().with("A - B.mp3", &[(Field::Artist, "A"), (Field::Title, "B")]);
        let (operations, _undo) = manager(context(backend, tags));
        let id = operations.start(Batch::new(["A - B.mp3", "untagged.mp3"], TEMPLATE)).unwrap();
        let op = operations.wait(id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert!(matches!(op.results[0], FileOutcome::Skipped { .. }));
        assert!(matches!(op.results[1], FileOutcome::Error { .. }));
        assert_eq!(op.undo_session, None);
    }

    #[tokio::test]
    async fn test_invalid_template_is_rejected_up_front() {
        let (backend, tags, paths) = numbered(1);
        let (operations, _undo) = manager(context(backend, tags));
        let err = operations.start(Batch::new(paths, "{artist} - {nope}")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownTokens(_)));
        assert!(operations.list().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let (backend, tags, _paths) = numbered(1);
        let (operations, _undo) = manager(context(backend, tags));
        let id = OperationId::new();
        assert!(matches!(&*operations.status(id).unwrap_err(), ErrorKind::OperationNotFound(_)));
        assert!(matches!(&*operations.wait(id).await.unwrap_err(), ErrorKind::OperationNotFound(_)));
        assert!(!operations.cancel(id));
    }

    #[tokio::test]
    async fn test_list_and_prune() {
        let (backend, tags, paths) = numbered(2);
        let (operations, _undo) = manager(context(backend, tags));
        let first = operations.start(Batch::new(paths[..1].to_vec(), TEMPLATE)).unwrap();
        operations.wait(first).await.unwrap();
        let second = operations.start(Batch::new(paths[1..].to_vec(), TEMPLATE)).unwrap();
        operations.wait(second).await.unwrap();

        let ids: Vec<OperationId> = operations.list().iter().map(|op| op.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first) && ids.contains(&second));
        assert_eq!(operations.prune(), 2);
        assert!(operations.list().is_empty());
    }

    #[tokio::test]
    async fn test_managers_do_not_share_operations() {
        let (backend, tags, paths) = numbered(1);
        let ctx = context(backend, tags);
        let (first, _) = manager(ctx.clone());
        let (second, _) = manager(ctx);
        let id = first.start(Batch::new(paths, TEMPLATE)).unwrap();
        first.wait(id).await.unwrap();
        assert!(second.status(id).is_err());
    }

    #[tokio::test]
    async fn test_local_filesystem_round_trip() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(LocalBackend::new("local", dir.path()).unwrap());
        backend.write(Path::new("rips/track01.flac"), b"fLaC").await.unwrap();
        backend.write(Path::new("rips/track02.flac"), b"fLaC").await.unwrap();
        let tags = TagTable::default()
            .with("rips/track01.flac", &[(Field::Track, "1/2"), (Field::Artist, "Daft Punk"), (Field::Title, "One More Time")])
            .with("rips/track02.flac", &[(Field::Track, "2/2"), (Field::Artist, "Daft Punk"), (Field::Title, "Aerodynamic")]);
        let (operations, undo) = manager(context(backend, tags));

        let id = operations.start(Batch::new(["rips/track01.flac", "rips/track02.flac"], "{track} - {title}")).unwrap();
        let op = operations.wait(id).await.unwrap();
        assert_eq!(op.renamed(), 2);
        assert!(dir.path().join("rips/01 - One More Time.flac").is_file());
        assert!(dir.path().join("rips/02 - Aerodynamic.flac").is_file());

        undo.revert(op.undo_session.unwrap()).await.unwrap();
        assert!(dir.path().join("rips/track01.flac").is_file());
        assert!(dir.path().join("rips/track02.flac").is_file());
        assert!(!dir.path().join("rips/01 - One More Time.flac").exists());
    }

    #[tokio::test]
    async fn test_cancel_during_metadata_resolution() {
        let (mock, _, paths) = numbered(40);
        let tags = Arc::new(StallingTags::new());
        let (reached, release) = (tags.reached.clone(), tags.release.clone());
        let (operations, _undo) = manager(context_with(mock.clone(), tags.clone()));

        let id = operations.start(Batch::new(paths.clone(), TEMPLATE)).unwrap();
        reached.notified().await;
        assert!(operations.cancel(id));
        release.notify_one();

        let op = operations.wait(id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Cancelled);
        assert_eq!(op.progress, 0);
        assert!(op.results.is_empty());
        assert_eq!(op.undo_session, None);
        // Only the files already in flight when the flag was raised were read.
        assert!(tags.calls() <= Config::default().resolver.resolve_concurrency);
        let mut untouched = paths;
        untouched.sort();
        assert_eq!(mock.paths().await, untouched);
    }

    #[tokio::test]
    async fn test_case_variant_sibling_survives_on_disk() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a - b.mp3"), b"SOURCE").unwrap();
        std::fs::write(dir.path().join("A - B.mp3"), b"OTHER FILE").unwrap();
        if std::fs::read_dir(dir.path()).unwrap().count() < 2 {
            // Case-insensitive filesystem: both names are one file.
            return;
        }
        let backend = Arc::new(LocalBackend::new("local", dir.path()).unwrap());
        let tags = TagTable::default().with("a - b.mp3", &[(Field::Artist, "A"), (Field::Title, "B")]);
        let (operations, _undo) = manager(context(backend, tags));

        let id = operations.start(Batch::new(["a - b.mp3"], TEMPLATE)).unwrap();
        let op = operations.wait(id).await.unwrap();
        assert_eq!(
            op.results,
            vec![FileOutcome::Renamed {
                source: PathBuf::from("a - b.mp3"),
                destination: PathBuf::from("A - B (2).mp3"),
            }]
        );
        assert_eq!(std::fs::read(dir.path().join("A - B.mp3")).unwrap(), b"OTHER FILE");
        assert_eq!(std::fs::read(dir.path().join("A - B (2).mp3")).unwrap(), b"SOURCE");
    }
}
