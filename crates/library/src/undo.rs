//! Time-boxed, single-use reversal of completed batches.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::{Duration, UtcDateTime};
use tracing::instrument;
use trackwright_config::UndoConfig;
use trackwright_storage::BackendHandle;
use uuid::Uuid;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);
impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// One applied rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePair {
    pub original: PathBuf,
    pub renamed: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoSession {
    pub id: SessionId,
    /// In the order the renames were applied.
    pub pairs: Vec<RenamePair>,
    pub created_at: UtcDateTime,
    pub expires_at: UtcDateTime,
}
impl UndoSession {
    pub fn is_expired_at(&self, now: UtcDateTime) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertFailure {
    pub pair: RenamePair,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertReport {
    pub reverted: usize,
    pub failed: usize,
    pub errors: Vec<RevertFailure>,
}

/// Holds undo sessions for completed batches until they are used or expire.
///
/// Each manager owns its sessions; separate managers never see each other's.
pub struct UndoManager {
    backend: BackendHandle,
    ttl: Duration,
    sessions: Mutex<HashMap<SessionId, UndoSession>>,
}
impl UndoManager {
    pub fn new(backend: BackendHandle, config: &UndoConfig) -> Self {
        Self {
            backend,
            ttl: Duration::try_from(config.ttl()).unwrap_or(Duration::DAY),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Records the renames of a completed batch.
    pub fn create(&self, pairs: Vec<RenamePair>) -> SessionId {
        let created_at = UtcDateTime::now();
        let session = UndoSession {
            id: SessionId::new(),
            pairs,
            created_at,
            expires_at: created_at + self.ttl,
        };
        let id = session.id;
        tracing::info!(session = %id, files = session.pairs.len(), "Undo session created");
        self.sessions().insert(id, session);
        id
    }

    /// The session, if it exists and has not expired.
    pub fn get(&self, id: SessionId) -> Option<UndoSession> {
        let now = UtcDateTime::now();
        self.sessions().get(&id).filter(|s| !s.is_expired_at(now)).cloned()
    }

    /// Moves every renamed file back to its original path, last rename first.
    ///
    /// A pair that cannot be restored (file gone, original path taken since,
    /// permission denied) is reported and skipped; the rest still run. The
    /// session is consumed whatever the outcome. Expired sessions are swept
    /// here.
    #[instrument(skip(self), fields(session = %id))]
    pub async fn revert(&self, id: SessionId) -> Result<RevertReport> {
        let session = {
            let mut sessions = self.sessions();
            let now = UtcDateTime::now();
            let before = sessions.len();
            sessions.retain(|_, session| !session.is_expired_at(now));
            if sessions.len() < before {
                tracing::debug!(swept = before - sessions.len(), "Dropped expired undo sessions");
            }
            sessions.remove(&id)
        };
        let Some(session) = session else {
            exn::bail!(ErrorKind::SessionNotFoundOrExpired(id));
        };

        let mut report = RevertReport::default();
        for pair in session.pairs.iter().rev() {
            match self.restore(pair).await {
                Ok(()) => report.reverted += 1,
                Err(reason) => {
                    tracing::warn!(
                        original = %pair.original.display(),
                        renamed = %pair.renamed.display(),
                        reason = %reason,
                        "Could not revert rename"
                    );
                    report.failed += 1;
                    report.errors.push(RevertFailure {
                        pair: pair.clone(),
                        reason,
                    });
                },
            }
        }
        tracing::info!(reverted = report.reverted, failed = report.failed, "Undo session reverted");
        Ok(report)
    }

    async fn restore(&self, pair: &RenamePair) -> std::result::Result<(), String> {
        match self.backend.exists(&pair.renamed).await {
            Ok(true) => {},
            Ok(false) => return Err(format!("{} no longer exists", pair.renamed.display())),
            Err(e) => return Err(e.deref().to_string()),
        }
        match self.backend.is_free_for(&pair.renamed, &pair.original).await {
            Ok(true) => {},
            Ok(false) => return Err(format!("{} has been taken since the rename", pair.original.display())),
            Err(e) => return Err(e.deref().to_string()),
        }
        self.backend.rename(&pair.renamed, &pair.original).await.map_err(|e| e.deref().to_string())
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, UndoSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
