//! Batch renaming of audio files from metadata.
//!
//! The flow for one batch:
//!
//! 1. metadata for every file is resolved from its sources
//!    ([`MetadataResolver`]);
//! 2. optionally, [`Context::resolve_context`] classifies the files into
//!    albums and singles and suggests templates;
//! 3. the template is expanded per file ([`TemplateEngine`]) and every
//!    expansion gets a unique destination ([`ReservationLedger`]);
//! 4. [`Context::preview`] stops there, while [`OperationManager::start`]
//!    goes on to rename in the background;
//! 5. a completed batch can be reverted for a short while
//!    ([`UndoManager::revert`]).

mod classifier;
pub mod error;
mod ledger;
mod operation;
mod plan;
mod template;
mod undo;

pub use crate::classifier::{Classification, ContextAnalysis, ContextClassifier, Suggestion, default_suggestion};
pub use crate::ledger::ReservationLedger;
pub use crate::operation::{FileOutcome, Operation, OperationId, OperationManager, OperationStatus};
pub use crate::plan::{Batch, FileEntry, FileStatus};
pub use crate::template::{Template, TemplateEngine, Token, sanitize};
pub use crate::undo::{RenamePair, RevertFailure, RevertReport, SessionId, UndoManager, UndoSession};

use crate::error::Result;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::instrument;
use trackwright_config::Config;
use trackwright_metadata::{AnalysisMode, MetadataResolver, ResolveOptions};
use trackwright_storage::{BackendHandle, validate_path};

/// Everything a batch needs: where the files live, how to resolve their
/// metadata and how to name them.
pub struct Context {
    pub(crate) backend: BackendHandle,
    pub(crate) resolver: Arc<MetadataResolver>,
    pub(crate) templates: TemplateEngine,
    pub(crate) classifier: ContextClassifier,
    pub(crate) max_disambiguator: u32,
    default_template: String,
}
impl Context {
    pub fn new(config: &Config, backend: BackendHandle, resolver: impl Into<Arc<MetadataResolver>>) -> Self {
        Self {
            backend,
            resolver: resolver.into(),
            templates: TemplateEngine::new(&config.template),
            classifier: ContextClassifier::new(&config.classifier),
            max_disambiguator: config.ledger.max_disambiguator,
            default_template: config.template.default_template.clone(),
        }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// The configured template, for callers with no better suggestion.
    pub fn default_template(&self) -> &str {
        &self.default_template
    }

    /// Resolves metadata for `files` and classifies them into album groups.
    ///
    /// Files whose metadata cannot be resolved are left out of the analysis.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn resolve_context(&self, files: &[PathBuf]) -> Vec<ContextAnalysis> {
        let valid: Vec<PathBuf> = files.iter().filter_map(|f| validate_path(f).ok()).collect();
        let records: Vec<_> = self
            .resolver
            .resolve_all(&valid, ResolveOptions::default())
            .await
            .into_iter()
            .zip(&valid)
            .filter_map(|(record, path)| match record {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(source = %path.display(), error = %e.deref(), "Left out of context analysis");
                    None
                },
            })
            .collect();
        self.classifier.classify(&records)
    }

    /// Works out what [`OperationManager::start`] would do with `batch`,
    /// without renaming anything.
    ///
    /// Never forces audio analysis, even for a re-verifying batch, so two
    /// previews of an unchanged directory give the same answer.
    pub async fn preview(&self, batch: &Batch) -> Result<Vec<FileEntry>> {
        let template: Template = batch.template.parse()?;
        let never = AtomicBool::new(false);
        let entries = plan::plan(self, batch, &template, AnalysisMode::WhenMissing, &never).await;
        Ok(entries.unwrap_or_default())
    }
}

#[cfg(test)]
mod testing;
