//! Storage backends for the rename engine.
//!
//! Every path handed to a [`StorageBackend`] is relative to the backend root
//! and validated with [`validate_path`] before it touches anything.

pub mod backend;
pub mod error;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::path::{comparison_key, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
