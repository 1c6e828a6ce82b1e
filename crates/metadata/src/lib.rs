//! Audio metadata model and multi-source merge policy.
//!
//! A file's metadata comes from up to three kinds of [`MetadataProvider`]:
//! embedded tags, an online lookup and audio analysis. The
//! [`MetadataResolver`] queries them and merges their answers field by field
//! into one immutable [`MetadataRecord`](models::MetadataRecord):
//!
//! 1. a valid embedded tag wins;
//! 2. otherwise a lookup value, if the lookup's confidence clears the
//!    configured threshold;
//! 3. otherwise an analysis value;
//! 4. otherwise the field stays empty.
//!
//! Invalid values (tempo out of range, unparseable key) are treated as
//! absent, so they fall through to the next source.

pub mod error;
pub mod models;
mod provider;
mod resolver;

pub use crate::provider::{MetadataProvider, ProviderHandle};
pub use crate::resolver::{AnalysisMode, MergePolicy, MetadataResolver, ResolveOptions, SourceReport, merge};
