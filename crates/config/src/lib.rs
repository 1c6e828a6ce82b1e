//! Configuration for the trackwright rename engine.
//!
//! Configuration is layered with [figment]: built-in defaults first, then an
//! optional config file (format picked by extension), then environment
//! variables prefixed with `TRACKWRIGHT_`, using `__` to separate sections
//! (`TRACKWRIGHT_UNDO__TTL_SECS=60`).
//!
//! Every section is `#[serde(default)]`, so a config file only needs the
//! values it wants to change.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "TRACKWRIGHT_";

/// Undo sessions are held in memory; anything longer is a configuration mistake.
const MAX_UNDO_TTL_SECS: u64 = 24 * 60 * 60;

/// Room kept free in a filename for `" (999)"` and a dotted extension.
const MIN_FILENAME_BYTES: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub template: TemplateConfig,
    pub ledger: LedgerConfig,
    pub classifier: ClassifierConfig,
    pub undo: UndoConfig,
}

/// Multi-source metadata merge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// An online lookup value is only used when its confidence is strictly
    /// greater than this.
    pub lookup_confidence_threshold: f32,
    /// Lowest plausible tempo; anything below is treated as absent.
    pub bpm_min: f32,
    /// Highest plausible tempo; anything above is treated as absent.
    pub bpm_max: f32,
    /// Number of files resolved in parallel.
    pub resolve_concurrency: usize,
}
impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lookup_confidence_threshold: 0.8,
            bpm_min: 40.0,
            bpm_max: 250.0,
            resolve_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Minimum digits `{track}` renders with, zero-padded.
    pub track_padding: usize,
    /// Byte budget for a whole filename, extension and disambiguator included.
    pub max_filename_bytes: usize,
    /// Template used when the caller has no preference.
    pub default_template: String,
}
impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            track_padding: 2,
            max_filename_bytes: 255,
            default_template: "{artist} - {title}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Highest `" (n)"` suffix tried before a collision is declared unresolvable.
    pub max_disambiguator: u32,
}
impl Default for LedgerConfig {
    fn default() -> Self {
        Self { max_disambiguator: 999 }
    }
}

/// Album/singles heuristics. These are a starting point observed to work on
/// real collections, not derived from any model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Groups smaller than this are always singles.
    pub min_album_files: usize,
    /// Fraction of files allowed to lack a track number before a group is
    /// considered incomplete.
    pub max_missing_ratio: f32,
}
impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_album_files: 3,
            max_missing_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// How long a completed batch can be reverted for.
    pub ttl_secs: u64,
}
impl Default for UndoConfig {
    fn default() -> Self {
        Self { ttl_secs: 30 }
    }
}
impl UndoConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Config {
    /// Loads configuration from defaults, the optional `file`, and the
    /// environment, then validates it.
    ///
    /// A missing file is not an error; an unreadable or malformed one is.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "Merging configuration file");
            figment = match file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
                Some("toml") => figment.merge(Toml::file(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
            };
        }
        let config: Config =
            figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from the platform default location (see [`default_path`](Self::default_path)).
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path().as_deref())
    }

    /// `config.toml` inside the platform's configuration directory, if the
    /// platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "trackwright").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.resolver;
        if !(0.0..=1.0).contains(&r.lookup_confidence_threshold) {
            exn::bail!(ErrorKind::Invalid("resolver.lookup_confidence_threshold must be within [0, 1]"));
        }
        if !(r.bpm_min > 0.0 && r.bpm_min < r.bpm_max) {
            exn::bail!(ErrorKind::Invalid("resolver.bpm_min must be positive and below resolver.bpm_max"));
        }
        if r.resolve_concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("resolver.resolve_concurrency must be at least 1"));
        }
        if self.template.max_filename_bytes < MIN_FILENAME_BYTES {
            exn::bail!(ErrorKind::Invalid("template.max_filename_bytes is too small to hold a filename"));
        }
        if self.ledger.max_disambiguator < 2 {
            exn::bail!(ErrorKind::Invalid("ledger.max_disambiguator must be at least 2"));
        }
        if self.classifier.min_album_files == 0 {
            exn::bail!(ErrorKind::Invalid("classifier.min_album_files must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.classifier.max_missing_ratio) {
            exn::bail!(ErrorKind::Invalid("classifier.max_missing_ratio must be within [0, 1]"));
        }
        if self.undo.ttl_secs > MAX_UNDO_TTL_SECS {
            exn::bail!(ErrorKind::Invalid("undo.ttl_secs must be at most one day"));
        }
        Ok(())
    }
}
