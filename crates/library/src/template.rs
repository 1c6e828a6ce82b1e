//! Filename templating for audio files.
//!
//! A template is plain text with `{token}` placeholders. Tokens are the
//! metadata field names (`artist`, `title`, `album`, `track`, `year`,
//! `label`, `catalog`, `genre`, `bpm`, `key`, `camelot`, `mix`) plus the
//! display tokens derived while metadata is merged:
//!
//! | Token       | Example          |
//! |-------------|------------------|
//! | `key_bpm`   | `8A 128`         |
//! | `mix_paren` | `(Extended Mix)` |
//!
//! Templates are parsed eagerly, so an unknown token is reported before any
//! file is touched. Expansion only produces a filename *stem*; the source
//! file's extension is kept as is.
//!
//! # Example
//!
//! ```
//! use trackwright_config::TemplateConfig;
//! use trackwright_library::{Template, TemplateEngine};
//! use trackwright_metadata::models::{Field, MetadataRecord};
//!
//! let template: Template = "{track} - {artist} - {title}".parse().unwrap();
//! let record = MetadataRecord::from_tags([
//!     (Field::Track, "3"),
//!     (Field::Artist, "Daft Punk"),
//!     (Field::Title, "Get Lucky"),
//! ]);
//! let engine = TemplateEngine::new(&TemplateConfig::default());
//! assert_eq!(engine.expand(&template, &record).unwrap(), "03 - Daft Punk - Get Lucky");
//! ```

use crate::error::{Error, ErrorKind, Result};
use regex::Regex;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::instrument;
use trackwright_config::TemplateConfig;
use trackwright_metadata::models::{Derived, Field, MetadataRecord, track_number};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").unwrap());
static EMPTY_BRACKETS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\s*\)|\[\s*\]").unwrap());
// " - - " left behind by an empty token between two separators.
static REPEATED_DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-(\s+-)+").unwrap());

/// Characters rejected by at least one common filesystem.
const ILLEGAL: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const EDGE_SEPARATORS: [char; 4] = [' ', '-', '_', '.'];
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9", "LPT1", "LPT2",
    "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Field(Field),
    Derived(Derived),
}
impl FromStr for Token {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Ok(field) = s.parse::<Field>() {
            return Ok(Token::Field(field));
        }
        match s.parse::<Derived>() {
            Ok(derived) => Ok(Token::Derived(derived)),
            Err(_) => exn::bail!(ErrorKind::UnknownTokens(vec![s.to_string()])),
        }
    }
}
impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Token::Field(field) => write!(f, "{{{field}}}"),
            Token::Derived(derived) => write!(f, "{{{derived}}}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// A parsed filename template.
///
/// Constructed via [`FromStr`], which validates every token up front. All
/// unknown tokens are reported together so the caller can fix them in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}
impl FromStr for Template {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut unknown: Vec<String> = Vec::new();
        let mut last = 0;
        for captures in TOKEN.captures_iter(s) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &s[last..whole.start()])?;
            match name.as_str().trim().parse::<Token>() {
                Ok(token) => segments.push(Segment::Token(token)),
                Err(_) if !unknown.iter().any(|u| u == name.as_str()) => unknown.push(name.as_str().to_string()),
                Err(_) => {},
            }
            last = whole.end();
        }
        push_literal(&mut segments, &s[last..])?;
        if !unknown.is_empty() {
            exn::bail!(ErrorKind::UnknownTokens(unknown));
        }
        Ok(Self {
            source: s.to_string(),
            segments,
        })
    }
}
impl Display for Template {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.source)
    }
}
impl Template {
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Token(token) => Some(*token),
            Segment::Literal(_) => None,
        })
    }
}

/// Literal text between tokens must not contain a stray brace.
fn push_literal(segments: &mut Vec<Segment>, literal: &str) -> Result<()> {
    if literal.contains(['{', '}']) {
        exn::bail!(ErrorKind::UnclosedToken(literal.to_string()));
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal.to_string()));
    }
    Ok(())
}

/// Expands templates against metadata records and assembles final filenames.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    track_padding: usize,
    max_filename_bytes: usize,
}
impl TemplateEngine {
    pub fn new(config: &TemplateConfig) -> Self {
        Self {
            track_padding: config.track_padding,
            max_filename_bytes: config.max_filename_bytes,
        }
    }

    /// Renders `template` for `record` and sanitizes the result into a stem.
    ///
    /// Missing fields expand to nothing. Fails with
    /// [`ErrorKind::EmptyExpansion`] when nothing usable is left.
    #[instrument(level = "trace", skip_all, fields(template = %template))]
    pub fn expand(&self, template: &Template, record: &MetadataRecord) -> Result<String> {
        let mut rendered = String::new();
        for segment in &template.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Token(Token::Field(Field::Track)) => {
                    if let Some(raw) = record.get(Field::Track) {
                        match track_number(raw) {
                            Some(n) => rendered.push_str(&format!("{n:0width$}", width = self.track_padding)),
                            None => rendered.push_str(raw),
                        }
                    }
                },
                Segment::Token(Token::Field(field)) => rendered.push_str(record.get(*field).unwrap_or_default()),
                Segment::Token(Token::Derived(derived)) => rendered.push_str(record.derived(*derived).unwrap_or_default()),
            }
        }
        let stem = sanitize(&rendered);
        if stem.is_empty() {
            exn::bail!(ErrorKind::EmptyExpansion);
        }
        Ok(stem)
    }

    /// Joins a stem, an optional `" (n)"` disambiguator and an extension,
    /// truncating the stem (on a character boundary) so the whole name fits
    /// the configured byte budget.
    ///
    /// ```text
    /// file_name("A - B", None, Some("mp3"))    → "A - B.mp3"
    /// file_name("A - B", Some(2), Some("mp3")) → "A - B (2).mp3"
    /// ```
    pub fn file_name(&self, stem: &str, disambiguator: Option<u32>, extension: Option<&str>) -> String {
        let suffix = disambiguator.map(|n| format!(" ({n})")).unwrap_or_default();
        let extension = extension
            .map(|ext| ext.trim().trim_matches('.'))
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let budget = self.max_filename_bytes.saturating_sub(suffix.len() + extension.len());
        let mut stem = truncate_to_char_boundary(stem, budget).trim_end_matches(EDGE_SEPARATORS);
        if stem.is_empty() {
            stem = "_";
        }
        format!("{stem}{suffix}{extension}")
    }
}

/// Makes rendered text safe to use as a filename on any common filesystem.
pub fn sanitize(raw: &str) -> String {
    let replaced: String = raw.chars().map(|c| if c.is_control() || ILLEGAL.contains(&c) { '_' } else { c }).collect();
    let collapsed = collapse_whitespace(&replaced);
    let unbracketed = EMPTY_BRACKETS.replace_all(&collapsed, "");
    let dashed = REPEATED_DASHES.replace_all(&unbracketed, "-");
    let mut stem = collapse_whitespace(&dashed).trim_matches(EDGE_SEPARATORS).to_string();

    // Windows reserves device names even with an extension ("NUL.txt").
    let device = stem.split('.').next().unwrap_or_default().len();
    if RESERVED_NAMES.iter().any(|name| name.eq_ignore_ascii_case(&stem[..device])) {
        stem.insert(device, '_');
    }
    stem
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates a string to a maximum byte length at a character boundary.
///
/// This prevents cutting UTF-8 characters in the middle, which would produce
/// invalid strings.
fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    &s[..s.floor_char_boundary(max_bytes)]
}
