mod key;
mod record;
mod tempo;
mod track;

pub use self::key::{Camelot, Mode, MusicalKey};
pub use self::record::{Conflict, FieldValue, MetadataRecord, PartialRecord};
pub use self::tempo::{format_bpm, parse_bpm};
pub use self::track::{MAX_TRACK_NUMBER, track_number};

use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// A metadata field a source can supply and a template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Artist,
    Title,
    Album,
    Track,
    Year,
    Label,
    Catalog,
    Genre,
    Bpm,
    Key,
    Camelot,
    Mix,
}
impl Field {
    pub const ALL: [Field; 12] = [
        Field::Artist,
        Field::Title,
        Field::Album,
        Field::Track,
        Field::Year,
        Field::Label,
        Field::Catalog,
        Field::Genre,
        Field::Bpm,
        Field::Key,
        Field::Camelot,
        Field::Mix,
    ];

    /// The template token naming this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Artist => "artist",
            Field::Title => "title",
            Field::Album => "album",
            Field::Track => "track",
            Field::Year => "year",
            Field::Label => "label",
            Field::Catalog => "catalog",
            Field::Genre => "genre",
            Field::Bpm => "bpm",
            Field::Key => "key",
            Field::Camelot => "camelot",
            Field::Mix => "mix",
        }
    }
}
impl FromStr for Field {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Field::ALL.iter().find(|f| f.as_str() == s.trim()) {
            Some(field) => Ok(*field),
            None => exn::bail!(ErrorKind::ParseError {
                field: "field",
                value: s.to_string()
            }),
        }
    }
}
impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Display tokens composed from other fields while a record is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Derived {
    /// Camelot code (or key when there is none) followed by tempo: `8A 128`.
    KeyBpm,
    /// The mix name wrapped in parentheses: `(Extended Mix)`.
    MixParen,
}
impl Derived {
    pub const ALL: [Derived; 2] = [Derived::KeyBpm, Derived::MixParen];

    pub fn as_str(&self) -> &'static str {
        match self {
            Derived::KeyBpm => "key_bpm",
            Derived::MixParen => "mix_paren",
        }
    }
}
impl FromStr for Derived {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Derived::ALL.iter().find(|d| d.as_str() == s.trim()) {
            Some(derived) => Ok(*derived),
            None => exn::bail!(ErrorKind::ParseError {
                field: "derived",
                value: s.to_string()
            }),
        }
    }
}
impl Display for Derived {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Where a field value came from. Declaration order is merge priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Provenance {
    /// Embedded tags read from the file itself.
    Tag,
    /// An online metadata lookup.
    Lookup,
    /// Audio analysis (tempo, key detection).
    Analysis,
}
impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Tag => "tag",
            Provenance::Lookup => "lookup",
            Provenance::Analysis => "analysis",
        }
    }
}
impl Display for Provenance {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
