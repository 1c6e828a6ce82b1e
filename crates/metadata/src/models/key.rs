use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use crate::error::{Error, ErrorKind};

const MAJOR_NAMES: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B"];
const MINOR_NAMES: [&str; 12] = ["Cm", "C#m", "Dm", "Ebm", "Em", "Fm", "F#m", "Gm", "G#m", "Am", "Bbm", "Bm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Major,
    Minor,
}

/// A musical key: tonic pitch class (0 = C … 11 = B) and mode.
///
/// Parses both standard notation and Camelot notation:
///
/// ```
/// use trackwright_metadata::models::MusicalKey;
/// let key: MusicalKey = "A minor".parse().unwrap();
/// assert_eq!(key.to_string(), "Am");
/// assert_eq!(key.camelot().to_string(), "8A");
/// assert_eq!("8A".parse::<MusicalKey>().unwrap(), key);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MusicalKey {
    pitch: u8,
    mode: Mode,
}
impl MusicalKey {
    pub fn new(pitch: u8, mode: Mode) -> Self {
        Self { pitch: pitch % 12, mode }
    }

    pub fn pitch(&self) -> u8 {
        self.pitch
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Position on the Camelot wheel.
    ///
    /// Stepping a fifth up moves one position clockwise; 7 is its own inverse
    /// modulo 12, which is what makes [`Camelot::key`] the exact reverse.
    pub fn camelot(&self) -> Camelot {
        // Minor keys share a number with their relative major, three semitones up.
        let major_pitch = match self.mode {
            Mode::Major => self.pitch,
            Mode::Minor => (self.pitch + 3) % 12,
        };
        let number = ((major_pitch * 7) % 12 + 7) % 12 + 1;
        Camelot { number, mode: self.mode }
    }

    fn parse_standard(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let pitch: u8 = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let rest = chars.as_str();
        let (pitch, rest) = match rest.chars().next() {
            Some('#' | '♯') => ((pitch + 1) % 12, &rest[rest.chars().next()?.len_utf8()..]),
            Some('b' | '♭') => ((pitch + 11) % 12, &rest[rest.chars().next()?.len_utf8()..]),
            _ => (pitch, rest),
        };
        let mode = match rest.trim().to_lowercase().as_str() {
            "" | "maj" | "major" => Mode::Major,
            "m" | "min" | "minor" => Mode::Minor,
            _ => return None,
        };
        Some(Self::new(pitch, mode))
    }
}
impl FromStr for MusicalKey {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(camelot) = trimmed.parse::<Camelot>() {
            return Ok(camelot.key());
        }
        match Self::parse_standard(trimmed) {
            Some(key) => Ok(key),
            None => exn::bail!(ErrorKind::ParseError {
                field: "key",
                value: s.to_string()
            }),
        }
    }
}
impl Display for MusicalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let names = match self.mode {
            Mode::Major => &MAJOR_NAMES,
            Mode::Minor => &MINOR_NAMES,
        };
        f.write_str(names[usize::from(self.pitch)])
    }
}

/// Camelot wheel position, `1A`–`12A` (minor) and `1B`–`12B` (major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Camelot {
    number: u8,
    mode: Mode,
}
impl Camelot {
    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn key(&self) -> MusicalKey {
        let major_pitch = ((self.number + 12 - 8) % 12 * 7) % 12;
        match self.mode {
            Mode::Major => MusicalKey::new(major_pitch, Mode::Major),
            Mode::Minor => MusicalKey::new(major_pitch + 9, Mode::Minor),
        }
    }
}
impl FromStr for Camelot {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = trimmed.char_indices().last().and_then(|(idx, letter)| {
            let mode = match letter.to_ascii_uppercase() {
                'A' => Mode::Minor,
                'B' => Mode::Major,
                _ => return None,
            };
            let number = trimmed[..idx].parse::<u8>().ok().filter(|n| (1..=12).contains(n))?;
            Some(Camelot { number, mode })
        });
        match parsed {
            Some(camelot) => Ok(camelot),
            None => exn::bail!(ErrorKind::ParseError {
                field: "camelot",
                value: s.to_string()
            }),
        }
    }
}
impl Display for Camelot {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let letter = match self.mode {
            Mode::Minor => 'A',
            Mode::Major => 'B',
        };
        write!(f, "{}{letter}", self.number)
    }
}
