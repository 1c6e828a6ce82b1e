//! Album / singles detection.
//!
//! Files are grouped by their album field and each group is classified from
//! how complete its track numbering is. The result drives which filename
//! templates are suggested. Everything here is a pure function of the
//! records passed in.

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::RangeInclusive;
use trackwright_config::ClassifierConfig;
use trackwright_metadata::models::{Field, MetadataRecord, track_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Track numbers run 1..=n without gaps.
    Album,
    /// Mostly numbered, but with gaps or duplicates.
    PartialAlbum,
    /// Too many files without a track number to tell.
    IncompleteAlbum,
    Singles,
}
impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Album => "ALBUM",
            Classification::PartialAlbum => "PARTIAL_ALBUM",
            Classification::IncompleteAlbum => "INCOMPLETE_ALBUM",
            Classification::Singles => "SINGLES",
        }
    }
}
impl Display for Classification {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub template: String,
    pub reason: String,
}
impl Suggestion {
    fn new(template: &str, reason: impl Into<String>) -> Self {
        Self {
            template: template.to_string(),
            reason: reason.into(),
        }
    }
}

/// Classification of one album group.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextAnalysis {
    /// `None` for the group of files without an album.
    pub album: Option<String>,
    pub classification: Classification,
    pub confidence: f32,
    pub file_count: usize,
    /// Lowest and highest track number seen, if any file had one.
    pub track_range: Option<RangeInclusive<u32>>,
    pub warnings: Vec<String>,
    /// Best first; never empty.
    pub suggestions: Vec<Suggestion>,
}

pub struct ContextClassifier {
    min_album_files: usize,
    max_missing_ratio: f32,
}
impl ContextClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            min_album_files: config.min_album_files,
            max_missing_ratio: config.max_missing_ratio,
        }
    }

    /// Groups `records` by album (in order of first appearance) and
    /// classifies every group.
    pub fn classify(&self, records: &[MetadataRecord]) -> Vec<ContextAnalysis> {
        let mut index: HashMap<Option<&str>, usize> = HashMap::new();
        let mut groups: Vec<(Option<&str>, Vec<&MetadataRecord>)> = Vec::new();
        for record in records {
            let album = record.get(Field::Album);
            let slot = *index.entry(album).or_insert_with(|| {
                groups.push((album, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(record);
        }
        groups.into_iter().map(|(album, members)| self.classify_group(album, &members)).collect()
    }

    fn classify_group(&self, album: Option<&str>, members: &[&MetadataRecord]) -> ContextAnalysis {
        let file_count = members.len();
        let mut numbers: Vec<u32> = members.iter().filter_map(|r| r.get(Field::Track).and_then(track_number)).collect();
        numbers.sort_unstable();
        let track_range = numbers.first().zip(numbers.last()).map(|(first, last)| *first..=*last);

        let Some(album) = album.filter(|_| file_count >= self.min_album_files) else {
            return ContextAnalysis {
                album: album.map(str::to_string),
                classification: Classification::Singles,
                confidence: 1.0,
                file_count,
                track_range,
                warnings: Vec::new(),
                suggestions: suggestions(Classification::Singles, album),
            };
        };

        let missing_ratio = (file_count - numbers.len()) as f32 / file_count as f32;
        let mut warnings = Vec::new();
        let (classification, confidence) = if missing_ratio > self.max_missing_ratio {
            warnings.push(format!(
                "{} of {file_count} files have no track number",
                file_count - numbers.len()
            ));
            let excess = (missing_ratio - self.max_missing_ratio) / (1.0 - self.max_missing_ratio);
            (Classification::IncompleteAlbum, 0.6 - 0.1 * excess.clamp(0.0, 1.0))
        } else {
            let gaps = gaps(&numbers);
            let missing = count(&gaps);
            let duplicates = duplicates(&numbers);
            if missing > 0 {
                let listed = list(gaps.iter().cloned().flatten(), missing);
                warnings.push(format!("Missing track numbers: {listed}"));
            }
            if !duplicates.is_empty() {
                let listed = list(duplicates.iter().copied(), duplicates.len() as u64);
                warnings.push(format!("Duplicate track numbers: {listed}"));
            }
            if missing == 0 && duplicates.is_empty() {
                // Unnumbered files within tolerance cost a little confidence.
                let penalty = if self.max_missing_ratio > 0.0 { missing_ratio / self.max_missing_ratio } else { 0.0 };
                (Classification::Album, 1.0 - 0.1 * penalty)
            } else {
                let problems = (missing + duplicates.len() as u64) as f32 / file_count as f32;
                (Classification::PartialAlbum, 0.8 - 0.1 * problems.min(1.0))
            }
        };

        ContextAnalysis {
            album: Some(album.to_string()),
            classification,
            confidence,
            file_count,
            track_range,
            warnings,
            suggestions: suggestions(classification, Some(album)),
        }
    }
}

/// The single best suggestion across all groups; earlier groups win ties.
pub fn default_suggestion(analyses: &[ContextAnalysis]) -> Option<&Suggestion> {
    analyses
        .iter()
        .fold(None::<&ContextAnalysis>, |best, a| match best {
            Some(b) if b.confidence >= a.confidence => Some(b),
            _ => Some(a),
        })
        .and_then(|a| a.suggestions.first())
}

/// Runs of numbers missing from `1..=max`. Expects `sorted` ascending.
fn gaps(sorted: &[u32]) -> Vec<RangeInclusive<u32>> {
    let mut missing = Vec::new();
    let mut expected: u32 = 1;
    for &n in sorted {
        if n > expected {
            missing.push(expected..=n - 1);
        }
        expected = expected.max(n.saturating_add(1));
    }
    missing
}

/// How many numbers the runs cover.
fn count(runs: &[RangeInclusive<u32>]) -> u64 {
    runs.iter().map(|run| u64::from(run.end() - run.start()) + 1).sum()
}

fn duplicates(sorted: &[u32]) -> Vec<u32> {
    let mut found: Vec<u32> = sorted.windows(2).filter(|w| w[0] == w[1]).map(|w| w[0]).collect();
    found.dedup();
    found
}

/// Most numbers a warning spells out.
const LISTED: usize = 10;

/// The first [`LISTED`] of `total` numbers, then how many were left out.
fn list(numbers: impl Iterator<Item = u32>, total: u64) -> String {
    let shown: Vec<String> = numbers.take(LISTED).map(|n| n.to_string()).collect();
    let rest = total.saturating_sub(shown.len() as u64);
    let mut listed = shown.join(", ");
    if rest > 0 {
        listed.push_str(&format!(" (+{rest} more)"));
    }
    listed
}

fn suggestions(classification: Classification, album: Option<&str>) -> Vec<Suggestion> {
    let album = album.unwrap_or_default();
    match classification {
        Classification::Album => vec![
            Suggestion::new(
                "{track} - {artist} - {title}",
                format!("\"{album}\" is complete; track numbers keep the running order"),
            ),
            Suggestion::new(
                "{artist} - {album} - {track} - {title}",
                "Keeps the album name in every filename",
            ),
        ],
        Classification::PartialAlbum => vec![
            Suggestion::new(
                "{track} - {artist} - {title}",
                format!("Most of \"{album}\" is here; track numbers still give the order"),
            ),
            Suggestion::new(
                "{artist} - {title}",
                "Some tracks are missing, so numbering can be left out",
            ),
        ],
        Classification::IncompleteAlbum => vec![
            Suggestion::new(
                "{artist} - {title}",
                "Too many files lack a track number to order them",
            ),
            Suggestion::new(
                "{artist} - {album} - {title}",
                format!("Keeps \"{album}\" visible without relying on track numbers"),
            ),
        ],
        Classification::Singles => vec![
            Suggestion::new("{artist} - {title}", "Standalone tracks are best named by artist and title"),
            Suggestion::new(
                "{artist} - {title} {mix_paren}",
                "Keeps the mix name, which tells versions of a track apart",
            ),
            Suggestion::new(
                "{key_bpm} - {artist} - {title}",
                "Sorts by Camelot key and tempo for harmonic mixing",
            ),
        ],
    }
}
