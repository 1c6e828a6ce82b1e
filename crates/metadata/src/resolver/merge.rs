use crate::models::{
    Camelot, Conflict, Derived, Field, FieldValue, MetadataRecord, MusicalKey, PartialRecord, Provenance, format_bpm,
    parse_bpm,
};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use trackwright_config::ResolverConfig;

/// Thresholds applied while merging.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePolicy {
    /// Lookup values are used only when the lookup's confidence is strictly
    /// greater than this.
    pub lookup_threshold: f32,
    pub plausible_bpm: RangeInclusive<f32>,
}
impl MergePolicy {
    fn trusts(&self, report: &SourceReport) -> bool {
        match report.provenance {
            Provenance::Lookup => report.record.confidence().is_some_and(|c| c > self.lookup_threshold),
            Provenance::Tag | Provenance::Analysis => true,
        }
    }
}
impl Default for MergePolicy {
    fn default() -> Self {
        Self::from(&ResolverConfig::default())
    }
}
impl From<&ResolverConfig> for MergePolicy {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            lookup_threshold: config.lookup_confidence_threshold,
            plausible_bpm: config.bpm_min..=config.bpm_max,
        }
    }
}

/// What one provider said about one file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub source: String,
    pub provenance: Provenance,
    pub record: PartialRecord,
}
impl SourceReport {
    pub fn new(source: impl Into<String>, provenance: Provenance, record: PartialRecord) -> Self {
        Self {
            source: source.into(),
            provenance,
            record,
        }
    }
}

/// Merges source reports into a single record.
///
/// For every field the highest-priority valid value wins (tag, then trusted
/// lookup, then analysis). Reports of equal provenance keep their given
/// order. Valid values from lower-priority sources that disagree with the
/// winner are kept as [`Conflict`]s so they can be shown to the user.
///
/// Key and Camelot code describe the same thing; whichever came from the
/// better source is used to fill in (or override) the other.
pub fn merge(reports: &[SourceReport], policy: &MergePolicy) -> MetadataRecord {
    let mut ordered: Vec<&SourceReport> = reports.iter().collect();
    ordered.sort_by_key(|report| report.provenance);

    let mut fields: BTreeMap<Field, FieldValue> = BTreeMap::new();
    let mut conflicts = Vec::new();
    for report in ordered {
        if !policy.trusts(report) {
            tracing::debug!(
                source = report.source,
                confidence = ?report.record.confidence(),
                "Ignoring low-confidence lookup result"
            );
            continue;
        }
        for field in Field::ALL {
            let Some(raw) = report.record.get(field) else {
                continue;
            };
            let Some(value) = normalize(field, raw, policy) else {
                tracing::debug!(source = report.source, %field, value = raw, "Discarding invalid value");
                continue;
            };
            match fields.get(&field) {
                None => {
                    fields.insert(
                        field,
                        FieldValue {
                            value,
                            provenance: report.provenance,
                            confidence: report.record.confidence(),
                        },
                    );
                },
                Some(kept) if !kept.value.eq_ignore_ascii_case(&value) => conflicts.push(Conflict {
                    field,
                    provenance: report.provenance,
                    value,
                }),
                Some(_) => {},
            }
        }
    }
    reconcile_key(&mut fields, &mut conflicts);
    let derived = derive(&fields);
    MetadataRecord::from_parts(fields, derived, conflicts)
}

/// Canonical form of a raw value, or `None` when the value is unusable.
fn normalize(field: Field, raw: &str, policy: &MergePolicy) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    match field {
        Field::Bpm => parse_bpm(&collapsed, &policy.plausible_bpm).map(format_bpm),
        Field::Key => collapsed.parse::<MusicalKey>().ok().map(|key| key.to_string()),
        Field::Camelot => collapsed.parse::<MusicalKey>().ok().map(|key| key.camelot().to_string()),
        // Tags commonly hold full dates ("2019-04-12").
        Field::Year => {
            let year: String = collapsed.chars().take(4).collect();
            (year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit())).then_some(year)
        },
        _ => Some(collapsed),
    }
}

fn reconcile_key(fields: &mut BTreeMap<Field, FieldValue>, conflicts: &mut Vec<Conflict>) {
    let key = fields.get(&Field::Key).cloned();
    let camelot = fields.get(&Field::Camelot).cloned();
    let (source, target, value) = match (key, camelot) {
        (None, None) => return,
        (Some(key), camelot) if camelot.as_ref().is_none_or(|c| key.provenance <= c.provenance) => {
            let Ok(parsed) = key.value.parse::<MusicalKey>() else {
                return;
            };
            (key, Field::Camelot, parsed.camelot().to_string())
        },
        (_, Some(camelot)) => {
            let Ok(parsed) = camelot.value.parse::<Camelot>() else {
                return;
            };
            (camelot, Field::Key, parsed.key().to_string())
        },
        // Unreachable: a key without a camelot code matches the first arm.
        (Some(_), None) => return,
    };
    if let Some(existing) = fields.get(&target)
        && existing.value != value
    {
        conflicts.push(Conflict {
            field: target,
            provenance: existing.provenance,
            value: existing.value.clone(),
        });
    }
    fields.insert(target, FieldValue { value, ..source });
}

fn derive(fields: &BTreeMap<Field, FieldValue>) -> BTreeMap<Derived, String> {
    let get = |field: Field| fields.get(&field).map(|v| v.value.as_str());
    let mut derived = BTreeMap::new();

    let key_bpm: Vec<&str> = [get(Field::Camelot).or(get(Field::Key)), get(Field::Bpm)]
        .into_iter()
        .flatten()
        .collect();
    if !key_bpm.is_empty() {
        derived.insert(Derived::KeyBpm, key_bpm.join(" "));
    }

    if let Some(mix) = get(Field::Mix) {
        let wrapped = if mix.starts_with('(') && mix.ends_with(')') { mix.to_string() } else { format!("({mix})") };
        derived.insert(Derived::MixParen, wrapped);
    }
    derived
}
