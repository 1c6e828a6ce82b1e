use super::{Derived, Field, Provenance};
use crate::resolver::{MergePolicy, SourceReport, merge};
use std::collections::BTreeMap;

/// A resolved field value and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub value: String,
    pub provenance: Provenance,
    /// Confidence in `[0, 1]`, when the source reports one.
    pub confidence: Option<f32>,
}

/// A valid value from a lower-priority source that lost to a different,
/// accepted value.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub field: Field,
    pub provenance: Provenance,
    pub value: String,
}

/// The raw output of one metadata source for one file.
///
/// Values are unvalidated; the merge step decides what to keep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    values: BTreeMap<Field, String>,
    confidence: Option<f32>,
}
impl PartialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.values.insert(field, value.into());
        self
    }

    /// Overall confidence the source has in this result, clamped to `[0, 1]`.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn confidence(&self) -> Option<f32> {
        self.confidence
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
impl<S: Into<String>> FromIterator<(Field, S)> for PartialRecord {
    fn from_iter<T: IntoIterator<Item = (Field, S)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(f, v)| (f, v.into())).collect(),
            confidence: None,
        }
    }
}

/// Metadata for one source file after every source has been merged.
///
/// Immutable once produced. Re-analysis builds a new record rather than
/// touching an existing one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    fields: BTreeMap<Field, FieldValue>,
    derived: BTreeMap<Derived, String>,
    conflicts: Vec<Conflict>,
}
impl MetadataRecord {
    pub(crate) fn from_parts(
        fields: BTreeMap<Field, FieldValue>,
        derived: BTreeMap<Derived, String>,
        conflicts: Vec<Conflict>,
    ) -> Self {
        Self { fields, derived, conflicts }
    }

    /// Builds a record as if `values` had been read from embedded tags, using
    /// the default merge policy. Invalid values are dropped the same way a
    /// real resolution would drop them.
    ///
    /// ```
    /// use trackwright_metadata::models::{Field, MetadataRecord};
    /// let record = MetadataRecord::from_tags([(Field::Key, "Am"), (Field::Bpm, "128.0")]);
    /// assert_eq!(record.get(Field::Camelot), Some("8A"));
    /// assert_eq!(record.get(Field::Bpm), Some("128"));
    /// ```
    pub fn from_tags<S: Into<String>>(values: impl IntoIterator<Item = (Field, S)>) -> Self {
        let report = SourceReport::new("tags", Provenance::Tag, values.into_iter().collect());
        merge(&[report], &MergePolicy::default())
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(|v| v.value.as_str())
    }

    pub fn field(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &FieldValue)> {
        self.fields.iter().map(|(f, v)| (*f, v))
    }

    pub fn derived(&self, derived: Derived) -> Option<&str> {
        self.derived.get(&derived).map(String::as_str)
    }

    /// Valid values from lower-priority sources that disagreed with the one kept.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
