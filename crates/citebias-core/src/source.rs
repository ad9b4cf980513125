//! Typed schemas for OpenReview note exports.
//!
//! API v1 notes keep plain values under `content`; API v2 notes wrap each
//! content value as `{"value": ...}`. Both keep a list of top-level metadata
//! fields (`forum`, `replyto`, `signatures`, `cdate`, ...) that we carry along
//! untyped.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::CoreError;
use crate::keys::{JoinKey, KeyError, KeyRule, path_segment};
use crate::record::{FieldValue, Record};

static NULL_VALUE: Value = Value::Null;

/// Common view over the note formats.
pub trait ReviewNote {
    fn id(&self) -> &str;

    /// Join key of the submission this note belongs to.
    fn submission_key(&self) -> Result<JoinKey, KeyError>;

    /// Content keys in export order.
    fn content_keys(&self) -> Vec<&str>;

    /// The unwrapped value of a content field.
    fn content_value(&self, key: &str) -> Option<&Value>;

    /// Top-level fields other than `id`, the invitation(s) and `content`.
    fn metadata(&self) -> &Map<String, Value>;

    /// Flatten into a record: `id`, the content fields, the invitation(s),
    /// then the metadata fields, each group in source order.
    fn to_record(&self) -> Record;

    /// The key rule that re-derives [`ReviewNote::submission_key`] from a
    /// flattened record.
    fn key_rule() -> KeyRule
    where
        Self: Sized;
}

/// An OpenReview API v1 note.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteV1 {
    pub id: String,
    pub invitation: String,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ReviewNote for NoteV1 {
    fn id(&self) -> &str {
        &self.id
    }

    fn submission_key(&self) -> Result<JoinKey, KeyError> {
        path_segment(&self.invitation, 3)
            .and_then(JoinKey::canonical)
            .ok_or_else(|| KeyError::NoMatch {
                field: "invitation".to_string(),
                value: self.invitation.clone(),
            })
    }

    fn content_keys(&self) -> Vec<&str> {
        self.content.keys().map(String::as_str).collect()
    }

    fn content_value(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }

    fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    fn key_rule() -> KeyRule {
        KeyRule::openreview_v1()
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("id", self.id.as_str());
        for (key, value) in &self.content {
            record.insert(key.as_str(), FieldValue::from_json(value));
        }
        record.insert("invitation", self.invitation.as_str());
        for (key, value) in &self.metadata {
            record.insert(key.as_str(), FieldValue::from_json(value));
        }
        record
    }
}

/// An OpenReview API v2 note.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteV2 {
    pub id: String,
    #[serde(default)]
    pub invitations: Vec<String>,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl NoteV2 {
    /// The invitation naming the submission, e.g.
    /// `NeurIPS.cc/2023/Conference/Submission1404/-/Official_Review`.
    pub fn submission_invitation(&self) -> Option<&str> {
        self.invitations
            .iter()
            .map(String::as_str)
            .find(|inv| inv.contains("Submission"))
    }
}

impl ReviewNote for NoteV2 {
    fn id(&self) -> &str {
        &self.id
    }

    fn submission_key(&self) -> Result<JoinKey, KeyError> {
        self.submission_invitation()
            .and_then(|inv| path_segment(inv, 3))
            .and_then(JoinKey::canonical)
            .ok_or_else(|| KeyError::NoMatch {
                field: "invitations".to_string(),
                value: self.invitations.join(", "),
            })
    }

    fn content_keys(&self) -> Vec<&str> {
        self.content.keys().map(String::as_str).collect()
    }

    fn content_value(&self, key: &str) -> Option<&Value> {
        match self.content.get(key)? {
            Value::Object(obj) if obj.contains_key("value") => obj.get("value"),
            Value::Object(obj) if obj.is_empty() => Some(&NULL_VALUE),
            other => Some(other),
        }
    }

    fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    fn key_rule() -> KeyRule {
        KeyRule::openreview_v2()
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("id", self.id.as_str());
        for key in self.content.keys() {
            let value = self.content_value(key).unwrap_or(&NULL_VALUE);
            record.insert(key.as_str(), FieldValue::from_json(value));
        }
        record.insert("invitations", self.invitations.join(", "));
        for (key, value) in &self.metadata {
            record.insert(key.as_str(), FieldValue::from_json(value));
        }
        record
    }
}

/// Notes that deserialized, plus the ones that did not.
#[derive(Debug)]
pub struct LoadedNotes<N> {
    pub notes: Vec<N>,
    /// `(index, reason)` for each element that failed schema validation.
    pub rejected: Vec<(usize, String)>,
}

impl<N: ReviewNote> LoadedNotes<N> {
    pub fn records(&self) -> Vec<Record> {
        self.notes.iter().map(ReviewNote::to_record).collect()
    }

    /// Records paired with their submission key, in a form [`crate::merge`]
    /// can key with [`KeyRule::Field`].
    pub fn keyed_records(&self, key_field: &str) -> Vec<Record> {
        self.notes
            .iter()
            .map(|note| {
                let mut record = note.to_record();
                let key = match note.submission_key() {
                    Ok(k) => FieldValue::Text(k.to_string()),
                    Err(_) => FieldValue::Null,
                };
                record.insert(key_field, key);
                record
            })
            .collect()
    }
}

/// Parse a JSON export: an array of notes or a single note object.
///
/// Elements that fail the schema are logged and collected in
/// [`LoadedNotes::rejected`]; the rest load normally.
pub fn load_notes<N>(json: &str) -> Result<LoadedNotes<N>, CoreError>
where
    N: for<'de> Deserialize<'de>,
{
    let root: Value = serde_json::from_str(json)?;
    let items = match root {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(CoreError::Invalid(format!(
                "expected a JSON array or object of notes, found {}",
                json_kind(&other)
            )));
        }
    };

    let mut notes = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<N>(item) {
            Ok(note) => notes.push(note),
            Err(e) => {
                tracing::warn!(index, error = %e, "note rejected");
                rejected.push((index, e.to_string()));
            }
        }
    }

    tracing::debug!(loaded = notes.len(), rejected = rejected.len(), "notes loaded");
    Ok(LoadedNotes { notes, rejected })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"[
        {
            "id": "rev1",
            "invitation": "ICLR.cc/2023/Conference/Paper1234/-/Official_Review",
            "forum": "f1",
            "content": {"rating": "6: marginally above", "summary_of_the_review": "ok"},
            "signatures": ["ICLR.cc/2023/Conference/Paper1234/Reviewer_a"]
        },
        {"id": "broken"}
    ]"#;

    const V2: &str = r#"{
        "id": "rev9",
        "invitations": [
            "NeurIPS.cc/2023/Conference/-/Edit",
            "NeurIPS.cc/2023/Conference/Submission1404/-/Official_Review"
        ],
        "content": {"rating": {"value": 7}, "questions": {"value": "none"}, "limitations": {}},
        "cdate": 1690000000000
    }"#;

    #[test]
    fn v1_loads_and_rejects_malformed() {
        let loaded = load_notes::<NoteV1>(V1).unwrap();
        assert_eq!(loaded.notes.len(), 1);
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].0, 1);

        let note = &loaded.notes[0];
        assert_eq!(note.submission_key().unwrap().as_str(), "1234");
        assert_eq!(note.content_keys(), vec!["rating", "summary_of_the_review"]);
        assert!(note.metadata().contains_key("forum"));
        assert!(!note.metadata().contains_key("content"));
    }

    #[test]
    fn v1_record_flattens_lists() {
        let loaded = load_notes::<NoteV1>(V1).unwrap();
        let record = loaded.notes[0].to_record();
        assert_eq!(record.text("id"), Some("rev1"));
        assert_eq!(record.text("rating"), Some("6: marginally above"));
        assert_eq!(
            record.text("signatures"),
            Some("ICLR.cc/2023/Conference/Paper1234/Reviewer_a")
        );
    }

    #[test]
    fn v2_single_object_unwraps_values() {
        let loaded = load_notes::<NoteV2>(V2).unwrap();
        assert_eq!(loaded.notes.len(), 1);
        let note = &loaded.notes[0];
        assert_eq!(note.submission_key().unwrap().as_str(), "1404");
        assert_eq!(note.content_value("rating"), Some(&Value::from(7)));

        let record = note.to_record();
        assert_eq!(record.get("rating"), Some(&FieldValue::Integer(7)));
        assert_eq!(record.text("questions"), Some("none"));
        assert_eq!(record.get("limitations"), Some(&FieldValue::Null));
        assert_eq!(record.get("cdate"), Some(&FieldValue::Integer(1690000000000)));
    }

    #[test]
    fn keyed_records_carry_submission_key() {
        let loaded = load_notes::<NoteV2>(V2).unwrap();
        let records = loaded.keyed_records("submission");
        assert_eq!(records[0].text("submission"), Some("1404"));
    }

    #[test]
    fn scalar_root_is_invalid() {
        let err = load_notes::<NoteV1>("42").unwrap_err();
        assert!(matches!(err, CoreError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            load_notes::<NoteV1>("[{"),
            Err(CoreError::Json(_))
        ));
    }

    #[test]
    fn key_rule_agrees_with_submission_key() {
        let v1 = load_notes::<NoteV1>(V1).unwrap();
        let record = v1.notes[0].to_record();
        assert_eq!(
            NoteV1::key_rule().derive(&record).unwrap(),
            v1.notes[0].submission_key().unwrap()
        );

        let v2 = load_notes::<NoteV2>(V2).unwrap();
        let record = v2.notes[0].to_record();
        assert_eq!(
            NoteV2::key_rule().derive(&record).unwrap(),
            v2.notes[0].submission_key().unwrap()
        );
    }
}
