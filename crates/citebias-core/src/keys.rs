//! Join keys and the per-source rules that derive them.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::record::Record;

static SUBMISSION_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)((?:paper|submission)\d+)").unwrap());

/// A normalized identifier used to correlate records across sources.
///
/// `Paper1234`, `Submission1234`, `submission1234` and `1234` all
/// canonicalize to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinKey(String);

impl JoinKey {
    /// Lowercase, drop everything that is not an ASCII letter or digit, and
    /// strip a leading `paper`/`submission` word when digits follow it.
    /// Returns `None` when nothing identifying is left.
    pub fn canonical(raw: &str) -> Option<JoinKey> {
        let cleaned: String = raw
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let stripped = ["submission", "paper"]
            .iter()
            .find_map(|prefix| {
                cleaned
                    .strip_prefix(*prefix)
                    .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            })
            .unwrap_or(cleaned.as_str());
        if stripped.is_empty() {
            None
        } else {
            Some(JoinKey(stripped.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("field `{0}` is missing or empty")]
    MissingField(String),
    #[error("no identifier found in `{field}` ({value:?})")]
    NoMatch { field: String, value: String },
}

/// How a join key is pulled out of a record.
#[derive(Debug, Clone)]
pub enum KeyRule {
    /// A `/`-separated path segment of a text field, e.g. segment 3 of
    /// `ICLR.cc/2023/Conference/Paper1234/-/Official_Review`.
    InvitationSegment { field: String, segment: usize },
    /// The first entry of a `,`-separated list field that contains `needle`,
    /// then its path segment.
    InvitationsContaining {
        field: String,
        needle: String,
        segment: usize,
    },
    /// The first capture group (or the whole match) of a regex over a field.
    Pattern { field: String, regex: Regex },
    /// The field value itself.
    Field(String),
}

impl KeyRule {
    /// OpenReview API v1 notes: `invitation` = `Venue/Year/Conference/Paper123/-/...`.
    pub fn openreview_v1() -> Self {
        KeyRule::InvitationSegment {
            field: "invitation".to_string(),
            segment: 3,
        }
    }

    /// OpenReview API v2 notes: the `invitations` entry naming `Submission123`.
    pub fn openreview_v2() -> Self {
        KeyRule::InvitationsContaining {
            field: "invitations".to_string(),
            needle: "Submission".to_string(),
            segment: 3,
        }
    }

    /// A regex rule; fails if `pattern` does not compile.
    pub fn pattern(field: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(KeyRule::Pattern {
            field: field.to_string(),
            regex: Regex::new(pattern)?,
        })
    }

    /// `Paper123` / `Submission123` anywhere in `field`, e.g. a file name
    /// like `submission1404.pdf` or a stringified invitation list.
    pub fn submission_number(field: &str) -> Self {
        KeyRule::Pattern {
            field: field.to_string(),
            regex: SUBMISSION_NUMBER.clone(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            KeyRule::InvitationSegment { field, .. }
            | KeyRule::InvitationsContaining { field, .. }
            | KeyRule::Pattern { field, .. }
            | KeyRule::Field(field) => field,
        }
    }

    /// Derive the key for `record`.
    pub fn derive(&self, record: &Record) -> Result<JoinKey, KeyError> {
        let field = self.field();
        let value = record
            .get(field)
            .filter(|v| !v.is_empty() && !v.is_absent())
            .map(|v| v.render().into_owned())
            .ok_or_else(|| KeyError::MissingField(field.to_string()))?;

        let token = match self {
            KeyRule::InvitationSegment { segment, .. } => path_segment(&value, *segment),
            KeyRule::InvitationsContaining {
                needle, segment, ..
            } => value
                .split(',')
                .map(str::trim)
                .find(|inv| inv.contains(needle.as_str()))
                .and_then(|inv| path_segment(inv, *segment)),
            KeyRule::Pattern { regex, .. } => regex
                .captures(&value)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| m.as_str()),
            KeyRule::Field(_) => Some(value.as_str()),
        };

        token
            .and_then(JoinKey::canonical)
            .ok_or_else(|| KeyError::NoMatch {
                field: field.to_string(),
                value: value.clone(),
            })
    }
}

/// The `index`-th `/`-separated segment of `path`, if non-empty.
pub fn path_segment(path: &str, index: usize) -> Option<&str> {
    path.split('/').nth(index).filter(|s| !s.is_empty())
}
