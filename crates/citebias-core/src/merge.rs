//! Left-joining one record collection into another by join key.
//!
//! Every left record appears exactly once in the output, in input order.
//! Right records are indexed by key with first-match-wins; when a left record
//! has no match, every right-side field is filled with [`FieldValue::Absent`]
//! rather than being left out.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;

use crate::keys::{JoinKey, KeyError, KeyRule};
use crate::record::{FieldValue, Record};

#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Right-side fields to carry over. `None` takes every field seen on the
    /// right, in first-seen order.
    pub right_fields: Option<Vec<String>>,
    /// Appended to a right field name that already exists on the left.
    pub collision_suffix: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            right_fields: None,
            collision_suffix: "_right".to_string(),
        }
    }
}

impl MergeOptions {
    pub fn with_right_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            right_fields: Some(fields.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

/// A left record combined with the fields of its match, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub fields: Record,
    pub matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Something the merger skipped or discarded, with enough context to find it.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDiagnostic {
    /// No key could be derived. Right records are dropped from the index;
    /// left records are still emitted, unmatched.
    MissingKey {
        side: Side,
        index: usize,
        error: KeyError,
    },
    /// A later right record shared a key with an earlier one and was ignored.
    DuplicateKey {
        index: usize,
        first_index: usize,
        key: JoinKey,
    },
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: Vec<MergedRecord>,
    /// Output names of the right-side columns, after collision renaming.
    pub right_columns: Vec<String>,
    pub diagnostics: Vec<MergeDiagnostic>,
}

impl MergeOutcome {
    pub fn matched_count(&self) -> usize {
        self.records.iter().filter(|r| r.matched).count()
    }

    pub fn unmatched_count(&self) -> usize {
        self.records.len() - self.matched_count()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records.into_iter().map(|m| m.fields).collect()
    }
}

/// Left-join `right` into `left`.
pub fn merge<LK, RK>(
    left: &[Record],
    right: &[Record],
    left_key: LK,
    right_key: RK,
    options: &MergeOptions,
) -> MergeOutcome
where
    LK: Fn(&Record) -> Result<JoinKey, KeyError>,
    RK: Fn(&Record) -> Result<JoinKey, KeyError>,
{
    let mut diagnostics = Vec::new();

    let mut index: HashMap<JoinKey, usize> = HashMap::with_capacity(right.len());
    for (i, record) in right.iter().enumerate() {
        match right_key(record) {
            Ok(key) => match index.entry(key) {
                Entry::Occupied(existing) => {
                    tracing::warn!(key = %existing.key(), index = i, first = *existing.get(), "duplicate right key ignored");
                    diagnostics.push(MergeDiagnostic::DuplicateKey {
                        index: i,
                        first_index: *existing.get(),
                        key: existing.key().clone(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
            },
            Err(error) => {
                tracing::warn!(side = "right", index = i, error = %error, "record has no join key, skipped");
                diagnostics.push(MergeDiagnostic::MissingKey {
                    side: Side::Right,
                    index: i,
                    error,
                });
            }
        }
    }

    let right_names: Vec<String> = match &options.right_fields {
        Some(fields) => fields.clone(),
        None => {
            let mut seen: IndexSet<&str> = IndexSet::new();
            for record in right {
                seen.extend(record.field_names());
            }
            seen.into_iter().map(str::to_string).collect()
        }
    };

    let left_names: HashSet<&str> = left.iter().flat_map(Record::field_names).collect();
    let columns: Vec<(String, String)> = right_names
        .into_iter()
        .map(|name| {
            let output = if left_names.contains(name.as_str()) {
                format!("{}{}", name, options.collision_suffix)
            } else {
                name.clone()
            };
            (name, output)
        })
        .collect();

    let mut records = Vec::with_capacity(left.len());
    for (i, record) in left.iter().enumerate() {
        let matched = match left_key(record) {
            Ok(key) => index.get(&key).map(|&ri| &right[ri]),
            Err(error) => {
                tracing::warn!(side = "left", index = i, error = %error, "record has no join key, emitted unmatched");
                diagnostics.push(MergeDiagnostic::MissingKey {
                    side: Side::Left,
                    index: i,
                    error,
                });
                None
            }
        };

        let mut fields = record.clone();
        for (source, output) in &columns {
            let value = match matched {
                Some(r) => r.get(source).cloned().unwrap_or(FieldValue::Null),
                None => FieldValue::Absent,
            };
            fields.insert(output.clone(), value);
        }
        records.push(MergedRecord {
            fields,
            matched: matched.is_some(),
        });
    }

    MergeOutcome {
        records,
        right_columns: columns.into_iter().map(|(_, output)| output).collect(),
        diagnostics,
    }
}

/// [`merge`] with key rules instead of closures.
pub fn merge_with_rules(
    left: &[Record],
    right: &[Record],
    left_rule: &KeyRule,
    right_rule: &KeyRule,
    options: &MergeOptions,
) -> MergeOutcome {
    merge(
        left,
        right,
        |r| left_rule.derive(r),
        |r| right_rule.derive(r),
        options,
    )
}
