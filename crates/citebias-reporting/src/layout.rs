//! Column order for review exports.
//!
//! A review table always starts with the id column, followed by the content
//! fields in a fixed, hand-checked order. Merged columns come next, and the
//! remaining metadata fields close the table in lexicographic order.

use indexmap::IndexSet;

use citebias_core::{MergeOutcome, ReviewNote};

use crate::table::Table;

/// Ordered content keys of ICLR (OpenReview API v1) reviews.
const ICLR_API1_CONTENT: &[&str] = &[
    "summary_of_the_paper",
    "strength_and_weaknesses",
    "clarity,_quality,_novelty_and_reproducibility",
    "summary_of_the_review",
    "confidence",
    "correctness",
    "technical_novelty_and_significance",
    "empirical_novelty_and_significance",
    "flag_for_ethics_review",
    "recommendation",
];

/// Ordered content keys of NeurIPS (OpenReview API v2) reviews.
const NEURIPS_API2_CONTENT: &[&str] = &[
    "summary",
    "strengths",
    "weaknesses",
    "questions",
    "limitations",
    "flag_for_ethics_review",
    "rating",
    "confidence",
    "Reviewer_Confidence",
    "code_of_conduct",
    "contribution",
    "presentation",
    "soundness",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub id_column: String,
    /// Content keys that lead the table, always present even when no note
    /// has them.
    pub ordered_content: Vec<String>,
    /// Keep content keys outside `ordered_content` (sorted, after the ordered
    /// ones). When false they are dropped.
    pub extra_content: bool,
}

impl ColumnLayout {
    pub fn new<S: AsRef<str>>(ordered_content: &[S], extra_content: bool) -> Self {
        Self {
            id_column: "id".to_string(),
            ordered_content: ordered_content
                .iter()
                .map(|k| k.as_ref().to_string())
                .collect(),
            extra_content,
        }
    }

    pub fn iclr_api1() -> Self {
        Self::new(ICLR_API1_CONTENT, false)
    }

    pub fn neurips_api2() -> Self {
        Self::new(NEURIPS_API2_CONTENT, true)
    }

    /// The header for a table with the given keys.
    pub fn columns(
        &self,
        content_keys: &[String],
        metadata_keys: &[String],
        merged_keys: &[String],
    ) -> Vec<String> {
        let mut header: IndexSet<String> = IndexSet::new();
        header.insert(self.id_column.clone());
        header.extend(self.ordered_content.iter().cloned());

        if self.extra_content {
            let mut extra: Vec<&String> = content_keys
                .iter()
                .filter(|k| !header.contains(k.as_str()))
                .collect();
            extra.sort();
            extra.dedup();
            header.extend(extra.into_iter().cloned());
        }

        header.extend(merged_keys.iter().cloned());

        let mut metadata: Vec<&String> = metadata_keys
            .iter()
            .filter(|k| !header.contains(k.as_str()) && k.as_str() != "content")
            .filter(|k| self.extra_content || !content_keys.contains(k))
            .collect();
        metadata.sort();
        metadata.dedup();
        header.extend(metadata.into_iter().cloned());

        header.into_iter().collect()
    }

    /// One row per note.
    pub fn tabulate<N: ReviewNote>(&self, notes: &[N]) -> Table {
        let keys = NoteKeys::collect(notes);
        let columns = self.columns(&keys.content, &keys.metadata, &[]);
        Table::from_records(columns, notes.iter().map(ReviewNote::to_record).collect())
    }

    /// One row per merged record. `notes` must be the notes the left side of
    /// `outcome` was built from.
    pub fn tabulate_merged<N: ReviewNote>(&self, notes: &[N], outcome: MergeOutcome) -> Table {
        let keys = NoteKeys::collect(notes);
        let columns = self.columns(&keys.content, &keys.metadata, &outcome.right_columns);
        Table::from_records(columns, outcome.into_records())
    }
}

/// Content and metadata field names seen across a set of notes, in
/// first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteKeys {
    pub content: Vec<String>,
    /// Everything in the flattened record that is neither `id` nor content.
    pub metadata: Vec<String>,
}

impl NoteKeys {
    pub fn collect<N: ReviewNote>(notes: &[N]) -> Self {
        let mut content: IndexSet<String> = IndexSet::new();
        let mut metadata: IndexSet<String> = IndexSet::new();
        for note in notes {
            let keys = note.content_keys();
            content.extend(keys.iter().map(|k| k.to_string()));
            let record = note.to_record();
            metadata.extend(
                record
                    .field_names()
                    .filter(|name| *name != "id" && !keys.contains(name))
                    .map(str::to_string),
            );
        }
        Self {
            content: content.into_iter().collect(),
            metadata: metadata.into_iter().collect(),
        }
    }
}
