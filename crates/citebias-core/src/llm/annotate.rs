//! Row-by-row annotation of review tables.
//!
//! Each row's context columns are rendered as `column: value` lines and sent
//! with a fixed question. A row whose completion ultimately fails gets
//! [`FAILED_RESPONSE`] instead of aborting the run.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::CompletionBackend;
use crate::record::{FieldValue, Record};
use crate::retry::{RetryPolicy, complete_with_retry};

/// Written in place of a response when every attempt failed.
pub const FAILED_RESPONSE: &str = "Failed to get response";

/// Review text columns of NeurIPS (API v2) exports.
pub const NEURIPS_CONTEXT_COLUMNS: &[&str] = &[
    "summary",
    "strengths",
    "weaknesses",
    "questions",
    "limitations",
    "flag_for_ethics_review",
    "rating",
];

/// Review text columns of ICLR (API v1) exports.
pub const ICLR_CONTEXT_COLUMNS: &[&str] = &[
    "summary_of_the_paper",
    "strength_and_weaknesses",
    "clarity,_quality,_novelty_and_reproducibility",
    "summary_of_the_review",
];

/// `column: value` lines for the non-empty context columns of `row`.
pub fn build_context<S: AsRef<str>>(row: &Record, columns: &[S]) -> String {
    columns
        .iter()
        .filter_map(|col| {
            let col = col.as_ref();
            row.get(col)
                .filter(|v| !v.is_empty() && !v.is_absent())
                .map(|v| format!("{}: {}", col, v.render().trim()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct AnnotationSettings {
    pub question: String,
    pub context_columns: Vec<String>,
    pub id_column: String,
    pub response_column: String,
    /// Ids that already have a response (from an earlier, interrupted run).
    pub skip_ids: HashSet<String>,
    /// Pause between consecutive requests.
    pub pause: Duration,
    pub retry: RetryPolicy,
}

impl AnnotationSettings {
    pub fn new(question: impl Into<String>, context_columns: &[&str]) -> Self {
        Self {
            question: question.into(),
            context_columns: context_columns.iter().map(|c| c.to_string()).collect(),
            id_column: "id".to_string(),
            response_column: "response".to_string(),
            skip_ids: HashSet::new(),
            pause: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }
}

/// Progress reported for each input row.
#[derive(Debug)]
pub enum AnnotationEvent<'a> {
    /// The row has no id and was left out.
    MissingId { index: usize },
    /// The row's id is in [`AnnotationSettings::skip_ids`].
    AlreadyDone { index: usize, id: &'a str },
    /// The row with its response column filled in.
    Annotated {
        index: usize,
        record: Record,
        failed: bool,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSummary {
    pub annotated: usize,
    pub failed: usize,
    pub missing_id: usize,
    pub already_done: usize,
    /// Rows not processed because the run was cancelled.
    pub not_reached: usize,
    pub cancelled: bool,
}

fn row_id<'r>(row: &'r Record, column: &str) -> Option<&'r str> {
    row.text(column).map(str::trim).filter(|id| !id.is_empty())
}

/// Annotate `rows` in order, handing each result to `on_event` as soon as it
/// is ready so callers can flush incrementally.
///
/// Cancelling `cancel` stops before the next row (or abandons the request in
/// flight); every row already reported stays reported.
pub async fn annotate_rows<F, E>(
    backend: &dyn CompletionBackend,
    rows: &[Record],
    settings: &AnnotationSettings,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<AnnotationSummary, E>
where
    F: FnMut(AnnotationEvent<'_>) -> Result<(), E>,
{
    let mut summary = AnnotationSummary::default();
    let mut requested = false;

    for (index, row) in rows.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            summary.not_reached = rows.len() - index;
            break;
        }

        let Some(id) = row_id(row, &settings.id_column) else {
            tracing::warn!(index, "row has no id, skipped");
            summary.missing_id += 1;
            on_event(AnnotationEvent::MissingId { index })?;
            continue;
        };
        if settings.skip_ids.contains(id) {
            tracing::debug!(id, "already annotated, skipped");
            summary.already_done += 1;
            on_event(AnnotationEvent::AlreadyDone { index, id })?;
            continue;
        }

        if requested && !settings.pause.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    summary.not_reached = rows.len() - index;
                    break;
                }
                _ = tokio::time::sleep(settings.pause) => {}
            }
        }
        requested = true;

        let context = build_context(row, &settings.context_columns);
        tracing::info!(id, backend = backend.name(), "annotating row");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                summary.not_reached = rows.len() - index;
                break;
            }
            outcome = complete_with_retry(backend, &context, &settings.question, &settings.retry) => outcome,
        };

        let (response, failed) = match outcome.result {
            Ok(text) => (text, false),
            Err(ref e) => {
                tracing::warn!(id, error = %e, "no response, writing failure marker");
                (FAILED_RESPONSE.to_string(), true)
            }
        };
        summary.annotated += 1;
        if failed {
            summary.failed += 1;
        }

        let mut record = row.clone();
        record.insert(settings.response_column.as_str(), response);
        on_event(AnnotationEvent::Annotated {
            index,
            record,
            failed,
            attempts: outcome.attempts,
        })?;
    }

    Ok(summary)
}

/// Re-ask every row whose response column holds [`FAILED_RESPONSE`],
/// updating the rows in place. Returns how many now have a response.
pub async fn retry_failed_rows(
    backend: &dyn CompletionBackend,
    rows: &mut [Record],
    settings: &AnnotationSettings,
    cancel: &CancellationToken,
) -> usize {
    let mut recovered = 0;
    for row in rows.iter_mut() {
        if cancel.is_cancelled() {
            break;
        }
        if row.text(&settings.response_column).map(str::trim) != Some(FAILED_RESPONSE) {
            continue;
        }
        let context = build_context(row, &settings.context_columns);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = complete_with_retry(backend, &context, &settings.question, &settings.retry) => outcome,
        };
        if let Ok(text) = outcome.result {
            row.insert(settings.response_column.as_str(), FieldValue::Text(text));
            recovered += 1;
        }
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::llm::mock::{MockCompletion, MockReply};

    fn review(id: &str, summary: &str) -> Record {
        let mut r = Record::new();
        r.insert("id", id);
        r.insert("summary", summary);
        r.insert("strengths", "");
        r.insert("rating", FieldValue::Integer(6));
        r
    }

    fn settings() -> AnnotationSettings {
        AnnotationSettings {
            retry: RetryPolicy::none(),
            ..AnnotationSettings::new("Cite?", NEURIPS_CONTEXT_COLUMNS)
        }
    }

    #[test]
    fn context_skips_empty_columns() {
        let row = review("r1", "  A new method. ");
        assert_eq!(
            build_context(&row, NEURIPS_CONTEXT_COLUMNS),
            "summary: A new method.\nrating: 6"
        );
        assert_eq!(build_context(&Record::new(), NEURIPS_CONTEXT_COLUMNS), "");
    }

    #[tokio::test]
    async fn annotates_and_marks_failures() {
        let backend = MockCompletion::with_sequence(vec![
            MockReply::answer("Yes, see [1]."),
            MockReply::Fail(LlmError::Rejected {
                status: 400,
                body: String::new(),
            }),
        ]);
        let rows = vec![review("r1", "one"), review("", "two"), review("r3", "three")];
        let mut written = Vec::new();
        let summary = annotate_rows(
            &backend,
            &rows,
            &settings(),
            &CancellationToken::new(),
            |event| {
                if let AnnotationEvent::Annotated { record, .. } = event {
                    written.push(record);
                }
                Ok::<(), ()>(())
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.annotated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.missing_id, 1);
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].text("response"), Some("Yes, see [1]."));
        assert_eq!(written[1].text("id"), Some("r3"));
        assert_eq!(written[1].text("response"), Some(FAILED_RESPONSE));
        assert_eq!(backend.contexts()[0], "summary: one\nrating: 6");
    }

    #[tokio::test]
    async fn skips_already_done_ids() {
        let backend = MockCompletion::new(MockReply::answer("No"));
        let rows = vec![review("r1", "one"), review("r2", "two")];
        let mut settings = settings();
        settings.skip_ids.insert("r1".to_string());

        let summary = annotate_rows(&backend, &rows, &settings, &CancellationToken::new(), |_| {
            Ok::<(), ()>(())
        })
        .await
        .unwrap();
        assert_eq!(summary.already_done, 1);
        assert_eq!(summary.annotated, 1);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn cancellation_keeps_finished_rows() {
        let backend = MockCompletion::new(MockReply::answer("Yes"));
        let rows = vec![review("r1", "one"), review("r2", "two"), review("r3", "three")];
        let cancel = CancellationToken::new();
        let mut written = Vec::new();

        let summary = annotate_rows(&backend, &rows, &settings(), &cancel, |event| {
            if let AnnotationEvent::Annotated { record, .. } = event {
                written.push(record);
                cancel.cancel();
            }
            Ok::<(), ()>(())
        })
        .await
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.not_reached, 2);
        assert_eq!(written.len(), 1);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn callback_error_stops_the_run() {
        let backend = MockCompletion::new(MockReply::answer("Yes"));
        let rows = vec![review("r1", "one"), review("r2", "two")];
        let result = annotate_rows(&backend, &rows, &settings(), &CancellationToken::new(), |_| {
            Err("disk full")
        })
        .await;
        assert_eq!(result.unwrap_err(), "disk full");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn failed_rows_are_retried() {
        let backend = MockCompletion::new(MockReply::answer("Yes"));
        let mut ok = review("r1", "one");
        ok.insert("response", "No");
        let mut failed = review("r2", "two");
        failed.insert("response", FAILED_RESPONSE);
        let mut rows = vec![ok, failed];

        let recovered =
            retry_failed_rows(&backend, &mut rows, &settings(), &CancellationToken::new()).await;
        assert_eq!(recovered, 1);
        assert_eq!(rows[0].text("response"), Some("No"));
        assert_eq!(rows[1].text("response"), Some("Yes"));
        assert_eq!(backend.call_count(), 1);
    }
}
