//! Chat-completion backends used to annotate review text.

pub mod annotate;
pub mod chat;
pub mod mock;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub use annotate::{
    AnnotationEvent, AnnotationSettings, AnnotationSummary, FAILED_RESPONSE, annotate_rows,
    build_context,
};
pub use chat::ChatCompletionBackend;

/// Error from a single completion request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("rate limited (429){}", fmt_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}{}", fmt_retry_after(.retry_after))]
    Server {
        status: u16,
        retry_after: Option<Duration>,
    },
    #[error("transport error: {message}")]
    Transport { message: String, transient: bool },
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed completion: {0}")]
    Malformed(String),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Server { .. } => true,
            LlmError::Transport { transient, .. } => *transient,
            LlmError::Rejected { .. } | LlmError::Malformed(_) => false,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } | LlmError::Server { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return LlmError::Malformed(e.to_string());
        }
        LlmError::Transport {
            transient: e.is_timeout() || e.is_connect() || e.is_request(),
            message: e.to_string(),
        }
    }
}

/// A service that answers a question about a piece of context.
pub trait CompletionBackend: Send + Sync {
    /// Short name used in logs, e.g. the model id.
    fn name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        context: &'a str,
        question: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;
}

/// `1` when the response contains "yes" (case-insensitive), else `0`.
pub fn binary_label(response: &str) -> u8 {
    u8::from(response.to_lowercase().contains("yes"))
}

/// The questions asked about each review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPreset {
    A,
    B,
    C,
    D,
    E,
    /// Missing literature or missing baselines, answered with a leading yes/no.
    MissingLiterature,
    /// Extract the titles of the papers a review recommends.
    RecommendedTitles,
}

impl PromptPreset {
    pub const ALL: [PromptPreset; 7] = [
        PromptPreset::A,
        PromptPreset::B,
        PromptPreset::C,
        PromptPreset::D,
        PromptPreset::E,
        PromptPreset::MissingLiterature,
        PromptPreset::RecommendedTitles,
    ];

    pub fn question(self) -> &'static str {
        match self {
            PromptPreset::A => {
                "Does this peer review explicitly suggest the authors of the paper to cite any \
                 specific literature?"
            }
            PromptPreset::B => {
                "Does this peer review suggest the authors of the paper to refer to any other \
                 literature?"
            }
            PromptPreset::C => {
                "Does this peer review suggest the authors of the paper to refer to any other \
                 additional literature? Answer yes or no at the beginning."
            }
            PromptPreset::D => {
                "Does this peer review suggest the authors of the paper to refer to specific \
                 literature that are not already discussed in the original paper?"
            }
            PromptPreset::E => {
                "Does this peer review suggest the authors of the paper to refer to specific \
                 literature that are not already discussed in the original paper? Note that \
                 sometimes the reviewers mention some literature in their reviews but those \
                 could be already included in the original paper."
            }
            PromptPreset::MissingLiterature => {
                "Does this peer review explicitly say the paper is missing relevant literature? \
                 Or should the paper compare to relevant baselines/benchmarks? \n \
                 Answer with yes or no at the very beginning, and give brief explanation."
            }
            PromptPreset::RecommendedTitles => {
                "Extract paper titles suggested by the reviewers from the text. Sometimes they \
                 exist in the form of links. If titles do not directly exist, extract author \
                 and year information, but only do so when the titles are not directly \
                 available. Do not give me extra text including punctuation and numbering."
            }
        }
    }

    /// Short column-friendly label.
    pub fn label(self) -> &'static str {
        match self {
            PromptPreset::A => "A",
            PromptPreset::B => "B",
            PromptPreset::C => "C",
            PromptPreset::D => "D",
            PromptPreset::E => "E",
            PromptPreset::MissingLiterature => "missing-literature",
            PromptPreset::RecommendedTitles => "recommended-titles",
        }
    }
}

impl fmt::Display for PromptPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PromptPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "a" => Ok(PromptPreset::A),
            "b" => Ok(PromptPreset::B),
            "c" => Ok(PromptPreset::C),
            "d" => Ok(PromptPreset::D),
            "e" => Ok(PromptPreset::E),
            "missing-literature" => Ok(PromptPreset::MissingLiterature),
            "recommended-titles" => Ok(PromptPreset::RecommendedTitles),
            other => Err(format!(
                "unknown prompt '{}' (expected a-e, missing-literature or recommended-titles)",
                other
            )),
        }
    }
}
