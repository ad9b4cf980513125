use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub mod config_file;
pub mod keys;
pub mod llm;
pub mod matching;
pub mod merge;
pub mod record;
pub mod retry;
pub mod source;
pub mod stats;

// Re-export for convenience
pub use keys::{JoinKey, KeyError, KeyRule};
pub use llm::{CompletionBackend, LlmError};
pub use merge::{MergeDiagnostic, MergeOptions, MergeOutcome, MergedRecord, Side, merge};
pub use record::{ABSENT_SENTINEL, FieldValue, Record};
pub use retry::{RetryOutcome, RetryPolicy, complete_with_retry};
pub use source::{LoadedNotes, NoteV1, NoteV2, ReviewNote, load_notes};

/// How a year was written in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YearForm {
    /// A bare four-digit year such as `2020`, `(2020)` or `2020a`.
    FullYear,
    /// A two-digit year after an apostrophe, such as `'99`.
    ApostropheYear,
    /// The leading digits of a new-style arXiv identifier (`arXiv:2205.01234`).
    ArxivCompressed,
}

/// A publication year recognized in document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearToken {
    /// The matched text, including any arXiv prefix or apostrophe.
    pub raw_match: String,
    pub form: YearForm,
    /// Always within 1900..=2099.
    pub normalized_year: u16,
    /// Byte offset of the match in the original text.
    pub offset: usize,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("join key error: {0}")]
    Key(#[from] KeyError),
    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Settings for the chat-completion endpoint used to annotate reviews.
#[derive(Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_token: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_prompt: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("system_prompt", &self.system_prompt)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:1234/v1/chat/completions".to_string(),
            model: "gemma-2b-it".to_string(),
            api_token: None,
            max_tokens: None,
            temperature: None,
            system_prompt: "You are a helpful assistant.".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Configuration handed to each pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub retry: RetryPolicy,
    pub llm: LlmConfig,
}

impl Config {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            ..Self::default()
        }
    }
}
