use std::path::PathBuf;

use thiserror::Error;

pub mod export;
pub mod layout;
pub mod table;

pub use export::{
    citation_age_table, citation_results_table, decision_table, overall_average_year,
    with_binary_labels, with_suggested_years,
};
pub use layout::{ColumnLayout, NoteKeys};
pub use table::{RowWriter, Table};

#[derive(Error, Debug)]
pub enum ReportingError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("column {0:?} not found")]
    MissingColumn(String),
}

impl ReportingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReportingError::Io {
            path: path.into(),
            source,
        }
    }
}
