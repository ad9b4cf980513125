use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod config;
pub mod section;
pub mod years;

pub use config::{ListOverride, ParsingConfig, ParsingConfigBuilder};
pub use section::{find_references_section, find_references_section_with_config};
pub use years::{YearExtractor, YearSequence, YearTokens, extract_years, scan_years};
// Re-export domain types from core (canonical definitions live there)
pub use citebias_core::{YearForm, YearToken};

#[derive(Error, Debug)]
pub enum ParsingError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read a plain-text document and extract the years of its references section.
///
/// Invalid UTF-8 is replaced rather than rejected, since text dumped from
/// PDFs regularly contains stray bytes.
pub fn extract_years_from_path(path: &Path) -> Result<Vec<u16>, ParsingError> {
    extract_years_from_path_with(path, &YearExtractor::new())
}

/// [`extract_years_from_path`] with a caller-supplied extractor.
pub fn extract_years_from_path_with(
    path: &Path,
    extractor: &YearExtractor,
) -> Result<Vec<u16>, ParsingError> {
    let bytes = std::fs::read(path).map_err(|source| ParsingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let years = extractor.extract_years(&text).to_vec();
    tracing::debug!(path = %path.display(), count = years.len(), "extracted years");
    Ok(years)
}
