use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{DEFAULT_END_MARKERS, ParsingConfig, end_marker_regex};

/// A line that holds only a references heading, optionally numbered
/// (`References`, `7 References`, `REFERENCES:`, `Bibliography`).
static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:\d+\.?[ \t]*)?(?:references|bibliography)[ \t]*:?[ \t]*\r?$")
        .unwrap()
});

/// The marker run into the surrounding text (`... conclusion. References [1] ...`),
/// as plain-text extraction of two-column layouts often produces it.
static INLINE_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:references|bibliography)\b").unwrap());

static END_RE: Lazy<Regex> = Lazy::new(|| end_marker_regex(DEFAULT_END_MARKERS).unwrap());

/// Locate the references section in the document text.
///
/// The section starts after the first heading line `References` or
/// `Bibliography` (any case). Without one, it starts after the first
/// `references` or `bibliography` word (any case) in running text. It ends at the first following appendix,
/// acknowledgments, supplementary-material or checklist heading, or at the
/// end of the text. Returns `None` when there is no marker.
pub fn find_references_section(text: &str) -> Option<&str> {
    find_references_section_with_config(text, &ParsingConfig::default())
}

/// Config-aware version of [`find_references_section`].
pub fn find_references_section_with_config<'t>(
    text: &'t str,
    config: &ParsingConfig,
) -> Option<&'t str> {
    locate_section(text, config).map(|range| &text[range])
}

/// Byte range of the references section within `text`.
pub(crate) fn locate_section(text: &str, config: &ParsingConfig) -> Option<Range<usize>> {
    let header_re = config.section_header_re.as_ref().unwrap_or(&HEADER_RE);

    // A heading line beats an earlier prose mention. The first heading is
    // the main bibliography; appendices may repeat it.
    let start = match header_re.find(text) {
        Some(m) => m.end(),
        None => {
            let m = INLINE_MARKER_RE.find(text)?;
            tracing::trace!(offset = m.start(), "no references heading, using inline marker");
            m.end()
        }
    };

    let end_re = config.section_end_re.as_ref().unwrap_or(&END_RE);
    let rest = &text[start..];
    let end = end_re
        .find(rest)
        .map(|m| start + m.start())
        .unwrap_or(text.len());

    Some(start..end)
}
