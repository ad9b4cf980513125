use std::ops::RangeInclusive;

use once_cell::sync::Lazy;
use regex::{CaptureMatches, Captures, Regex};

use citebias_core::{YearForm, YearToken};

use crate::config::ParsingConfig;
use crate::section::locate_section;

/// Year-like tokens. Alternatives are tried in order at each position, so an
/// arXiv prefix claims its digits before the full-year branch can.
static YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?: \b(?i:arxiv)(?: :\s? | \x20 ) | abs/ | /pdf/ )
            (?P<arxiv_yy>[0-9]{2})(?P<arxiv_mm>0[1-9]|1[0-2])\b
        | ['\x{2019}](?P<apos>[0-9]{2})\b
        | \b(?P<full>1[0-9]{3}|20[0-9]{2})[a-z]?\b
        ",
    )
    .unwrap()
});

/// Extracts publication years from document text.
///
/// # Example
///
/// ```
/// use citebias_parsing::YearExtractor;
///
/// let extractor = YearExtractor::new();
/// let years = extractor.extract_years("REFERENCES\nSmith (2020). arXiv:2205.01234");
/// assert_eq!(years.to_vec(), vec![2020, 2022]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct YearExtractor {
    config: ParsingConfig,
}

impl YearExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ParsingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParsingConfig {
        &self.config
    }

    /// Years in the references section of `text`, in order of appearance.
    ///
    /// Without a references marker the sequence is empty.
    pub fn extract_years<'t>(&self, text: &'t str) -> YearSequence<'t> {
        match locate_section(text, &self.config) {
            Some(range) => self.sequence(&text[range.clone()], range.start),
            None => {
                tracing::debug!(len = text.len(), "no references section");
                self.sequence("", 0)
            }
        }
    }

    /// Years anywhere in `text`, with no section lookup.
    pub fn scan_years<'t>(&self, text: &'t str) -> YearSequence<'t> {
        self.sequence(text, 0)
    }

    fn sequence<'t>(&self, section: &'t str, base_offset: usize) -> YearSequence<'t> {
        YearSequence {
            section,
            base_offset,
            full_year_range: self.config.full_year_range.clone(),
            apostrophe_pivot: self.config.apostrophe_pivot,
        }
    }
}

/// [`YearExtractor::extract_years`] with the default configuration.
pub fn extract_years(text: &str) -> YearSequence<'_> {
    YearExtractor::new().extract_years(text)
}

/// [`YearExtractor::scan_years`] with the default configuration.
pub fn scan_years(text: &str) -> YearSequence<'_> {
    YearExtractor::new().scan_years(text)
}

/// The years of one text region.
///
/// Nothing is scanned until iterated; every iteration starts over from the
/// beginning of the region.
#[derive(Debug, Clone)]
pub struct YearSequence<'t> {
    section: &'t str,
    base_offset: usize,
    full_year_range: RangeInclusive<u16>,
    apostrophe_pivot: u8,
}

impl<'t> YearSequence<'t> {
    /// The scanned region.
    pub fn section(&self) -> &'t str {
        self.section
    }

    pub fn tokens(&self) -> YearTokens<'t> {
        YearTokens {
            captures: YEAR_RE.captures_iter(self.section),
            base_offset: self.base_offset,
            full_year_range: self.full_year_range.clone(),
            apostrophe_pivot: self.apostrophe_pivot,
        }
    }

    pub fn iter(&self) -> Years<'t> {
        self.tokens().map(token_year as fn(YearToken) -> u16)
    }

    pub fn to_vec(&self) -> Vec<u16> {
        self.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().next().is_none()
    }
}

/// Normalized years of a [`YearSequence`].
pub type Years<'t> = std::iter::Map<YearTokens<'t>, fn(YearToken) -> u16>;

fn token_year(token: YearToken) -> u16 {
    token.normalized_year
}

impl<'t> IntoIterator for &YearSequence<'t> {
    type Item = u16;
    type IntoIter = Years<'t>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Recognized year tokens, left to right.
pub struct YearTokens<'t> {
    captures: CaptureMatches<'static, 't>,
    base_offset: usize,
    full_year_range: RangeInclusive<u16>,
    apostrophe_pivot: u8,
}

impl std::fmt::Debug for YearTokens<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YearTokens")
            .field("base_offset", &self.base_offset)
            .finish_non_exhaustive()
    }
}

impl Iterator for YearTokens<'_> {
    type Item = YearToken;

    fn next(&mut self) -> Option<YearToken> {
        loop {
            let caps = self.captures.next()?;
            if let Some(token) = self.classify(&caps) {
                return Some(token);
            }
        }
    }
}

impl YearTokens<'_> {
    fn classify(&self, caps: &Captures<'_>) -> Option<YearToken> {
        let whole = caps.get(0)?;
        let (form, normalized_year) = if let Some(yy) = caps.name("arxiv_yy") {
            (YearForm::ArxivCompressed, 2000 + two_digits(yy.as_str())?)
        } else if let Some(yy) = caps.name("apos") {
            let yy = two_digits(yy.as_str())?;
            let century = if yy > u16::from(self.apostrophe_pivot) {
                1900
            } else {
                2000
            };
            (YearForm::ApostropheYear, century + yy)
        } else {
            let year: u16 = caps.name("full")?.as_str().parse().ok()?;
            if !self.full_year_range.contains(&year) {
                return None;
            }
            (YearForm::FullYear, year)
        };

        Some(YearToken {
            raw_match: whole.as_str().to_string(),
            form,
            normalized_year,
            offset: self.base_offset + whole.start(),
        })
    }
}

fn two_digits(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|n| *n < 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParsingConfigBuilder;

    // ── Section handling ──

    #[test]
    fn test_no_marker_is_empty() {
        let years = extract_years("Smith et al. (2020) showed this in 2019.");
        assert!(years.is_empty());
        assert_eq!(years.to_vec(), Vec::<u16>::new());
        assert!(extract_years("").is_empty());
    }

    #[test]
    fn test_inline_mixed_case_marker() {
        let years =
            extract_years("... end of conclusion. References Smith et al. (2020). arXiv:2205.01234");
        assert_eq!(years.to_vec(), vec![2020, 2022]);
    }

    #[test]
    fn test_parenthesized_then_arxiv() {
        let years = extract_years("REFERENCES\nSmith et al. (2020). Title. arXiv:2205.01234");
        assert_eq!(years.to_vec(), vec![2020, 2022]);
    }

    #[test]
    fn test_body_years_are_ignored() {
        let text = "In 2015 we ran the study.\nReferences\nLee, 2018.\nAppendix\nTable 2021\n";
        assert_eq!(extract_years(text).to_vec(), vec![2018]);
    }

    #[test]
    fn test_offsets_point_into_original_text() {
        let text = "Intro 1999.\nREFERENCES\nDoe 2017a. Roe '99.";
        let tokens: Vec<_> = extract_years(text).tokens().collect();
        assert_eq!(tokens.len(), 2);
        for token in &tokens {
            assert_eq!(&text[token.offset..token.offset + token.raw_match.len()], token.raw_match);
        }
        assert_eq!(tokens[0].raw_match, "2017a");
        assert_eq!(tokens[1].form, YearForm::ApostropheYear);
    }

    #[test]
    fn test_sequence_is_restartable() {
        let years = extract_years("References\nA 2001. B 2002. A 2001.");
        let first: Vec<u16> = years.iter().collect();
        let second: Vec<u16> = (&years).into_iter().collect();
        assert_eq!(first, vec![2001, 2002, 2001]);
        assert_eq!(first, second);
    }

    // ── Year forms ──

    #[test]
    fn test_apostrophe_years() {
        assert_eq!(scan_years("work from '99").to_vec(), vec![1999]);
        assert_eq!(scan_years("survey from '15").to_vec(), vec![2015]);
        assert_eq!(scan_years("NeurIPS \u{2019}24 and ICML '25").to_vec(), vec![2024, 1925]);
        assert_eq!(
            extract_years("REFERENCES\nwork from '99; survey from '15").to_vec(),
            vec![1999, 2015]
        );
    }

    #[test]
    fn test_arxiv_forms() {
        let years = scan_years(
            "arXiv:2205.01234 arXiv 1912.00001 arxiv: 2101.1 https://arxiv.org/abs/1706.03762 https://arxiv.org/pdf/2303.08774",
        );
        assert_eq!(years.to_vec(), vec![2022, 2019, 2021, 2017, 2023]);
        assert!(years.tokens().all(|t| t.form == YearForm::ArxivCompressed));
    }

    #[test]
    fn test_arxiv_with_bad_month_falls_back_to_full_year() {
        let tokens: Vec<_> = scan_years("In arXiv 2019, preprint").tokens().collect();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].form, YearForm::FullYear);
        assert_eq!(tokens[0].normalized_year, 2019);
    }

    #[test]
    fn test_full_year_shapes_and_range() {
        assert_eq!(
            scan_years("(2020) 2020a 1899 2026 1900 pp. 1234-1250 12020").to_vec(),
            vec![2020, 2020, 1900]
        );
    }

    #[test]
    fn test_no_dedup_no_sort() {
        assert_eq!(scan_years("2010 2005 2010").to_vec(), vec![2010, 2005, 2010]);
    }

    #[test]
    fn test_custom_range_and_pivot() {
        let config = ParsingConfigBuilder::new()
            .full_year_range(1950, 2030)
            .apostrophe_pivot(30)
            .build()
            .unwrap();
        let extractor = YearExtractor::with_config(config);
        assert_eq!(
            extractor.scan_years("1940 2028 '27 '31").to_vec(),
            vec![2028, 2027, 1931]
        );
    }

    // ── Robustness ──

    #[test]
    fn test_non_ascii_and_odd_input() {
        let text = "Références\nREFERENCES\n«Über» - Łukasz ’19, 東京 2016, ٢٠٢٠ '٢٠ '\n'";
        assert_eq!(extract_years(text).to_vec(), vec![2019, 2016]);
        assert!(scan_years("''''''").is_empty());
        assert!(scan_years("arXiv:").is_empty());
    }
}
