use std::ops::RangeInclusive;

use regex::Regex;

/// Controls how a list of values is overridden from its defaults.
#[derive(Debug, Clone, Default)]
pub enum ListOverride<T> {
    /// Use the built-in defaults.
    #[default]
    Default,
    /// Completely replace the defaults with these values.
    Replace(Vec<T>),
    /// Append these values to the defaults.
    Extend(Vec<T>),
}

impl<T: Clone> ListOverride<T> {
    /// Resolve this override against the given defaults.
    pub fn resolve(&self, defaults: &[T]) -> Vec<T> {
        match self {
            ListOverride::Default => defaults.to_vec(),
            ListOverride::Replace(v) => v.clone(),
            ListOverride::Extend(v) => {
                let mut result = defaults.to_vec();
                result.extend(v.iter().cloned());
                result
            }
        }
    }
}

/// Headings that close a references section.
pub const DEFAULT_END_MARKERS: &[&str] = &[
    "appendix",
    "appendices",
    "acknowledgments",
    "acknowledgements",
    "acknowledgment",
    "acknowledgement",
    "supplementary material",
    "supplementary materials",
    "neurips paper checklist",
    "paper checklist",
    "checklist",
];

/// Years accepted in bare four-digit form by default.
pub const DEFAULT_FULL_YEAR_RANGE: RangeInclusive<u16> = 1900..=2025;

/// Two-digit apostrophe years above this map to 19YY, others to 20YY.
pub const DEFAULT_APOSTROPHE_PIVOT: u8 = 24;

/// Normalized years never leave this range.
pub const YEAR_BOUNDS: RangeInclusive<u16> = 1900..=2099;

/// Configuration for references-section location and year extraction.
///
/// Regex fields are `Option<Regex>`: `None` means "use the built-in default".
/// Use [`ParsingConfigBuilder`] to construct with string patterns.
#[derive(Debug, Clone)]
pub struct ParsingConfig {
    /// Regex matching a references heading; the last match wins.
    pub(crate) section_header_re: Option<Regex>,
    /// Regex matching the first heading after the references section.
    pub(crate) section_end_re: Option<Regex>,
    pub(crate) full_year_range: RangeInclusive<u16>,
    pub(crate) apostrophe_pivot: u8,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            section_header_re: None,
            section_end_re: None,
            full_year_range: DEFAULT_FULL_YEAR_RANGE,
            apostrophe_pivot: DEFAULT_APOSTROPHE_PIVOT,
        }
    }
}

impl ParsingConfig {
    pub fn full_year_range(&self) -> &RangeInclusive<u16> {
        &self.full_year_range
    }

    pub fn apostrophe_pivot(&self) -> u8 {
        self.apostrophe_pivot
    }
}

/// Build the end-of-section regex for a list of heading words.
///
/// Each marker is matched case-insensitively at the start of a line,
/// optionally behind an appendix label such as `A`, `B.1` or `7.`.
pub fn end_marker_regex<S: AsRef<str>>(markers: &[S]) -> Result<Regex, regex::Error> {
    let alternatives: Vec<String> = markers
        .iter()
        .map(|m| {
            m.as_ref()
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .filter(|m| !m.is_empty())
        .collect();
    if alternatives.is_empty() {
        // Matches nothing: the section runs to the end of the text.
        return Regex::new(r"\b\B");
    }
    Regex::new(&format!(
        r"(?im)^[ \t]*(?:(?:[A-Z]|\d+)(?:\.\d+)*\.?[ \t]+)?(?:{})\b",
        alternatives.join("|")
    ))
}

/// Builder for [`ParsingConfig`].
///
/// Accepts string patterns that are compiled to `Regex` in [`build()`](Self::build).
/// Fails fast with `regex::Error` if any pattern is invalid.
#[derive(Debug, Clone, Default)]
pub struct ParsingConfigBuilder {
    section_header_re: Option<String>,
    section_end_re: Option<String>,
    end_markers: ListOverride<String>,
    full_year_range: Option<(u16, u16)>,
    apostrophe_pivot: Option<u8>,
}

impl ParsingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Section header / end ──

    pub fn section_header_regex(mut self, pattern: &str) -> Self {
        self.section_header_re = Some(pattern.to_string());
        self
    }

    /// Replace the end-of-section regex outright; end markers are then ignored.
    pub fn section_end_regex(mut self, pattern: &str) -> Self {
        self.section_end_re = Some(pattern.to_string());
        self
    }

    pub fn set_end_markers(mut self, markers: Vec<String>) -> Self {
        self.end_markers = ListOverride::Replace(markers);
        self
    }

    pub fn add_end_marker(mut self, marker: String) -> Self {
        match &mut self.end_markers {
            ListOverride::Extend(v) => v.push(marker),
            _ => self.end_markers = ListOverride::Extend(vec![marker]),
        }
        self
    }

    // ── Year forms ──

    /// Accepted bare-year range, clamped to 1900..=2099.
    pub fn full_year_range(mut self, min: u16, max: u16) -> Self {
        self.full_year_range = Some((min, max));
        self
    }

    /// Apostrophe pivot, clamped to 0..=99.
    pub fn apostrophe_pivot(mut self, pivot: u8) -> Self {
        self.apostrophe_pivot = Some(pivot);
        self
    }

    /// Compile all string patterns into regexes and produce a [`ParsingConfig`].
    pub fn build(self) -> Result<ParsingConfig, regex::Error> {
        let compile = |opt: Option<String>| -> Result<Option<Regex>, regex::Error> {
            opt.map(|p| Regex::new(&p)).transpose()
        };

        let section_end_re = match (self.section_end_re, &self.end_markers) {
            (Some(pattern), _) => Some(Regex::new(&pattern)?),
            (None, ListOverride::Default) => None,
            (None, markers) => {
                let defaults: Vec<String> =
                    DEFAULT_END_MARKERS.iter().map(|m| m.to_string()).collect();
                Some(end_marker_regex(&markers.resolve(&defaults))?)
            }
        };

        let full_year_range = match self.full_year_range {
            Some((min, max)) => {
                let clamp = |y: u16| y.clamp(*YEAR_BOUNDS.start(), *YEAR_BOUNDS.end());
                clamp(min)..=clamp(max)
            }
            None => DEFAULT_FULL_YEAR_RANGE,
        };

        Ok(ParsingConfig {
            section_header_re: compile(self.section_header_re)?,
            section_end_re,
            full_year_range,
            apostrophe_pivot: self
                .apostrophe_pivot
                .map(|p| p.min(99))
                .unwrap_or(DEFAULT_APOSTROPHE_PIVOT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ParsingConfig::default();
        assert_eq!(config.full_year_range, 1900..=2025);
        assert_eq!(config.apostrophe_pivot, 24);
        assert!(config.section_header_re.is_none());
        assert!(config.section_end_re.is_none());
    }

    #[test]
    fn test_builder_scalars_are_clamped() {
        let config = ParsingConfigBuilder::new()
            .full_year_range(1800, 2200)
            .apostrophe_pivot(150)
            .build()
            .unwrap();
        assert_eq!(config.full_year_range, 1900..=2099);
        assert_eq!(config.apostrophe_pivot, 99);
    }

    #[test]
    fn test_builder_custom_regex() {
        let config = ParsingConfigBuilder::new()
            .section_header_regex(r"(?im)^\s*Literatur\s*$")
            .build()
            .unwrap();
        assert!(config.section_header_re.is_some());
    }

    #[test]
    fn test_builder_rejects_invalid_regex() {
        assert!(
            ParsingConfigBuilder::new()
                .section_header_regex("(unclosed")
                .build()
                .is_err()
        );
        assert!(
            ParsingConfigBuilder::new()
                .section_end_regex("[z-a]")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_end_markers_extend_defaults() {
        let config = ParsingConfigBuilder::new()
            .add_end_marker("Ethics Statement".to_string())
            .build()
            .unwrap();
        let re = config.section_end_re.unwrap();
        assert!(re.is_match("Ethics   Statement\n"));
        assert!(re.is_match("A Appendix\n"));
    }

    #[test]
    fn test_end_markers_replace() {
        let config = ParsingConfigBuilder::new()
            .set_end_markers(vec!["Anhang".to_string()])
            .build()
            .unwrap();
        let re = config.section_end_re.unwrap();
        assert!(re.is_match("Anhang"));
        assert!(!re.is_match("Appendix"));
    }

    #[test]
    fn test_end_marker_regex_shapes() {
        let re = end_marker_regex(DEFAULT_END_MARKERS).unwrap();
        assert!(re.is_match("Acknowledgments\nWe thank"));
        assert!(re.is_match("B.1 Supplementary Material"));
        assert!(re.is_match("7. Appendix"));
        assert!(re.is_match("NeurIPS Paper Checklist"));
        assert!(!re.is_match("see the appendix of [3]"));

        let never = end_marker_regex::<&str>(&[]).unwrap();
        assert!(!never.is_match("Appendix"));
    }

    #[test]
    fn test_list_override_resolve() {
        let defaults = ["a".to_string()];
        assert_eq!(ListOverride::Default.resolve(&defaults), vec!["a"]);
        assert_eq!(
            ListOverride::Extend(vec!["b".to_string()]).resolve(&defaults),
            vec!["a", "b"]
        );
        assert_eq!(
            ListOverride::Replace(vec!["c".to_string()]).resolve(&defaults),
            vec!["c"]
        );
    }
}
