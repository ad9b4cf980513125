//! Year summaries and citation ages.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Count, mean and median of a list of years.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
}

impl YearSummary {
    /// `None` for an empty list.
    pub fn from_years(years: &[u16]) -> Option<Self> {
        summarize(years.iter().map(|&y| f64::from(y)).collect())
    }
}

fn summarize(mut values: Vec<f64>) -> Option<YearSummary> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 0 {
        (values[count / 2 - 1] + values[count / 2]) / 2.0
    } else {
        values[count / 2]
    };
    Some(YearSummary {
        count,
        mean,
        median,
    })
}

/// Age of each citation relative to the venue year. Citations newer than the
/// venue (preprints of later versions) come out negative.
pub fn citation_ages(venue_year: u16, years: &[u16]) -> Vec<i32> {
    years
        .iter()
        .map(|&y| i32::from(venue_year) - i32::from(y))
        .collect()
}

/// Year and age summaries for one venue.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationAgeReport {
    pub venue_year: u16,
    pub years: YearSummary,
    /// Mean and median citation age in years.
    pub mean_age: f64,
    pub median_age: f64,
}

impl CitationAgeReport {
    pub fn new(venue_year: u16, years: &[u16]) -> Option<Self> {
        let summary = YearSummary::from_years(years)?;
        let ages = summarize(
            citation_ages(venue_year, years)
                .into_iter()
                .map(f64::from)
                .collect(),
        )?;
        Some(Self {
            venue_year,
            years: summary,
            mean_age: ages.mean,
            median_age: ages.median,
        })
    }
}

/// Extracted years of one paper, as written to the citation results table.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperYears {
    pub filename: String,
    pub years: Vec<u16>,
}

impl PaperYears {
    pub fn new(filename: impl Into<String>, years: Vec<u16>) -> Self {
        Self {
            filename: filename.into(),
            years,
        }
    }

    /// Mean year rounded to two decimals; `None` when no years were found.
    pub fn average_year(&self) -> Option<f64> {
        YearSummary::from_years(&self.years).map(|s| round2(s.mean))
    }

    pub fn joined_years(&self) -> String {
        join_years(&self.years)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `[2019, 2020]` → `"2019, 2020"`.
pub fn join_years(years: &[u16]) -> String {
    years
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a `", "`-joined year list back. Tokens that are not years are
/// skipped; a cell holding the absent sentinel parses as empty.
pub fn parse_year_list(cell: &str) -> Vec<u16> {
    cell.split(',')
        .filter_map(|part| part.trim().parse::<u16>().ok())
        .filter(|y| (1900..=2099).contains(y))
        .collect()
}

/// The venue year written in a label or file name, e.g. `NeurIPS2024` or
/// `citation_results_iclr_2023.csv`.
pub fn venue_year_from_name(name: &str) -> Option<u16> {
    static VENUE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:19|20)\d{2}").unwrap());
    VENUE_YEAR
        .find_iter(name)
        .find(|m| {
            let before = name[..m.start()].chars().next_back();
            let after = name[m.end()..].chars().next();
            !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
        })
        .and_then(|m| m.as_str().parse().ok())
}

/// A seeded Fisher-Yates shuffle; the same seed always gives the same order.
pub fn shuffle_rows<T>(rows: &mut [T], seed: u64) {
    let mut rng = fastrand::Rng::with_seed(seed);
    rng.shuffle(rows);
}

/// Percentage of `matched` over `total`, `0.0` when `total` is zero.
pub fn match_rate(matched: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64 * 100.0
    }
}

/// Whether a decision string counts as an acceptance (`Accept (poster)`,
/// `accept-oral`, ...).
pub fn is_accept(decision: &str) -> bool {
    decision.to_lowercase().contains("accept")
}

/// Submissions counted by how many reviewers recommended literature and by
/// whether they were accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionTable {
    /// `(reviewers recommending, [rejected, accepted])`, ascending by count.
    pub rows: Vec<(u32, [u64; 2])>,
}

/// Pearson's chi-square test of independence over a contingency table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquare {
    pub statistic: f64,
    pub dof: usize,
    /// Whether Yates' continuity correction was applied (one degree of freedom).
    pub corrected: bool,
}

impl DecisionTable {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, bool)>,
    {
        let mut counts: BTreeMap<u32, [u64; 2]> = BTreeMap::new();
        for (recommending, accepted) in pairs {
            counts.entry(recommending).or_default()[usize::from(accepted)] += 1;
        }
        Self {
            rows: counts.into_iter().collect(),
        }
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().map(|(_, c)| c[0] + c[1]).sum()
    }

    /// Accepted share of the row, in percent.
    pub fn acceptance_rate(counts: &[u64; 2]) -> f64 {
        let total = counts[0] + counts[1];
        if total == 0 {
            0.0
        } else {
            counts[1] as f64 / total as f64 * 100.0
        }
    }

    /// `None` when the table has fewer than two rows or a column is empty,
    /// since expected counts would then be zero.
    pub fn chi_square(&self) -> Option<ChiSquare> {
        let n = self.total() as f64;
        let columns = [0, 1].map(|j| self.rows.iter().map(|(_, c)| c[j]).sum::<u64>() as f64);
        if self.rows.len() < 2 || columns.contains(&0.0) {
            return None;
        }
        let dof = self.rows.len() - 1;
        let corrected = dof == 1;

        let mut statistic = 0.0;
        for (_, counts) in &self.rows {
            let row_total = (counts[0] + counts[1]) as f64;
            for (j, &observed) in counts.iter().enumerate() {
                let expected = row_total * columns[j] / n;
                let mut diff = (observed as f64 - expected).abs();
                if corrected {
                    diff = (diff - 0.5).max(0.0);
                }
                statistic += diff * diff / expected;
            }
        }
        Some(ChiSquare {
            statistic,
            dof,
            corrected,
        })
    }
}
