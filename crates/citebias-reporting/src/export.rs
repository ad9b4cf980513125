//! Result tables written by the analysis commands.

use citebias_core::llm::binary_label;
use citebias_core::stats::{
    CitationAgeReport, DecisionTable, PaperYears, YearSummary, join_years, round2,
};
use citebias_core::{FieldValue, Record};
use citebias_parsing::YearExtractor;

use crate::ReportingError;
use crate::table::Table;

/// `filename, extracted_years, average_year` for every paper with at least
/// one year. Papers without years get no row.
pub fn citation_results_table(papers: &[PaperYears]) -> Table {
    let columns = vec![
        "filename".to_string(),
        "extracted_years".to_string(),
        "average_year".to_string(),
    ];
    let rows = papers
        .iter()
        .filter_map(|paper| {
            let average = paper.average_year()?;
            let mut row = Record::new();
            row.insert("filename", paper.filename.as_str());
            row.insert("extracted_years", paper.joined_years());
            row.insert("average_year", average);
            Some(row)
        })
        .collect();
    Table::from_records(columns, rows)
}

/// Mean over every year of every paper, rounded to two decimals.
pub fn overall_average_year(papers: &[PaperYears]) -> Option<f64> {
    let all: Vec<u16> = papers.iter().flat_map(|p| p.years.iter().copied()).collect();
    YearSummary::from_years(&all).map(|s| round2(s.mean))
}

/// Add `output_column` holding the years found anywhere in each row's
/// `response_column`, joined with `", "`.
pub fn with_suggested_years(
    table: &mut Table,
    extractor: &YearExtractor,
    response_column: &str,
    output_column: &str,
) -> Result<(), ReportingError> {
    if !table.has_column(response_column) {
        return Err(ReportingError::MissingColumn(response_column.to_string()));
    }
    table.with_column(output_column, |row| {
        let response = row.get(response_column).map(|v| v.render()).unwrap_or_default();
        let years = extractor.scan_years(&response).to_vec();
        if years.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text(join_years(&years))
        }
    });
    Ok(())
}

/// Add `output_column` with 1 when the response says yes, else 0.
pub fn with_binary_labels(
    table: &mut Table,
    response_column: &str,
    output_column: &str,
) -> Result<(), ReportingError> {
    if !table.has_column(response_column) {
        return Err(ReportingError::MissingColumn(response_column.to_string()));
    }
    table.with_column(output_column, |row| {
        let response = row.get(response_column).map(|v| v.render()).unwrap_or_default();
        FieldValue::Integer(i64::from(binary_label(&response)))
    });
    Ok(())
}

/// One summary row per venue.
pub fn citation_age_table(reports: &[(String, CitationAgeReport)]) -> Table {
    let columns = [
        "venue",
        "venue_year",
        "citations",
        "mean_year",
        "median_year",
        "mean_age",
        "median_age",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();

    let rows = reports
        .iter()
        .map(|(venue, report)| {
            let mut row = Record::new();
            row.insert("venue", venue.as_str());
            row.insert("venue_year", i64::from(report.venue_year));
            row.insert("citations", report.years.count as i64);
            row.insert("mean_year", round2(report.years.mean));
            row.insert("median_year", round2(report.years.median));
            row.insert("mean_age", round2(report.mean_age));
            row.insert("median_age", round2(report.median_age));
            row
        })
        .collect();
    Table::from_records(columns, rows)
}

/// One row per recommending-reviewer count with its acceptance breakdown.
pub fn decision_table(table: &DecisionTable) -> Table {
    let columns = ["recommending", "rejected", "accepted", "total", "acceptance_rate"]
        .iter()
        .map(|c| c.to_string())
        .collect();

    let rows = table
        .rows
        .iter()
        .map(|(recommending, counts)| {
            let mut row = Record::new();
            row.insert("recommending", i64::from(*recommending));
            row.insert("rejected", counts[0] as i64);
            row.insert("accepted", counts[1] as i64);
            row.insert("total", (counts[0] + counts[1]) as i64);
            row.insert("acceptance_rate", round2(DecisionTable::acceptance_rate(counts)));
            row
        })
        .collect();
    Table::from_records(columns, rows)
}
