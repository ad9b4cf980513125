use std::io::Write;
use std::path::Path;

use citebias_core::llm::AnnotationSummary;
use citebias_core::matching::MatchReport;
use citebias_core::stats::{CitationAgeReport, DecisionTable};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Counts reported after a decision merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSummary {
    pub reviews: usize,
    pub matched: usize,
    pub missing_keys: usize,
    pub duplicate_keys: usize,
    pub rejected_notes: usize,
}

fn print_written(w: &mut dyn Write, rows: usize, path: &Path, color: ColorMode) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "Wrote {} rows to {}", rows.bold(), path.display().cyan())
    } else {
        writeln!(w, "Wrote {} rows to {}", rows, path.display())
    }
}

fn print_warning(w: &mut dyn Write, message: &str, color: ColorMode) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", "WARNING:".yellow(), message)
    } else {
        writeln!(w, "WARNING: {}", message)
    }
}

/// Print the result of a JSON-to-CSV conversion.
pub fn print_conversion_summary(
    w: &mut dyn Write,
    rows: usize,
    rejected: usize,
    path: &Path,
    color: ColorMode,
) -> std::io::Result<()> {
    print_written(w, rows, path, color)?;
    if rejected > 0 {
        print_warning(
            w,
            &format!("{} notes did not match the export schema and were left out", rejected),
            color,
        )?;
    }
    Ok(())
}

pub fn print_merge_summary(
    w: &mut dyn Write,
    summary: &MergeSummary,
    path: &Path,
    color: ColorMode,
) -> std::io::Result<()> {
    let unmatched = summary.reviews - summary.matched;
    if color.enabled() {
        writeln!(
            w,
            "{} reviews: {} with a decision, {} without",
            summary.reviews,
            summary.matched.green(),
            unmatched.yellow()
        )?;
    } else {
        writeln!(
            w,
            "{} reviews: {} with a decision, {} without",
            summary.reviews, summary.matched, unmatched
        )?;
    }
    if summary.duplicate_keys > 0 {
        print_warning(
            w,
            &format!(
                "{} later decisions for an already-decided submission were ignored",
                summary.duplicate_keys
            ),
            color,
        )?;
    }
    if summary.missing_keys > 0 {
        print_warning(
            w,
            &format!("{} notes had no submission id", summary.missing_keys),
            color,
        )?;
    }
    if summary.rejected_notes > 0 {
        print_warning(
            w,
            &format!("{} notes did not match the export schema", summary.rejected_notes),
            color,
        )?;
    }
    print_written(w, summary.reviews, path, color)
}

/// Print the per-paper citation year summary.
pub fn print_year_summary(
    w: &mut dyn Write,
    files: usize,
    papers_with_years: usize,
    overall_average: Option<f64>,
    path: &Path,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(
        w,
        "Processed {} files, {} with a references section and years",
        files, papers_with_years
    )?;
    match overall_average {
        Some(avg) if color.enabled() => {
            writeln!(w, "Overall average citation year: {}", format!("{:.2}", avg).bold())?
        }
        Some(avg) => writeln!(w, "Overall average citation year: {:.2}", avg)?,
        None => print_warning(w, "no citation years found", color)?,
    }
    print_written(w, papers_with_years, path, color)
}

pub fn print_age_report(
    w: &mut dyn Write,
    venue: &str,
    report: &CitationAgeReport,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} ({})", venue.bold(), report.venue_year)?;
    } else {
        writeln!(w, "{} ({})", venue, report.venue_year)?;
    }
    writeln!(w, "  Citations:   {}", report.years.count)?;
    writeln!(
        w,
        "  Year:        mean {:.1}, median {:.1}",
        report.years.mean, report.years.median
    )?;
    writeln!(
        w,
        "  Age (years): mean {:.1}, median {:.1}",
        report.mean_age, report.median_age
    )?;
    Ok(())
}

pub fn print_annotation_summary(
    w: &mut dyn Write,
    summary: &AnnotationSummary,
    path: &Path,
    color: ColorMode,
) -> std::io::Result<()> {
    let ok = summary.annotated - summary.failed;
    if color.enabled() {
        writeln!(
            w,
            "Annotated {} rows ({} answered, {} failed)",
            summary.annotated,
            ok.green(),
            summary.failed.red()
        )?;
    } else {
        writeln!(
            w,
            "Annotated {} rows ({} answered, {} failed)",
            summary.annotated, ok, summary.failed
        )?;
    }
    if summary.already_done > 0 {
        writeln!(w, "Skipped {} rows already in {}", summary.already_done, path.display())?;
    }
    if summary.missing_id > 0 {
        print_warning(w, &format!("{} rows had no id", summary.missing_id), color)?;
    }
    if summary.failed > 0 {
        writeln!(w, "Rerun with --retry-failed to ask again for the failed rows")?;
    }
    if summary.cancelled {
        print_warning(
            w,
            &format!(
                "interrupted with {} rows left; rerun the same command to resume",
                summary.not_reached
            ),
            color,
        )?;
    }
    Ok(())
}

pub fn print_retry_summary(
    w: &mut dyn Write,
    recovered: usize,
    still_failed: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(
            w,
            "Recovered {} rows, {} still failed",
            recovered.green(),
            still_failed.red()
        )
    } else {
        writeln!(w, "Recovered {} rows, {} still failed", recovered, still_failed)
    }
}

pub fn print_match_report(
    w: &mut dyn Write,
    report: &MatchReport,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(
            w,
            "Matched: {} / {} ({})",
            report.matched_count().bold(),
            report.total,
            format!("{:.2}%", report.percentage()).bold()
        )?;
    } else {
        writeln!(
            w,
            "Matched: {} / {} ({:.2}%)",
            report.matched_count(),
            report.total,
            report.percentage()
        )?;
    }
    writeln!(w)?;
    writeln!(w, "Matched Titles:")?;
    for (key, title) in &report.matched {
        if color.enabled() {
            writeln!(w, "- {}: {}", key.dimmed(), title)?;
        } else {
            writeln!(w, "- {}: {}", key, title)?;
        }
    }
    Ok(())
}

/// Print acceptance counts per number of recommending reviewers and the
/// chi-square statistic of the table.
pub fn print_decision_table(
    w: &mut dyn Write,
    table: &DecisionTable,
    skipped: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w, "{:>12} {:>9} {:>9} {:>9}", "recommending", "rejected", "accepted", "rate")?;
    for (recommending, counts) in &table.rows {
        writeln!(
            w,
            "{:>12} {:>9} {:>9} {:>8.1}%",
            recommending,
            counts[0],
            counts[1],
            DecisionTable::acceptance_rate(counts)
        )?;
    }
    writeln!(w, "{} submissions", table.total())?;
    match table.chi_square() {
        Some(chi) => {
            let note = if chi.corrected { ", Yates-corrected" } else { "" };
            if color.enabled() {
                writeln!(
                    w,
                    "Chi-square: {} (dof {}{})",
                    format!("{:.4}", chi.statistic).bold(),
                    chi.dof,
                    note
                )?;
            } else {
                writeln!(w, "Chi-square: {:.4} (dof {}{})", chi.statistic, chi.dof, note)?;
            }
        }
        None => print_warning(w, "table too sparse for a chi-square test", color)?,
    }
    if skipped > 0 {
        print_warning(
            w,
            &format!("{} submissions had no decision or recommendation count", skipped),
            color,
        )?;
    }
    Ok(())
}

pub fn print_skipped_file(
    w: &mut dyn Write,
    path: &Path,
    reason: &str,
    color: ColorMode,
) -> std::io::Result<()> {
    print_warning(w, &format!("skipping {}: {}", path.display(), reason), color)
}
