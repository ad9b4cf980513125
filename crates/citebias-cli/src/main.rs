use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use citebias_core::config_file::{self, ConfigFile};
use citebias_core::llm::annotate::{ICLR_CONTEXT_COLUMNS, NEURIPS_CONTEXT_COLUMNS, retry_failed_rows};
use citebias_core::llm::{
    AnnotationEvent, AnnotationSettings, ChatCompletionBackend, FAILED_RESPONSE, PromptPreset,
    annotate_rows,
};
use citebias_core::matching::{match_suggestions, title_from_details};
use citebias_core::merge::merge_with_rules;
use citebias_core::stats::{
    CitationAgeReport, DecisionTable, PaperYears, is_accept, parse_year_list, shuffle_rows,
    venue_year_from_name,
};
use citebias_core::{
    ABSENT_SENTINEL, Config, JoinKey, KeyRule, MergeDiagnostic, MergeOptions, MergeOutcome, NoteV1,
    NoteV2, Record, ReviewNote, load_notes,
};
use citebias_parsing::{YearExtractor, extract_years_from_path_with};
use citebias_reporting::{
    ColumnLayout, ReportingError, RowWriter, Table, citation_age_table, citation_results_table,
    decision_table, overall_average_year, with_binary_labels, with_suggested_years,
};

mod output;

use output::{ColorMode, MergeSummary};

/// Citation-bias analysis for peer reviews: review exports, reference years,
/// model annotation and suggestion matching
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Read settings from this TOML file instead of the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// OpenReview export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Api {
    /// API v1: plain content values, single `invitation`
    V1,
    /// API v2: `{"value": ...}` content values, `invitations` list
    V2,
}

impl Api {
    fn layout(self) -> ColumnLayout {
        match self {
            Api::V1 => ColumnLayout::iclr_api1(),
            Api::V2 => ColumnLayout::neurips_api2(),
        }
    }

    /// Decision fields carried over when `--fields` is not given.
    fn decision_fields(self) -> &'static [&'static str] {
        match self {
            Api::V1 => &[
                "decision",
                "metareview:_summary,_strengths_and_weaknesses",
                "summary_of_AC-reviewer_meeting",
                "justification_for_why_not_higher_score",
                "justification_for_why_not_lower_score",
            ],
            Api::V2 => &["decision", "comment"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Venue {
    Neurips,
    Iclr,
}

impl Venue {
    fn context_columns(self) -> &'static [&'static str] {
        match self {
            Venue::Neurips => NEURIPS_CONTEXT_COLUMNS,
            Venue::Iclr => ICLR_CONTEXT_COLUMNS,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an OpenReview JSON export of reviews into a CSV (or JSON) table
    JsonToCsv {
        /// Path to the JSON export
        input: PathBuf,

        /// Output table (.csv, or .json for a JSON array)
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = Api::V2)]
        api: Api,
    },

    /// Attach each submission's decision to its reviews
    MergeDecisions {
        /// JSON export of the reviews
        #[arg(long)]
        reviews: PathBuf,

        /// JSON export of the decisions
        #[arg(long)]
        decisions: PathBuf,

        /// Output table (.csv, or .json for a JSON array)
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = Api::V2)]
        api: Api,

        /// Comma-separated decision fields to carry over [default: decision and
        /// the metareview fields for v1, decision,comment for v2]
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<String>>,

        /// Carry over every decision field instead of --fields
        #[arg(long, conflicts_with = "fields")]
        all_fields: bool,

        /// Suffix for decision fields whose name is already a review field
        #[arg(long)]
        collision_suffix: Option<String>,
    },

    /// Extract reference years from a directory of extracted paper texts
    CitationYears {
        /// Directory holding one text file per paper
        dir: PathBuf,

        /// Output table
        #[arg(short, long, default_value = "citation_results.csv")]
        output: PathBuf,

        /// Extension of the text files to read
        #[arg(long, default_value = "txt")]
        extension: String,
    },

    /// Add a suggested_years column with the years found in model responses
    SuggestedYears {
        /// Annotated CSV files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Column holding the model response
        #[arg(long, default_value = "response")]
        column: String,

        /// Directory for the extracted_<name> outputs (default: next to each input)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Summarize citation years and ages per venue
    CitationAge {
        /// CSV files, one per venue; the venue year is read from the file name
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Column holding comma-separated years
        #[arg(long, default_value = "suggested_years")]
        column: String,

        /// Venue year for every input, instead of reading it from the file name
        #[arg(long)]
        venue_year: Option<u16>,

        /// Also write the summary table here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ask a chat-completion model a question about every review
    Annotate(AnnotateArgs),

    /// Add a 0/1 column that is 1 when the model response says yes
    Label {
        /// Annotated CSV files, rewritten in place
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Column holding the model response
        #[arg(long, default_value = "response")]
        column: String,

        /// Name of the label column
        #[arg(long, default_value = "binary_label")]
        label_column: String,
    },

    /// Shuffle the rows of a table with a reproducible seed
    Shuffle {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Seed for the shuffle (random when omitted; the seed used is printed)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Cross-tabulate acceptance against the number of reviewers recommending literature
    DecisionTable {
        /// CSV with one decision per submission
        #[arg(long)]
        decisions: PathBuf,

        /// CSV with the number of reviewers recommending literature per submission
        #[arg(long)]
        recommendations: PathBuf,

        /// Decisions column naming the submission
        #[arg(long, default_value = "invitations")]
        decision_key: String,

        /// Decisions column holding the decision
        #[arg(long, default_value = "decision")]
        decision_column: String,

        /// Recommendations column naming the submission
        #[arg(long, default_value = "invitation")]
        recommendation_key: String,

        /// Recommendations column holding the count
        #[arg(long, default_value = "number of reviewers recommending")]
        count_column: String,

        /// Also write the table here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Count submissions that went on to cite a title suggested in their reviews
    MatchSuggestions {
        /// CSV of suggested papers
        #[arg(long)]
        suggestions: PathBuf,

        /// CSV of references cited by each submission
        #[arg(long)]
        references: PathBuf,

        /// Suggestions column naming the submission
        #[arg(long, default_value = "invitation")]
        suggestion_key: String,

        /// Suggestions column with the paper details (or a plain title)
        #[arg(long, default_value = "paper_details")]
        title_column: String,

        /// References column naming the submission
        #[arg(long, default_value = "PDF File")]
        reference_key: String,

        /// References column with the reference text
        #[arg(long, default_value = "Reference")]
        reference_column: String,

        /// Word n-gram size
        #[arg(short = 'n', long, default_value_t = 4)]
        ngram: usize,

        /// Also write the matched submissions here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// Review table (CSV) to annotate
    input: PathBuf,

    /// Output CSV; rows already in it are skipped, so an interrupted run resumes
    #[arg(short, long)]
    output: PathBuf,

    /// Question preset: a-e, missing-literature or recommended-titles
    #[arg(long, default_value = "a")]
    prompt: PromptPreset,

    /// Ask this question instead of the preset
    #[arg(long)]
    question: Option<String>,

    /// Review columns sent as context
    #[arg(long, value_enum, default_value_t = Venue::Neurips)]
    venue: Venue,

    /// Comma-separated context columns, overriding --venue
    #[arg(long, value_delimiter = ',')]
    context_columns: Vec<String>,

    #[arg(long, default_value = "id")]
    id_column: String,

    #[arg(long, default_value = "response")]
    response_column: String,

    /// Re-ask only the rows of --output whose response failed
    #[arg(long)]
    retry_failed: bool,

    /// Milliseconds to wait between requests
    #[arg(long, default_value_t = 0)]
    pause_ms: u64,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// Chat-completion endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Bearer token for the endpoint
    #[arg(long)]
    api_token: Option<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    /// Retries per row on transient failures
    #[arg(long)]
    max_retries: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color = ColorMode(!cli.no_color);
    let config_path = cli.config;

    match cli.command {
        Command::JsonToCsv { input, output, api } => match api {
            Api::V1 => json_to_csv::<NoteV1>(&input, &output, api.layout(), color),
            Api::V2 => json_to_csv::<NoteV2>(&input, &output, api.layout(), color),
        },
        Command::MergeDecisions {
            reviews,
            decisions,
            output,
            api,
            fields,
            all_fields,
            collision_suffix,
        } => {
            let file_config = load_file_config(config_path.as_deref())?;
            let mut options = merge_options(api, fields, all_fields);
            if let Some(suffix) = collision_suffix
                .or_else(|| file_config.collision_suffix().map(str::to_string))
            {
                options.collision_suffix = suffix;
            }
            match api {
                Api::V1 => {
                    merge_decisions::<NoteV1>(&reviews, &decisions, &output, api, &options, color)
                }
                Api::V2 => {
                    merge_decisions::<NoteV2>(&reviews, &decisions, &output, api, &options, color)
                }
            }
        }
        Command::CitationYears {
            dir,
            output,
            extension,
        } => citation_years(&dir, &output, &extension, color),
        Command::SuggestedYears {
            inputs,
            column,
            output_dir,
        } => suggested_years(&inputs, &column, output_dir.as_deref(), color),
        Command::CitationAge {
            inputs,
            column,
            venue_year,
            output,
        } => citation_age(&inputs, &column, venue_year, output.as_deref(), color),
        Command::Annotate(args) => annotate(args, config_path.as_deref(), color).await,
        Command::Label {
            inputs,
            column,
            label_column,
        } => label(&inputs, &column, &label_column, color),
        Command::Shuffle {
            input,
            output,
            seed,
        } => shuffle(&input, &output, seed),
        Command::DecisionTable {
            decisions,
            recommendations,
            decision_key,
            decision_column,
            recommendation_key,
            count_column,
            output,
        } => decision_counts(
            &decisions,
            &KeyRule::submission_number(&decision_key),
            &decision_column,
            &recommendations,
            &KeyRule::submission_number(&recommendation_key),
            &count_column,
            output.as_deref(),
            color,
        ),
        Command::MatchSuggestions {
            suggestions,
            references,
            suggestion_key,
            title_column,
            reference_key,
            reference_column,
            ngram,
            output,
        } => match_titles(
            &suggestions,
            &references,
            &KeyRule::submission_number(&suggestion_key),
            &title_column,
            &KeyRule::submission_number(&reference_key),
            &reference_column,
            ngram,
            output.as_deref(),
            color,
        ),
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose > 1)
        .with_writer(std::io::stderr)
        .init();
}

fn merge_options(api: Api, fields: Option<Vec<String>>, all_fields: bool) -> MergeOptions {
    if all_fields {
        return MergeOptions::default();
    }
    match fields {
        Some(fields) => MergeOptions::with_right_fields(fields),
        None => MergeOptions::with_right_fields(api.decision_fields().iter().copied()),
    }
}

fn load_file_config(path: Option<&Path>) -> anyhow::Result<ConfigFile> {
    match path {
        Some(path) => match config_file::load_from_path(path) {
            Some(config) => Ok(config),
            None => anyhow::bail!("Could not read config file: {}", path.display()),
        },
        None => Ok(config_file::load_config()),
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn write_table(table: &Table, path: &Path) -> anyhow::Result<()> {
    if is_json(path) {
        table.write_json(path)?;
    } else {
        table.write_csv(path)?;
    }
    Ok(())
}

fn read_table(path: &Path) -> anyhow::Result<Table> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    Table::read_csv(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_json(path: &Path) -> anyhow::Result<String> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn json_to_csv<N>(input: &Path, output: &Path, layout: ColumnLayout, color: ColorMode) -> anyhow::Result<()>
where
    N: ReviewNote + DeserializeOwned,
{
    let loaded = load_notes::<N>(&read_json(input)?)
        .with_context(|| format!("Failed to parse {}", input.display()))?;
    let table = layout.tabulate(&loaded.notes);
    write_table(&table, output)?;

    let mut stdout = std::io::stdout().lock();
    output::print_conversion_summary(&mut stdout, table.len(), loaded.rejected.len(), output, color)?;
    Ok(())
}

fn merge_decisions<N>(
    reviews: &Path,
    decisions: &Path,
    output: &Path,
    api: Api,
    options: &MergeOptions,
    color: ColorMode,
) -> anyhow::Result<()>
where
    N: ReviewNote + DeserializeOwned,
{
    let reviews_loaded = load_notes::<N>(&read_json(reviews)?)
        .with_context(|| format!("Failed to parse {}", reviews.display()))?;
    let decisions_loaded = load_notes::<N>(&read_json(decisions)?)
        .with_context(|| format!("Failed to parse {}", decisions.display()))?;

    let rule = N::key_rule();
    let outcome = merge_with_rules(
        &reviews_loaded.records(),
        &decisions_loaded.records(),
        &rule,
        &rule,
        options,
    );

    let mut summary = MergeSummary {
        reviews: outcome.records.len(),
        matched: outcome.matched_count(),
        rejected_notes: reviews_loaded.rejected.len() + decisions_loaded.rejected.len(),
        ..MergeSummary::default()
    };
    for diagnostic in &outcome.diagnostics {
        match diagnostic {
            MergeDiagnostic::MissingKey { .. } => summary.missing_keys += 1,
            MergeDiagnostic::DuplicateKey { .. } => summary.duplicate_keys += 1,
        }
    }

    let table = api.layout().tabulate_merged(&reviews_loaded.notes, outcome);
    write_table(&table, output)?;

    let mut stdout = std::io::stdout().lock();
    output::print_merge_summary(&mut stdout, &summary, output, color)?;
    Ok(())
}

fn citation_years(dir: &Path, output: &Path, extension: &str, color: ColorMode) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();
    if files.is_empty() {
        anyhow::bail!("No .{} files in {}", extension, dir.display());
    }

    let extractor = YearExtractor::new();
    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );

    let mut papers = Vec::with_capacity(files.len());
    let mut skipped = Vec::new();
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        bar.set_message(name.clone());
        match extract_years_from_path_with(path, &extractor) {
            Ok(years) => {
                tracing::debug!(file = %name, years = years.len(), "extracted years");
                papers.push(PaperYears::new(name, years));
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "could not read paper text");
                skipped.push((path.clone(), e.to_string()));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    let table = citation_results_table(&papers);
    write_table(&table, output)?;

    let mut stdout = std::io::stdout().lock();
    for (path, reason) in &skipped {
        output::print_skipped_file(&mut stdout, path, reason, color)?;
    }
    output::print_year_summary(
        &mut stdout,
        files.len(),
        table.len(),
        overall_average_year(&papers),
        output,
        color,
    )?;
    Ok(())
}

fn suggested_years(
    inputs: &[PathBuf],
    column: &str,
    output_dir: Option<&Path>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let extractor = YearExtractor::new();
    let mut stdout = std::io::stdout().lock();

    for input in inputs {
        let mut table = read_table(input)?;
        match with_suggested_years(&mut table, &extractor, column, "suggested_years") {
            Ok(()) => {}
            Err(ReportingError::MissingColumn(col)) => {
                output::print_skipped_file(&mut stdout, input, &format!("no `{}` column", col), color)?;
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        let Some(file_name) = input.file_name() else {
            anyhow::bail!("Not a file: {}", input.display());
        };
        let dir = output_dir
            .map(Path::to_path_buf)
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let out = dir.join(format!("extracted_{}", file_name.to_string_lossy()));
        table.write_csv(&out)?;

        let with_years = table.column_text("suggested_years").filter(|y| !y.is_empty()).count();
        writeln!(
            stdout,
            "{}: {} of {} rows mention a year",
            input.display(),
            with_years,
            table.len()
        )?;
    }
    Ok(())
}

fn citation_age(
    inputs: &[PathBuf],
    column: &str,
    venue_year: Option<u16>,
    output: Option<&Path>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    let mut reports = Vec::with_capacity(inputs.len());

    for input in inputs {
        let venue = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(year) = venue_year.or_else(|| venue_year_from_name(&venue)) else {
            output::print_skipped_file(&mut stdout, input, "no venue year in the file name", color)?;
            continue;
        };

        let table = read_table(input)?;
        if !table.has_column(column) {
            output::print_skipped_file(&mut stdout, input, &format!("no `{}` column", column), color)?;
            continue;
        }
        let years: Vec<u16> = table
            .column_text(column)
            .flat_map(|cell| parse_year_list(&cell))
            .collect();
        let Some(report) = CitationAgeReport::new(year, &years) else {
            output::print_skipped_file(&mut stdout, input, "no years", color)?;
            continue;
        };

        output::print_age_report(&mut stdout, &venue, &report, color)?;
        reports.push((venue, report));
    }

    if let Some(path) = output {
        write_table(&citation_age_table(&reports), path)?;
        writeln!(stdout, "Wrote {} venues to {}", reports.len(), path.display())?;
    }
    Ok(())
}

/// CLI flags, then environment, then the config file, then defaults.
fn resolve_config(args: &AnnotateArgs, file: &ConfigFile) -> Config {
    let mut config = Config::new(&args.input, &args.output);
    config.retry = file.retry_policy();
    config.llm = file.llm_config();

    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    if let Some(endpoint) = args.llm.endpoint.clone().or_else(|| env("CITEBIAS_LLM_ENDPOINT")) {
        config.llm.endpoint = endpoint;
    }
    if let Some(model) = args.llm.model.clone().or_else(|| env("CITEBIAS_LLM_MODEL")) {
        config.llm.model = model;
    }
    if let Some(token) = args.llm.api_token.clone().or_else(|| env("CITEBIAS_LLM_TOKEN")) {
        config.llm.api_token = Some(token);
    }
    if let Some(max_tokens) = args.llm.max_tokens {
        config.llm.max_tokens = Some(max_tokens);
    }
    if let Some(temperature) = args.llm.temperature {
        config.llm.temperature = Some(temperature);
    }
    if let Some(max_retries) = args.llm.max_retries {
        config.retry.max_retries = max_retries;
    }
    config
}

fn annotation_settings(args: &AnnotateArgs, config: &Config) -> AnnotationSettings {
    let question = args
        .question
        .clone()
        .unwrap_or_else(|| args.prompt.question().to_string());
    let mut settings = AnnotationSettings::new(question, args.venue.context_columns());
    if !args.context_columns.is_empty() {
        settings.context_columns = args.context_columns.clone();
    }
    settings.id_column = args.id_column.clone();
    settings.response_column = args.response_column.clone();
    settings.pause = std::time::Duration::from_millis(args.pause_ms);
    settings.retry = config.retry.clone();
    settings
}

fn row_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap()
        .progress_chars("=> "),
    );
    bar
}

async fn annotate(args: AnnotateArgs, config_path: Option<&Path>, color: ColorMode) -> anyhow::Result<()> {
    let file_config = load_file_config(config_path)?;
    let config = resolve_config(&args, &file_config);
    let mut settings = annotation_settings(&args, &config);
    tracing::info!(
        endpoint = %config.llm.endpoint,
        model = %config.llm.model,
        prompt = %args.prompt,
        "annotating"
    );

    let backend = ChatCompletionBackend::new(config.llm.clone())?;

    let cancel = CancellationToken::new();

    // Set up Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    if args.retry_failed {
        let mut table = read_table(&config.output_path)?;
        if !table.has_column(&settings.response_column) {
            anyhow::bail!(
                "{} has no `{}` column",
                config.output_path.display(),
                settings.response_column
            );
        }
        let recovered = retry_failed_rows(&backend, table.rows_mut(), &settings, &cancel).await;
        let still_failed = table
            .column_text(&settings.response_column)
            .filter(|text| text.trim() == FAILED_RESPONSE)
            .count();
        table.write_csv(&config.output_path)?;
        let mut stdout = std::io::stdout().lock();
        output::print_retry_summary(&mut stdout, recovered, still_failed, color)?;
        return Ok(());
    }

    let table = read_table(&config.input_path)?;
    let mut columns = table.columns().to_vec();
    if !columns.contains(&settings.response_column) {
        columns.push(settings.response_column.clone());
    }

    if config.output_path.exists() {
        let done = read_table(&config.output_path)?;
        settings.skip_ids = done
            .column_text(&settings.id_column)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect::<HashSet<_>>();
        if !settings.skip_ids.is_empty() {
            tracing::info!(done = settings.skip_ids.len(), "resuming");
        }
    }

    let mut writer = RowWriter::append(&config.output_path, columns)?;
    let bar = row_bar(table.len());
    let summary = annotate_rows(
        &backend,
        table.rows(),
        &settings,
        &cancel,
        |event: AnnotationEvent<'_>| -> anyhow::Result<()> {
            if let AnnotationEvent::Annotated {
                record, attempts, ..
            } = &event
            {
                if *attempts > 1 {
                    bar.suspend(|| tracing::debug!(attempts, "answered after retries"));
                }
                writer.write_row(record)?;
            }
            bar.inc(1);
            Ok(())
        },
    )
    .await?;
    bar.finish_and_clear();

    let mut stdout = std::io::stdout().lock();
    output::print_annotation_summary(&mut stdout, &summary, &config.output_path, color)?;
    Ok(())
}

fn label(inputs: &[PathBuf], column: &str, label_column: &str, color: ColorMode) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    for input in inputs {
        let mut table = read_table(input)?;
        match with_binary_labels(&mut table, column, label_column) {
            Ok(()) => {}
            Err(ReportingError::MissingColumn(col)) => {
                output::print_skipped_file(&mut stdout, input, &format!("no `{}` column", col), color)?;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        table.write_csv(input)?;

        let yes = table.column_text(label_column).filter(|v| v == "1").count();
        writeln!(
            stdout,
            "{}: {} of {} responses labelled yes",
            input.display(),
            yes,
            table.len()
        )?;
    }
    Ok(())
}

fn shuffle(input: &Path, output: &Path, seed: Option<u64>) -> anyhow::Result<()> {
    let seed = seed.unwrap_or_else(|| fastrand::u64(..));
    let mut table = read_table(input)?;
    shuffle_rows(table.rows_mut(), seed);
    write_table(&table, output)?;
    println!("Shuffled {} rows with seed {} into {}", table.len(), seed, output.display());
    Ok(())
}

/// `(key, text)` pairs from `column`, keyed by `rule`. Rows without a key
/// are dropped; rows with a key but no text keep an empty string so they
/// still count as a submission.
fn keyed_column(
    table: &Table,
    rule: &KeyRule,
    column: &str,
    text: impl Fn(&str) -> Option<String>,
) -> Vec<(JoinKey, String)> {
    table
        .rows()
        .iter()
        .enumerate()
        .filter_map(|(index, row)| match rule.derive(row) {
            Ok(key) => {
                let cell = row.get(column).map(|v| v.render().into_owned()).unwrap_or_default();
                Some((key, text(&cell).unwrap_or_default()))
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "row has no submission key, skipped");
                None
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn match_titles(
    suggestions: &Path,
    references: &Path,
    suggestion_rule: &KeyRule,
    title_column: &str,
    reference_rule: &KeyRule,
    reference_column: &str,
    ngram: usize,
    output: Option<&Path>,
    color: ColorMode,
) -> anyhow::Result<()> {
    if ngram == 0 {
        anyhow::bail!("--ngram must be at least 1");
    }
    let suggestion_table = read_table(suggestions)?;
    let reference_table = read_table(references)?;
    for (table, path, column) in [
        (&suggestion_table, suggestions, title_column),
        (&reference_table, references, reference_column),
    ] {
        if !table.has_column(column) {
            anyhow::bail!("{} has no `{}` column", path.display(), column);
        }
    }

    let titles = keyed_column(&suggestion_table, suggestion_rule, title_column, title_from_details);
    let cited = keyed_column(&reference_table, reference_rule, reference_column, |cell| {
        Some(cell.to_string())
    });
    let report = match_suggestions(&titles, &cited, ngram);

    let mut stdout = std::io::stdout().lock();
    output::print_match_report(&mut stdout, &report, color)?;

    if let Some(path) = output {
        let rows = report
            .matched
            .iter()
            .map(|(key, title)| {
                let mut row = Record::new();
                row.insert("submission_id", key.as_str());
                row.insert("title", title.as_str());
                row
            })
            .collect();
        let table = Table::from_records(vec!["submission_id".into(), "title".into()], rows);
        write_table(&table, path)?;
    }
    Ok(())
}

/// Recommendation count as a whole number; pandas writes `2.0` once a
/// column has held a missing value.
fn parse_count(cell: &str) -> Option<u32> {
    let value: f64 = cell.trim().parse().ok()?;
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX))
        .then_some(value as u32)
}

/// `(count, accepted)` for every merged row with both a decision and a
/// count, plus the number of rows skipped for lacking either.
fn decision_pairs(
    outcome: &MergeOutcome,
    decision_column: &str,
    count_column: &str,
) -> (Vec<(u32, bool)>, usize) {
    let mut pairs = Vec::new();
    let mut skipped = 0;
    for merged in &outcome.records {
        let decision = merged
            .fields
            .get(decision_column)
            .map(|v| v.render().trim().to_string())
            .filter(|d| !d.is_empty() && d != ABSENT_SENTINEL);
        let count = merged
            .fields
            .get(count_column)
            .and_then(|v| parse_count(&v.render()));
        match (merged.matched, decision, count) {
            (true, Some(decision), Some(count)) => pairs.push((count, is_accept(&decision))),
            _ => skipped += 1,
        }
    }
    (pairs, skipped)
}

#[allow(clippy::too_many_arguments)]
fn decision_counts(
    decisions: &Path,
    decision_rule: &KeyRule,
    decision_column: &str,
    recommendations: &Path,
    recommendation_rule: &KeyRule,
    count_column: &str,
    output: Option<&Path>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let decision_rows = read_table(decisions)?;
    let recommendation_rows = read_table(recommendations)?;
    if !decision_rows.has_column(decision_column) {
        anyhow::bail!("{} has no `{}` column", decisions.display(), decision_column);
    }
    if !recommendation_rows.has_column(count_column) {
        anyhow::bail!("{} has no `{}` column", recommendations.display(), count_column);
    }

    let outcome = merge_with_rules(
        decision_rows.rows(),
        recommendation_rows.rows(),
        decision_rule,
        recommendation_rule,
        &MergeOptions::with_right_fields([count_column]),
    );
    // The count column is renamed when the decisions file has one too.
    let merged_count = outcome
        .right_columns
        .first()
        .map(String::as_str)
        .unwrap_or(count_column);
    let (pairs, skipped) = decision_pairs(&outcome, decision_column, merged_count);
    tracing::debug!(rows = pairs.len(), skipped, "decision pairs collected");
    let counts = DecisionTable::from_pairs(pairs);

    let mut stdout = std::io::stdout().lock();
    output::print_decision_table(&mut stdout, &counts, skipped, color)?;

    if let Some(path) = output {
        write_table(&decision_table(&counts), path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    fn parse_merge(extra: &[&str]) -> MergeOptions {
        let mut argv = vec![
            "citebias",
            "merge-decisions",
            "--reviews",
            "r.json",
            "--decisions",
            "d.json",
            "-o",
            "out.csv",
        ];
        argv.extend_from_slice(extra);
        let cli = Cli::parse_from(argv);
        let Command::MergeDecisions {
            api,
            fields,
            all_fields,
            ..
        } = cli.command
        else {
            panic!("expected merge-decisions");
        };
        merge_options(api, fields, all_fields)
    }

    #[test]
    fn merge_fields_default_per_api() {
        let v2 = parse_merge(&[]);
        assert_eq!(v2.right_fields.unwrap(), ["decision", "comment"]);

        let v1 = parse_merge(&["--api", "v1"]).right_fields.unwrap();
        assert_eq!(v1.len(), 5);
        assert_eq!(v1[0], "decision");
        assert!(v1.contains(&"metareview:_summary,_strengths_and_weaknesses".to_string()));
        assert!(!v1.contains(&"comment".to_string()));
    }

    #[test]
    fn merge_fields_flags() {
        let picked = parse_merge(&["--api", "v1", "--fields", "decision,comment"]);
        assert_eq!(picked.right_fields.unwrap(), ["decision", "comment"]);
        assert!(parse_merge(&["--all-fields"]).right_fields.is_none());
    }

    #[test]
    fn annotate_flags_override_config_file() {
        let cli = Cli::parse_from([
            "citebias",
            "-v",
            "annotate",
            "reviews.csv",
            "-o",
            "out.csv",
            "--prompt",
            "missing-literature",
            "--venue",
            "iclr",
            "--model",
            "llama-3",
            "--max-retries",
            "5",
        ]);
        assert_eq!(cli.verbose, 1);
        let Command::Annotate(args) = cli.command else {
            panic!("expected annotate");
        };
        assert_eq!(args.prompt, PromptPreset::MissingLiterature);

        let file: ConfigFile = toml::from_str(
            r#"
            [llm]
            model = "from-file"
            endpoint = "http://example.test/v1/chat/completions"

            [retry]
            max_retries = 1
            "#,
        )
        .unwrap();
        let config = resolve_config(&args, &file);
        assert_eq!(config.llm.model, "llama-3");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.output_path, PathBuf::from("out.csv"));

        let settings = annotation_settings(&args, &config);
        assert_eq!(settings.question, PromptPreset::MissingLiterature.question());
        assert_eq!(
            settings.context_columns,
            ICLR_CONTEXT_COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn keyed_column_keeps_keyed_rows_without_titles() {
        let mut with_title = Record::new();
        with_title.insert("invitation", "NeurIPS.cc/2024/Conference/Submission7/-/Official_Review");
        with_title.insert("paper_details", "{'title': 'Deep Residual Learning', 'year': 2016}");
        let mut without_title = Record::new();
        without_title.insert("invitation", "NeurIPS.cc/2024/Conference/Submission8/-/Official_Review");
        let mut no_key = Record::new();
        no_key.insert("paper_details", "Orphan");
        let table = Table::from_rows(vec![with_title, without_title, no_key]);

        let keyed = keyed_column(
            &table,
            &KeyRule::submission_number("invitation"),
            "paper_details",
            title_from_details,
        );
        assert_eq!(keyed.len(), 2);
        assert_eq!(keyed[0].0.as_str(), "7");
        assert_eq!(keyed[0].1, "Deep Residual Learning");
        assert_eq!(keyed[1].1, "");
    }

    #[test]
    fn decision_pairs_skip_unmatched_and_undecided() {
        let decision = |paper: &str, verdict: Option<&str>| {
            let mut r = Record::new();
            r.insert("invitations", format!("ICLR.cc/2023/Conference/{paper}/-/Decision"));
            if let Some(verdict) = verdict {
                r.insert("decision", verdict);
            }
            r
        };
        let recommended = |paper: &str, count: &str| {
            let mut r = Record::new();
            r.insert("invitation", format!("ICLR.cc/2023/Conference/{paper}/-/Official_Review"));
            r.insert("number of reviewers recommending", count);
            r
        };
        let left = vec![
            decision("Paper1", Some("Accept: poster")),
            decision("Paper2", Some("Reject")),
            decision("Paper3", None),
            decision("Paper4", Some("Accept: notable-top-5%")),
            decision("Paper5", Some("Reject")),
        ];
        let right = vec![
            recommended("Paper1", "2.0"),
            recommended("Paper2", "0"),
            recommended("Paper3", "1"),
            recommended("Paper5", "n/a"),
        ];
        let outcome = merge_with_rules(
            &left,
            &right,
            &KeyRule::submission_number("invitations"),
            &KeyRule::submission_number("invitation"),
            &MergeOptions::with_right_fields(["number of reviewers recommending"]),
        );
        let (pairs, skipped) =
            decision_pairs(&outcome, "decision", "number of reviewers recommending");
        assert_eq!(pairs, vec![(2, true), (0, false)]);
        assert_eq!(skipped, 3);
    }

    #[test]
    fn count_cells_must_be_whole_numbers() {
        assert_eq!(parse_count("3"), Some(3));
        assert_eq!(parse_count(" 1.0 "), Some(1));
        assert_eq!(parse_count("1.5"), None);
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count(""), None);
    }
}
