//! vizreport - metrics report generator
//!
//! Builds the data sources described by a fixture of recorded query results
//! and writes the JSON report files dashboards read: global aggregate and
//! evolutionary reports, per-item filter reports, people and top reports,
//! and the metrics definition export.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use serde::Deserialize;
use vizreport_core::datasource::DataSourceSpec;
use vizreport_core::logging;
use vizreport_core::period::parse_date;
use vizreport_core::study::{RecordedStudy, Study};
use vizreport_core::{Config, DataSource, Metric, Period, ReportWriter};

#[derive(Parser)]
#[command(name = "vizreport")]
#[command(about = "Generate JSON metrics reports for development dashboards")]
#[command(version)]
struct Args {
    /// Fixture with the data sources and their recorded query results
    #[arg(long)]
    fixture: PathBuf,

    /// Start of the report range (YYYY-MM-DD)
    #[arg(long, value_parser = parse_cli_date)]
    start: NaiveDate,

    /// End of the report range (YYYY-MM-DD)
    #[arg(long, value_parser = parse_cli_date)]
    end: NaiveDate,

    /// Output directory (defaults to `output.destdir` from the config)
    #[arg(short, long)]
    destdir: Option<PathBuf>,

    /// Time series granularity: day, week, month or year
    #[arg(short, long)]
    period: Option<Period>,

    /// Config file (defaults to ~/.config/vizreport/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only create reports for these data sources (repeatable)
    #[arg(short = 's', long = "data-source")]
    data_sources: Vec<String>,

    /// Filter dimensions to create per-item reports for (repeatable)
    #[arg(short, long = "filter")]
    filters: Vec<String>,

    /// Also create the people reports
    #[arg(long)]
    people: bool,

    /// Also create the top reports
    #[arg(long)]
    top: bool,

    /// Also run the ages study once per company
    #[arg(long)]
    ages: bool,

    /// List the metrics of every data source without writing reports
    #[arg(long)]
    list_metrics: bool,

    /// Output format: text (default) or json
    #[arg(long, default_value = "text")]
    format: String,
}

/// Fixture file layout.
#[derive(Deserialize)]
struct Fixture {
    data_sources: Vec<DataSourceSpec>,
    #[serde(default)]
    studies: Vec<RecordedStudy>,
}

fn parse_cli_date(value: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(value).map_err(|e| e.to_string())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Config::load().context("failed to load configuration"),
    }
}

fn load_fixture(path: &Path) -> Result<(Vec<DataSource>, Vec<Box<dyn Study>>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: Fixture = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse fixture {}", path.display()))?;

    let data_sources = fixture
        .data_sources
        .into_iter()
        .map(|spec| spec.build())
        .collect::<vizreport_core::Result<Vec<_>>>()
        .context("invalid data source in fixture")?;
    let studies = fixture
        .studies
        .into_iter()
        .map(|study| Box::new(study) as Box<dyn Study>)
        .collect();
    Ok((data_sources, studies))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = load_config(args.config.as_deref())?;

    // Initialize logging
    let _log_guard =
        logging::init(&config.logging).context("failed to initialize logging")?;

    let (data_sources, studies) = load_fixture(&args.fixture)?;
    let mut data_sources = select_data_sources(data_sources, &args.data_sources)?;

    if args.list_metrics {
        print_metrics(&data_sources, &args.format)?;
        return Ok(());
    }

    if args.end < args.start {
        anyhow::bail!("end date {} is before start date {}", args.end, args.start);
    }

    let destdir = args
        .destdir
        .clone()
        .unwrap_or_else(|| config.output.destdir.clone());
    let period = args.period.unwrap_or(config.output.period);

    tracing::info!(
        fixture = %args.fixture.display(),
        destdir = %destdir.display(),
        %period,
        start = %args.start,
        end = %args.end,
        "Creating reports"
    );

    let writer = ReportWriter::new(&destdir, &config.report, period, args.start, args.end)
        .with_identities_db(config.output.identities_db.clone())
        .with_npeople(config.output.npeople)
        .with_studies(&studies);

    let mut summary = serde_json::Map::new();
    for ds in &mut data_sources {
        let files = create_reports(&writer, ds, &args)
            .with_context(|| format!("failed to create reports for {}", ds.name()))?;
        summary.insert(
            ds.name().to_string(),
            files
                .iter()
                .map(|path| serde_json::json!(file_name(path)))
                .collect(),
        );
    }

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for (name, files) in &summary {
            let count = files.as_array().map(Vec::len).unwrap_or(0);
            println!("{}: {} file(s)", name, count);
        }
        println!("\nReports written to {}", destdir.display());
    }

    Ok(())
}

/// Keep the data sources named in `names`, in fixture order; all of them
/// when `names` is empty.
fn select_data_sources(data_sources: Vec<DataSource>, names: &[String]) -> Result<Vec<DataSource>> {
    if let Some(unknown) = names
        .iter()
        .find(|name| !data_sources.iter().any(|ds| ds.name() == name.as_str()))
    {
        anyhow::bail!("unknown data source: {}", unknown);
    }
    if names.is_empty() {
        return Ok(data_sources);
    }
    Ok(data_sources
        .into_iter()
        .filter(|ds| names.iter().any(|name| name == ds.name()))
        .collect())
}

/// Every report of one data source, in the order they are written.
fn create_reports(writer: &ReportWriter, ds: &mut DataSource, args: &Args) -> Result<Vec<PathBuf>> {
    let _run = logging::report_span(ds.name(), writer.period()).entered();
    let mut files = vec![
        writer.create_agg_report(ds)?,
        writer.create_evolutionary_report(ds)?,
    ];
    for dimension in &args.filters {
        files.extend(writer.create_filter_report_all(ds, dimension)?);
    }
    if args.people {
        files.extend(writer.create_people_report(ds, None)?);
    }
    if args.top {
        files.push(writer.create_top_report(ds)?);
    }
    if args.ages {
        files.extend(writer.create_ages_company_report(ds)?);
    }
    files.push(writer.create_metrics_definition_report(ds)?);
    Ok(files)
}

fn print_metrics(data_sources: &[DataSource], format: &str) -> Result<()> {
    if format == "json" {
        let definitions: serde_json::Map<String, serde_json::Value> = data_sources
            .iter()
            .map(|ds| {
                serde_json::to_value(ds.metrics_definition())
                    .map(|defs| (ds.name().to_string(), defs))
            })
            .collect::<std::result::Result<_, _>>()?;
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    for ds in data_sources {
        println!("{} ({}):", ds.name(), ds.kind());
        for metric in ds.catalog().iter() {
            if metric.description().is_empty() {
                println!("  - {}", metric.id());
            } else {
                println!("  - {}: {}", metric.id(), metric.description());
            }
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
