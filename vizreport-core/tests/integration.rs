//! Integration tests for the report pipeline
//!
//! These tests use the fixture in `tests/fixtures/report.json` to verify the
//! path from recorded metric results to report files on disk.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vizreport_core::config::ReportConfig;
use vizreport_core::datasource::{DataSourceSpec, RecordedBackend};
use vizreport_core::metric::{RecordedMetric, RecordedResults};
use vizreport_core::reshape::normalize;
use vizreport_core::result::into_result_map;
use vizreport_core::study::{RecordedStudy, Study};
use vizreport_core::{
    AggregationEngine, DataSource, DataSourceKind, FilterSpec, GroupReshaper, Period,
    ReportMode, ReportRequest, ReportWriter,
};

#[derive(Deserialize)]
struct Fixture {
    data_sources: Vec<DataSourceSpec>,
    #[serde(default)]
    studies: Vec<RecordedStudy>,
}

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn load_fixture() -> (Vec<DataSource>, Vec<Box<dyn Study>>) {
    let content = fs::read_to_string(fixture_path("report.json")).unwrap();
    let fixture: Fixture = serde_json::from_str(&content).unwrap();
    let data_sources = fixture
        .data_sources
        .into_iter()
        .map(|spec| spec.build().unwrap())
        .collect();
    let studies = fixture
        .studies
        .into_iter()
        .map(|study| Box::new(study) as Box<dyn Study>)
        .collect();
    (data_sources, studies)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn read(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// ============================================
// Engine + reshaper
// ============================================

#[test]
fn test_issues_grouped_closed_end_to_end() {
    let closed = RecordedMetric::new(
        "closed",
        RecordedResults {
            grouped_agg: Some(into_result_map(json!({"url": ["proj1"], "closed": [5]}))),
            ..Default::default()
        },
    );
    let mut ds = DataSource::new(
        DataSourceKind::IssueTracker,
        Box::new(RecordedBackend::new("issues").with_items("repository", ["proj1", "proj2"])),
    )
    .with_name("issues")
    .with_metric(Box::new(closed))
    .with_core_metrics(ReportMode::Aggregate, ["closed"]);

    let config = ReportConfig::new();
    let filter = FilterSpec::grouped("repository");
    let request = ReportRequest::aggregate(Period::Month, date(2013, 1, 1), date(2014, 1, 1))
        .with_filter(filter.clone());
    let data = AggregationEngine::new(&config)
        .compute(&mut ds, &request)
        .unwrap();

    let normalized = normalize(ds.kind(), data.clone(), &filter);
    assert_eq!(
        Value::Object(normalized),
        json!({"name": ["proj1", "proj2"], "closed": [5, 0]})
    );

    let exploded = GroupReshaper::for_data_source(&ds)
        .explode(data, &filter, false, Period::Month)
        .unwrap();
    let records: Vec<_> = exploded
        .items
        .iter()
        .map(|(item, file)| (item.as_str(), Value::Object(file.record.clone())))
        .collect();
    assert_eq!(
        records,
        vec![
            ("proj1", json!({"closed": 5})),
            ("proj2", json!({"closed": 0})),
        ]
    );
    assert_eq!(exploded.items[1].1.filename, "proj2-issues-rep-static.json");
}

#[test]
fn test_fixture_grouped_aggregate() {
    let (mut data_sources, _) = load_fixture();
    let issues = &mut data_sources[0];
    let config = ReportConfig::new();
    let request = ReportRequest::aggregate(Period::Month, date(2013, 1, 1), date(2013, 2, 1))
        .with_filter(FilterSpec::grouped("repository"));

    let data = AggregationEngine::new(&config)
        .compute(issues, &request)
        .unwrap();

    assert_eq!(data["url"], json!(["proj1", "proj2"]));
    assert_eq!(data["opened"], json!([25, 15]));
    assert_eq!(data["closed"], json!([5, 0]));
    assert_eq!(data["first_date"], json!(["2012-03-01", "2012-05-02"]));
    assert_eq!(data["closed_7"], json!([2, 0]));
    assert_eq!(data["closed_30"], json!([8, 0]));
    assert_eq!(data["closed_365"], json!([20, 10]));

    // Every bound bundle was restored
    let closed = issues.catalog().get("closed").unwrap();
    assert_eq!(closed.filters().type_analysis, None);
    assert_eq!(
        closed.filters().closed_condition.as_deref(),
        Some("new_value = 'CLOSED'")
    );
    assert!(closed.filters().global_filter.is_some());
}

#[test]
fn test_fixture_grouped_time_series_fills_missing_items() {
    let (mut data_sources, _) = load_fixture();
    let config = ReportConfig::new();
    let request = ReportRequest::time_series(Period::Month, date(2013, 1, 1), date(2013, 2, 1))
        .with_filter(FilterSpec::grouped("repository"));

    let data = AggregationEngine::new(&config)
        .compute(&mut data_sources[0], &request)
        .unwrap();

    assert_eq!(data["closed"], json!([[2, 3], [0, 0]]));
    assert_eq!(data["month"], json!([24156, 24157]));
    assert_eq!(data["date"], json!(["Jan 2013", "Feb 2013"]));
    // Time series never carry trends or date bounds
    assert!(!data.contains_key("closed_7"));
    assert!(!data.contains_key("first_date"));
}

// ============================================
// Report files
// ============================================

#[test]
fn test_full_report_directory() {
    vizreport_core::logging::init_test();
    let (mut data_sources, studies) = load_fixture();
    let dir = TempDir::new().unwrap();
    let mut config = ReportConfig::new();
    config.set("people_out", "bot");

    let writer = ReportWriter::new(dir.path(), &config, Period::Month, date(2013, 1, 1), date(2013, 2, 1))
        .with_studies(&studies)
        .with_npeople(10);

    let issues = &mut data_sources[0];
    writer.create_agg_report(issues).unwrap();
    writer.create_evolutionary_report(issues).unwrap();
    let filter_files = writer.create_filter_report_all(issues, "repository").unwrap();
    let people_files = writer.create_people_report(issues, None).unwrap();
    writer.create_top_report(issues).unwrap();
    writer.create_metrics_definition_report(issues).unwrap();

    let global = read(&dir.path().join("issues-static.json"));
    assert_eq!(global["opened"], json!(40));
    assert_eq!(global["closed"], json!(30));
    assert_eq!(global["first_date"], json!("2012-03-01"));
    assert_eq!(global["closed_365"], json!(30));
    assert_eq!(global["diff_netclosed_30"], json!(-2));
    assert_eq!(global["birth_365"], json!(4));

    let evol = read(&dir.path().join("issues-evolutionary.json"));
    assert_eq!(evol["closed"], json!([10, 20]));

    assert_eq!(filter_files.len(), 5);
    assert_eq!(
        read(&dir.path().join("issues-repos.json")),
        json!({"closed_365": [20, 10], "name": ["proj1", "proj2"]})
    );
    assert_eq!(
        read(&dir.path().join("proj2-issues-rep-static.json")),
        json!({
            "opened": 15,
            "closed": 0,
            "first_date": "2012-05-02",
            "closed_7": 0,
            "closed_30": 0,
            "closed_365": 10
        })
    );
    let proj1_evol = read(&dir.path().join("proj1-issues-rep-evolutionary.json"));
    assert_eq!(proj1_evol["closed"], json!([2, 3]));
    assert_eq!(proj1_evol["id"], json!([0, 1]));

    assert_eq!(people_files.len(), 5);
    assert_eq!(read(&dir.path().join("issues-people.json")), json!(["101", "102"]));
    assert_eq!(
        read(&dir.path().join("people-102-issues-static.json")),
        json!({"closed": 1})
    );

    let top = read(&dir.path().join("issues-top.json"));
    assert_eq!(top["closers."]["closed"], json!([3, 1]));

    let definitions = read(&dir.path().join("issues-metrics-definition.json"));
    assert_eq!(
        definitions["issues_closed"],
        json!({
            "divid": "issues_closed",
            "column": "closed",
            "name": "Closed",
            "desc": "Number of closed tickets"
        })
    );
    assert_eq!(definitions["issues_first_date"]["name"], json!("first_date"));
}

#[test]
fn test_data_source_without_backend_hooks() {
    let (mut data_sources, studies) = load_fixture();
    let dir = TempDir::new().unwrap();
    let config = ReportConfig::new();
    let writer = ReportWriter::new(dir.path(), &config, Period::Month, date(2013, 1, 1), date(2013, 2, 1))
        .with_studies(&studies);

    let scm = &mut data_sources[1];
    assert_eq!(scm.name(), "scm");
    writer.create_agg_report(scm).unwrap();
    assert_eq!(
        read(&dir.path().join("scm-static.json")),
        json!({"commits": 120, "birth_365": 4})
    );

    // No recorded items: a grouped report writes nothing
    let files = writer.create_filter_report_all(scm, "company").unwrap();
    assert!(files.is_empty());

    // Unimplemented hooks abort
    assert!(writer.create_people_report(scm, None).unwrap_err().is_fatal());
    assert!(writer.create_top_report(scm).unwrap_err().is_fatal());
}

#[test]
fn test_config_overrides_apply_per_data_source() {
    let (mut data_sources, _) = load_fixture();
    let mut config = ReportConfig::new();
    config
        .set("issues_metrics_agg", "opened")
        .set("issues_metrics_trends", "")
        .set("scm_enddate", "2013-06-01");
    let engine = AggregationEngine::new(&config);
    let request = ReportRequest::aggregate(Period::Month, date(2013, 1, 1), date(2013, 2, 1));

    let issues = engine.compute(&mut data_sources[0], &request).unwrap();
    assert_eq!(
        Value::Object(issues),
        json!({"opened": 40, "first_date": "2012-03-01"})
    );

    let scm = engine.compute(&mut data_sources[1], &request).unwrap();
    assert_eq!(Value::Object(scm), json!({"commits": 120}));
}

#[test]
fn test_ages_study_per_company() {
    let (data_sources, studies) = load_fixture();
    let dir = TempDir::new().unwrap();
    let mut config = ReportConfig::new();
    config.set("issues_start_date", "2012-01-01");
    let writer = ReportWriter::new(dir.path(), &config, Period::Month, date(2013, 1, 1), date(2013, 2, 1))
        .with_studies(&studies);

    // Only acme has a recorded ages report
    let files = writer.create_ages_company_report(&data_sources[0]).unwrap();
    assert_eq!(files, vec![dir.path().join("acme-issues-com-ages.json")]);
    assert_eq!(
        read(&files[0]),
        json!({"birth": [2, 1], "aging": [1, 0]})
    );

    // The commit source lists no companies
    assert!(writer
        .create_ages_company_report(&data_sources[1])
        .unwrap()
        .is_empty());
}
