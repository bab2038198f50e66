//! Data sources: a metric catalog plus the query hooks behind it.
//!
//! A [`DataSource`] is built once per report run and passed explicitly to
//! everything that needs it. It owns its catalog, the core metric lists per
//! report mode, the bot list and the global filter, so two runs never
//! share mutable state.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::filter::{FilterSpec, GlobalFilter};
use crate::metric::{Metric, MetricCatalog, MetricDefinition, RecordedMetric, RecordedMetricSpec};
use crate::period::Period;
use crate::result::ResultMap;
use crate::types::{DataSourceKind, ReportMode};

/// Report-only metrics, available when enabled in the `reports` config entry.
pub const REPORT_METRICS: &[&str] = &["organizations", "countries", "domains"];

/// Id of the metric returning the first activity date.
pub const FIRST_DATE_METRIC: &str = "first_date";
/// Id of the metric returning the last activity date.
pub const LAST_DATE_METRIC: &str = "last_date";

// ============================================
// Query hooks
// ============================================

/// Queries a data source answers outside of its metric catalog.
///
/// Hooks a backend does not provide keep the default implementation and
/// report [`Error::Unimplemented`].
pub trait QueryBackend: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Items of `filter`'s dimension, in report order. `None` when the data
    /// source has nothing for this dimension.
    fn filter_items(
        &self,
        filter: &FilterSpec,
        start: NaiveDate,
        end: NaiveDate,
        identities_db: &str,
    ) -> Result<Option<Vec<String>>> {
        let _ = (filter, start, end, identities_db);
        Err(Error::unimplemented(self.name(), "filter_items"))
    }

    /// Alias of the GROUP BY column for `dimension`.
    fn group_field_alias(&self, kind: DataSourceKind, dimension: &str) -> String {
        kind.group_field_alias(dimension).to_string()
    }

    /// Items of `filter`'s dimension with a short activity summary each,
    /// capped at `limit` items.
    fn filter_summary(
        &self,
        filter: &FilterSpec,
        period: Period,
        start: NaiveDate,
        end: NaiveDate,
        identities_db: &str,
        limit: usize,
    ) -> Result<ResultMap> {
        let _ = (filter, period, start, end, identities_db, limit);
        Err(Error::unimplemented(self.name(), "filter_summary"))
    }

    /// Top people identifiers.
    fn top_people(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        identities_db: &str,
        npeople: usize,
    ) -> Result<Option<Vec<String>>> {
        let _ = (start, end, identities_db, npeople);
        Err(Error::unimplemented(self.name(), "top_people"))
    }

    /// Evolutionary activity of one person.
    fn person_evol(
        &self,
        uuid: &str,
        period: Period,
        start: NaiveDate,
        end: NaiveDate,
        identities_db: &str,
    ) -> Result<ResultMap> {
        let _ = (uuid, period, start, end, identities_db);
        Err(Error::unimplemented(self.name(), "person_evol"))
    }

    /// Aggregated activity of one person.
    fn person_agg(
        &self,
        uuid: &str,
        start: NaiveDate,
        end: NaiveDate,
        identities_db: &str,
    ) -> Result<ResultMap> {
        let _ = (uuid, start, end, identities_db);
        Err(Error::unimplemented(self.name(), "person_agg"))
    }

    /// Top-N listings, optionally for one filter item.
    fn top_data(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        identities_db: &str,
        filter: Option<&FilterSpec>,
        npeople: usize,
    ) -> Result<ResultMap> {
        let _ = (start, end, identities_db, filter, npeople);
        Err(Error::unimplemented(self.name(), "top_data"))
    }
}

// ============================================
// Data source
// ============================================

/// One data source configured for a report run.
pub struct DataSource {
    name: String,
    kind: DataSourceKind,
    catalog: MetricCatalog,
    core_agg: Vec<String>,
    core_ts: Vec<String>,
    core_trends: Vec<String>,
    report_metrics: Vec<String>,
    bots: Vec<String>,
    global_filter: Option<GlobalFilter>,
    backend: Box<dyn QueryBackend>,
}

impl DataSource {
    /// Data source of `kind`, named after the kind.
    pub fn new(kind: DataSourceKind, backend: Box<dyn QueryBackend>) -> Self {
        Self {
            name: kind.as_str().to_string(),
            kind,
            catalog: MetricCatalog::new(),
            core_agg: Vec::new(),
            core_ts: Vec::new(),
            core_trends: Vec::new(),
            report_metrics: REPORT_METRICS.iter().map(|s| s.to_string()).collect(),
            bots: Vec::new(),
            global_filter: None,
            backend,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register a metric. The data source's global filter, if any, becomes
    /// part of the metric's own bundle.
    pub fn with_metric(mut self, metric: Box<dyn Metric>) -> Self {
        self.register(metric);
        self
    }

    pub fn register(&mut self, mut metric: Box<dyn Metric>) {
        if let Some(global) = &self.global_filter {
            metric.filters_mut().global_filter = Some(global.clone());
        }
        self.catalog.register(metric);
    }

    /// Core metric ids for `mode`.
    pub fn with_core_metrics<I, S>(mut self, mode: ReportMode, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = ids.into_iter().map(Into::into).collect();
        match mode {
            ReportMode::Aggregate => self.core_agg = ids,
            ReportMode::TimeSeries => self.core_ts = ids,
        }
        self
    }

    /// Metric ids computed for the 7/30/365 trend windows.
    pub fn with_trend_metrics<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.core_trends = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_bots(mut self, bots: Vec<String>) -> Self {
        self.bots = bots;
        self
    }

    /// Set the filter applied to every metric, current and future.
    pub fn with_global_filter(mut self, global_filter: GlobalFilter) -> Self {
        for metric in self.catalog.iter_mut() {
            metric.filters_mut().global_filter = Some(global_filter.clone());
        }
        self.global_filter = Some(global_filter);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DataSourceKind {
        self.kind
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut MetricCatalog {
        &mut self.catalog
    }

    pub fn backend(&self) -> &dyn QueryBackend {
        self.backend.as_ref()
    }

    pub fn bots(&self) -> &[String] {
        &self.bots
    }

    pub fn global_filter(&self) -> Option<&GlobalFilter> {
        self.global_filter.as_ref()
    }

    pub fn core_metrics(&self, mode: ReportMode) -> &[String] {
        match mode {
            ReportMode::Aggregate => &self.core_agg,
            ReportMode::TimeSeries => &self.core_ts,
        }
    }

    pub fn trend_metrics(&self) -> &[String] {
        &self.core_trends
    }

    pub fn report_metrics(&self) -> &[String] {
        &self.report_metrics
    }

    pub fn group_field_alias(&self, dimension: &str) -> String {
        self.backend.group_field_alias(self.kind, dimension)
    }

    /// Catalog export keyed by `<ds>_<metric id>`.
    pub fn metrics_definition(&self) -> BTreeMap<String, MetricDefinition> {
        self.catalog.definitions(&self.name)
    }

    pub fn agg_filename(&self, filter: Option<&FilterSpec>) -> String {
        match filter {
            Some(filter) => filter.static_filename(&self.name),
            None => format!("{}-static.json", self.name),
        }
    }

    pub fn evolutionary_filename(&self, filter: Option<&FilterSpec>) -> String {
        match filter {
            Some(filter) => filter.evolutionary_filename(&self.name),
            None => format!("{}-evolutionary.json", self.name),
        }
    }

    pub fn top_filename(&self, filter: Option<&FilterSpec>) -> String {
        match filter {
            Some(filter) => filter.top_filename(&self.name),
            None => format!("{}-top.json", self.name),
        }
    }

    /// `<ds>-<plural>-summary.json`
    pub fn filter_summary_filename(&self, filter: &FilterSpec) -> String {
        format!("{}-{}-summary.json", self.name, filter.name_plural())
    }

    pub fn top_people_filename(&self) -> String {
        format!("{}-people.json", self.name)
    }

    pub fn person_evol_filename(&self, uuid: &str) -> String {
        format!("people-{}-{}-evolutionary.json", uuid, self.name)
    }

    pub fn person_agg_filename(&self, uuid: &str) -> String {
        format!("people-{}-{}-static.json", uuid, self.name)
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("catalog", &self.catalog)
            .field("core_agg", &self.core_agg)
            .field("core_ts", &self.core_ts)
            .field("core_trends", &self.core_trends)
            .finish_non_exhaustive()
    }
}

// ============================================
// Recorded backend
// ============================================

/// Backend replaying recorded answers; used by fixtures and tests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordedBackend {
    #[serde(default)]
    pub name: String,
    /// Items per filter dimension
    #[serde(default)]
    pub items: HashMap<String, Vec<String>>,
    /// Summaries per filter dimension
    #[serde(default)]
    pub summaries: HashMap<String, ResultMap>,
    #[serde(default)]
    pub top_people: Option<Vec<String>>,
    #[serde(default)]
    pub people_evol: HashMap<String, ResultMap>,
    #[serde(default)]
    pub people_agg: HashMap<String, ResultMap>,
    #[serde(default)]
    pub top: Option<ResultMap>,
}

impl RecordedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_items<I, S>(mut self, dimension: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items
            .insert(dimension.into(), items.into_iter().map(Into::into).collect());
        self
    }

    fn person(&self, table: &HashMap<String, ResultMap>, uuid: &str, capability: &str) -> Result<ResultMap> {
        if table.is_empty() {
            return Err(Error::unimplemented(&self.name, capability));
        }
        Ok(table.get(uuid).cloned().unwrap_or_default())
    }
}

impl QueryBackend for RecordedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter_items(
        &self,
        filter: &FilterSpec,
        _start: NaiveDate,
        _end: NaiveDate,
        _identities_db: &str,
    ) -> Result<Option<Vec<String>>> {
        Ok(self.items.get(filter.dimension()).cloned())
    }

    fn filter_summary(
        &self,
        filter: &FilterSpec,
        _period: Period,
        _start: NaiveDate,
        _end: NaiveDate,
        _identities_db: &str,
        limit: usize,
    ) -> Result<ResultMap> {
        let Some(summary) = self.summaries.get(filter.dimension()) else {
            return Err(Error::unimplemented(&self.name, "filter_summary"));
        };
        // Every column is capped, not only the item names
        Ok(summary
            .iter()
            .map(|(key, value)| {
                let value = match value.as_array() {
                    Some(column) => Value::Array(column.iter().take(limit).cloned().collect()),
                    None => value.clone(),
                };
                (key.clone(), value)
            })
            .collect())
    }

    fn top_people(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
        _identities_db: &str,
        npeople: usize,
    ) -> Result<Option<Vec<String>>> {
        let Some(people) = &self.top_people else {
            return Err(Error::unimplemented(&self.name, "top_people"));
        };
        Ok(Some(people.iter().take(npeople).cloned().collect()))
    }

    fn person_evol(
        &self,
        uuid: &str,
        _period: Period,
        _start: NaiveDate,
        _end: NaiveDate,
        _identities_db: &str,
    ) -> Result<ResultMap> {
        self.person(&self.people_evol, uuid, "person_evol")
    }

    fn person_agg(
        &self,
        uuid: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        _identities_db: &str,
    ) -> Result<ResultMap> {
        self.person(&self.people_agg, uuid, "person_agg")
    }

    fn top_data(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
        _identities_db: &str,
        _filter: Option<&FilterSpec>,
        _npeople: usize,
    ) -> Result<ResultMap> {
        self.top
            .clone()
            .ok_or_else(|| Error::unimplemented(&self.name, "top_data"))
    }
}

/// Declarative description of a data source (fixture format).
#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceSpec {
    pub kind: DataSourceKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metrics_agg: Vec<String>,
    #[serde(default)]
    pub metrics_ts: Vec<String>,
    #[serde(default)]
    pub metrics_trends: Vec<String>,
    #[serde(default)]
    pub global_filter: Option<String>,
    /// Identities excluded from every metric of this data source
    #[serde(default)]
    pub bots: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<RecordedMetricSpec>,
    #[serde(default)]
    pub backend: RecordedBackend,
}

impl DataSourceSpec {
    /// Build the data source, replaying the recorded metrics and backend.
    pub fn build(self) -> Result<DataSource> {
        let name = self
            .name
            .unwrap_or_else(|| self.kind.as_str().to_string());
        let mut backend = self.backend;
        if backend.name.is_empty() {
            backend.name = name.clone();
        }

        let mut ds = DataSource::new(self.kind, Box::new(backend))
            .with_name(name)
            .with_core_metrics(ReportMode::Aggregate, self.metrics_agg)
            .with_core_metrics(ReportMode::TimeSeries, self.metrics_ts)
            .with_trend_metrics(self.metrics_trends)
            .with_bots(self.bots);
        if let Some(raw) = self.global_filter {
            ds = ds.with_global_filter(GlobalFilter::parse(&raw)?);
        }
        for spec in self.metrics {
            ds.register(Box::new(RecordedMetric::from_spec(spec)));
        }
        Ok(ds)
    }
}
