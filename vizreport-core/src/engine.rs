//! Aggregation engine
//!
//! Builds one report dataset for a data source by running every selected
//! metric under a common filter bundle and merging the results.
//!
//! ## Grouped reports
//!
//! When the filter has no concrete value the report covers all items of the
//! dimension at once. The engine fetches the master item list first and
//! aligns every metric's GROUP BY result against it, so all columns of the
//! final dataset share the same item order:
//!
//! ```text
//! filter_items() ──► master list ──► Aligner
//!                                      ▲
//! metric A (get_agg / get_ts) ─────────┤
//! metric B ────────────────────────────┤──► merge_later_wins ──► ResultMap
//! first_date / last_date ──────────────┤
//! trends 7 / 30 / 365 ─────────────────┘
//! ```
//!
//! ## Failure policy
//!
//! [`Error::Unimplemented`](crate::error::Error::Unimplemented) aborts the
//! computation. Any other metric error, including a missing join column,
//! drops that metric's contribution with a warning and the report continues.

use chrono::NaiveDate;
use serde_json::Value;

use crate::align::Aligner;
use crate::config::ReportConfig;
use crate::datasource::{DataSource, FIRST_DATE_METRIC, LAST_DATE_METRIC};
use crate::error::Result;
use crate::filter::{FilterSpec, TypeAnalysis};
use crate::metric::{FilterScope, MetricFilters, DEFAULT_NPEOPLE};
use crate::period::{parse_date, Period};
use crate::result::{merge_later_wins, rename_field, ResultMap};
use crate::types::ReportMode;

/// Lookback windows, in days, of the trend section.
pub const TREND_WINDOWS: [u32; 3] = [7, 30, 365];

/// Marker of a computed (multi-column) GROUP BY key.
pub const CONCAT_MARKER: &str = "CONCAT(";

/// Parameters of one report computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub mode: ReportMode,
    pub period: Period,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Identities database handed to the backend hooks
    pub identities_db: String,
    /// `None` for the unfiltered (global) report
    pub filter: Option<FilterSpec>,
}

impl ReportRequest {
    /// Unfiltered request for `mode`.
    pub fn new(mode: ReportMode, period: Period, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            mode,
            period,
            start,
            end,
            identities_db: String::new(),
            filter: None,
        }
    }

    pub fn aggregate(period: Period, start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(ReportMode::Aggregate, period, start, end)
    }

    pub fn time_series(period: Period, start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(ReportMode::TimeSeries, period, start, end)
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_identities_db(mut self, identities_db: impl Into<String>) -> Self {
        self.identities_db = identities_db.into();
        self
    }

    fn type_analysis(&self) -> Option<TypeAnalysis> {
        self.filter.as_ref().map(FilterSpec::type_analysis)
    }

    fn grouped_filter(&self) -> Option<&FilterSpec> {
        self.filter.as_ref().filter(|f| f.is_grouped())
    }
}

/// Computes report datasets, honouring the `[report]` configuration.
#[derive(Debug, Clone, Copy)]
pub struct AggregationEngine<'c> {
    config: &'c ReportConfig,
}

impl<'c> AggregationEngine<'c> {
    pub fn new(config: &'c ReportConfig) -> Self {
        Self { config }
    }

    /// Compute the dataset of `ds` for `request`.
    ///
    /// Returns an empty mapping when a grouped request finds no items.
    pub fn compute(&self, ds: &mut DataSource, request: &ReportRequest) -> Result<ResultMap> {
        let mut data = ResultMap::new();
        let ds_name = ds.name().to_string();
        let mode = request.mode;

        let metric_ids = self.metric_ids(ds, request);
        let (start, end) = self.date_range(&ds_name, request)?;
        let type_analysis = request.type_analysis();
        let alias = type_analysis
            .as_ref()
            .map(|ta| ds.group_field_alias(&ta.field));

        let bundle = MetricFilters::new(request.period, start, end, type_analysis.clone())
            .with_npeople(DEFAULT_NPEOPLE)
            .with_people_out(self.people_out(ds));

        let aligner = match request.grouped_filter() {
            Some(filter) => {
                let items = ds
                    .backend()
                    .filter_items(filter, start, end, &request.identities_db)?;
                let Some(items) = items.filter(|items| !items.is_empty()) else {
                    tracing::info!(
                        ds = ds_name.as_str(),
                        filter = %filter,
                        "No items for filter, nothing to report"
                    );
                    return Ok(data);
                };
                if mode.is_evolutionary() {
                    Some(Aligner::evolutionary(items, request.period, start, end)?)
                } else {
                    Some(Aligner::aggregate(items))
                }
            }
            None => None,
        };

        tracing::debug!(
            ds = ds_name.as_str(),
            mode = ?mode,
            metrics = ?metric_ids,
            %start,
            %end,
            grouped = aligner.is_some(),
            "Computing report data"
        );

        for id in &metric_ids {
            if !ds.catalog().contains(id) {
                tracing::debug!(ds = ds_name.as_str(), metric = id.as_str(), "Metric not in catalog");
            }
        }

        for metric in ds.catalog_mut().selected_mut(&metric_ids) {
            let metric_id = metric.id().to_string();
            let scope = FilterScope::bind_report(metric.as_mut(), &bundle);
            let outcome = if mode.is_evolutionary() {
                scope.get_ts()
            } else {
                scope.get_agg()
            };
            drop(scope);

            let value = match outcome {
                Ok(value) => value,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        ds = ds_name.as_str(),
                        metric = metric_id.as_str(),
                        error = %e,
                        "Metric failed, omitting it from the report"
                    );
                    continue;
                }
            };

            let value = match (&aligner, alias.as_deref()) {
                (Some(aligner), Some(alias)) if !value.is_empty() => {
                    match align_on_group(aligner, &metric_id, value, alias) {
                        Ok(aligned) => aligned,
                        Err(e) => {
                            tracing::warn!(
                                ds = ds_name.as_str(),
                                metric = metric_id.as_str(),
                                error = %e,
                                "Cannot align metric, omitting it from the report"
                            );
                            continue;
                        }
                    }
                }
                _ => value,
            };
            merge_later_wins(&mut data, value);
        }

        if !mode.is_evolutionary() {
            let bounds = self.date_bounds(ds, &bundle, aligner.as_ref(), alias.as_deref())?;
            merge_later_wins(&mut data, bounds);

            let trends = self.trends(ds, &bundle, end, aligner.as_ref(), alias.as_deref())?;
            merge_later_wins(&mut data, trends);
        }

        Ok(data)
    }

    /// First activity date of `ds` under `filter`, if the catalog knows it.
    pub fn date_init(
        &self,
        ds: &mut DataSource,
        request: &ReportRequest,
    ) -> Result<Option<Value>> {
        self.date_bound(ds, request, FIRST_DATE_METRIC)
    }

    /// Last activity date of `ds` under `filter`, if the catalog knows it.
    pub fn date_end(&self, ds: &mut DataSource, request: &ReportRequest) -> Result<Option<Value>> {
        self.date_bound(ds, request, LAST_DATE_METRIC)
    }

    /// Metric ids to run: the config override or the data source's core
    /// set, plus the enabled report-only metrics for unfiltered requests.
    fn metric_ids(&self, ds: &DataSource, request: &ReportRequest) -> Vec<String> {
        let mut ids = self
            .config
            .metric_ids(ds.name(), request.mode)
            .unwrap_or_else(|| ds.core_metrics(request.mode).to_vec());

        if request.filter.is_none() {
            let enabled = self.config.enabled_reports();
            for report in ds.report_metrics() {
                if enabled.contains(report) && !ids.contains(report) {
                    ids.push(report.clone());
                }
            }
        }
        ids
    }

    /// Configured `people_out` identities followed by the data source's bots.
    pub fn people_out(&self, ds: &DataSource) -> Vec<String> {
        let mut people_out = self.config.people_out();
        for bot in ds.bots() {
            if !people_out.contains(bot) {
                people_out.push(bot.clone());
            }
        }
        people_out
    }

    fn date_range(&self, ds_name: &str, request: &ReportRequest) -> Result<(NaiveDate, NaiveDate)> {
        let start = match self.config.start_date(ds_name) {
            Some(raw) => parse_date(&raw)?,
            None => request.start,
        };
        let end = match self.config.end_date(ds_name) {
            Some(raw) => parse_date(&raw)?,
            None => request.end,
        };
        Ok((start, end))
    }

    fn date_bound(
        &self,
        ds: &mut DataSource,
        request: &ReportRequest,
        metric_id: &str,
    ) -> Result<Option<Value>> {
        let (start, end) = self.date_range(ds.name(), request)?;
        let bundle = MetricFilters::new(request.period, start, end, request.type_analysis());
        let Some(metric) = ds.catalog_mut().get_mut(metric_id) else {
            return Ok(None);
        };
        let scope = FilterScope::bind_report(metric.as_mut(), &bundle);
        let value = scope.get_agg()?;
        Ok(value.into_iter().next().map(|(_, v)| v))
    }

    /// `first_date` / `last_date` contributions.
    fn date_bounds(
        &self,
        ds: &mut DataSource,
        bundle: &MetricFilters,
        aligner: Option<&Aligner>,
        alias: Option<&str>,
    ) -> Result<ResultMap> {
        let mut data = ResultMap::new();
        let ds_name = ds.name().to_string();
        let bound_ids = [FIRST_DATE_METRIC.to_string(), LAST_DATE_METRIC.to_string()];

        for metric in ds.catalog_mut().selected_mut(&bound_ids) {
            let metric_id = metric.id().to_string();
            let scope = FilterScope::bind_report(metric.as_mut(), bundle);
            let outcome = scope.get_agg();
            drop(scope);

            let value = match outcome {
                Ok(value) => value,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(ds = ds_name.as_str(), metric = metric_id.as_str(), error = %e, "Date bound failed");
                    continue;
                }
            };
            let value = match (aligner, alias) {
                (Some(aligner), Some(alias)) if !value.is_empty() => {
                    match align_on_group(aligner, &metric_id, value, alias) {
                        Ok(aligned) => aligned,
                        Err(e) => {
                            tracing::warn!(ds = ds_name.as_str(), metric = metric_id.as_str(), error = %e, "Cannot align date bound");
                            continue;
                        }
                    }
                }
                _ => value,
            };
            merge_later_wins(&mut data, value);
        }
        Ok(data)
    }

    /// Trend section: every trend metric over each window of [`TREND_WINDOWS`].
    fn trends(
        &self,
        ds: &mut DataSource,
        bundle: &MetricFilters,
        end: NaiveDate,
        aligner: Option<&Aligner>,
        alias: Option<&str>,
    ) -> Result<ResultMap> {
        let mut data = ResultMap::new();
        let ds_name = ds.name().to_string();
        let trend_ids = self
            .config
            .trend_metric_ids(&ds_name)
            .unwrap_or_else(|| ds.trend_metrics().to_vec());

        for days in TREND_WINDOWS {
            for metric in ds.catalog_mut().selected_mut(&trend_ids) {
                let metric_id = metric.id().to_string();
                let scope = FilterScope::bind_report(metric.as_mut(), bundle);
                let outcome = scope.get_trends(end, days);
                drop(scope);

                let value = match outcome {
                    Ok(value) => value,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            ds = ds_name.as_str(),
                            metric = metric_id.as_str(),
                            days,
                            error = %e,
                            "Trend failed, omitting it from the report"
                        );
                        continue;
                    }
                };

                let value = match (aligner, alias) {
                    (Some(aligner), Some(alias)) if !value.is_empty() => {
                        match aligner.align(&metric_id, &value, alias) {
                            Ok(aligned) => aligned,
                            Err(e) => {
                                tracing::warn!(
                                    ds = ds_name.as_str(),
                                    metric = metric_id.as_str(),
                                    days,
                                    error = %e,
                                    "Cannot align trend, omitting it from the report"
                                );
                                continue;
                            }
                        }
                    }
                    _ => value,
                };
                merge_later_wins(&mut data, value);
            }
        }
        Ok(data)
    }
}

/// The column a grouped result is keyed by: a computed `CONCAT(` key when
/// the query built one, otherwise the group alias.
pub fn join_field(data: &ResultMap, alias: &str) -> String {
    data.keys()
        .find(|key| key.contains(CONCAT_MARKER))
        .cloned()
        .unwrap_or_else(|| alias.to_string())
}

/// Align a grouped metric result and store its identities under `alias`.
fn align_on_group(
    aligner: &Aligner,
    metric_id: &str,
    value: ResultMap,
    alias: &str,
) -> Result<ResultMap> {
    let id_field = join_field(&value, alias);
    let aligned = aligner.align(metric_id, &value, &id_field)?;
    if id_field != alias {
        tracing::debug!(
            metric = metric_id,
            field = id_field.as_str(),
            alias,
            "Renaming computed join column"
        );
    }
    Ok(rename_field(aligned, &id_field, alias))
}
