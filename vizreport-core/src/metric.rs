//! Metrics and the filter bundles they run with.
//!
//! A [`Metric`] is a named computation backed by a query builder. It can
//! produce an aggregate value, a time series, or a trend value for a
//! lookback window, always parameterized by the [`MetricFilters`] bundle
//! currently bound to it.
//!
//! Report code never assigns a metric's filters directly. It binds a bundle
//! with [`FilterScope`], which puts the metric's own bundle back when the
//! scope ends, whichever way the invocation exits.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::filter::{GlobalFilter, TypeAnalysis};
use crate::period::Period;
use crate::result::ResultMap;

/// Default size of top-N results.
pub const DEFAULT_NPEOPLE: usize = 10;

// ============================================
// Filter bundle
// ============================================

/// Parameters passed to every metric invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricFilters {
    pub period: Period,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// `None` for unfiltered reports
    pub type_analysis: Option<TypeAnalysis>,
    /// Result size cap for top-N style metrics
    pub npeople: usize,
    /// Identities excluded from every metric (bots)
    pub people_out: Vec<String>,
    /// Metric-specific predicate, carried over from the metric's own bundle
    pub global_filter: Option<GlobalFilter>,
    /// Metric-specific closed-state condition, carried over likewise
    pub closed_condition: Option<String>,
}

impl MetricFilters {
    pub fn new(
        period: Period,
        start_date: NaiveDate,
        end_date: NaiveDate,
        type_analysis: Option<TypeAnalysis>,
    ) -> Self {
        Self {
            period,
            start_date,
            end_date,
            type_analysis,
            npeople: DEFAULT_NPEOPLE,
            people_out: Vec::new(),
            global_filter: None,
            closed_condition: None,
        }
    }

    pub fn with_npeople(mut self, npeople: usize) -> Self {
        self.npeople = npeople;
        self
    }

    pub fn with_people_out(mut self, people_out: Vec<String>) -> Self {
        self.people_out = people_out;
        self
    }

    pub fn with_closed_condition(mut self, condition: impl Into<String>) -> Self {
        self.closed_condition = Some(condition.into());
        self
    }

    pub fn with_global_filter(mut self, global_filter: GlobalFilter) -> Self {
        self.global_filter = Some(global_filter);
        self
    }

    /// Whether the bundle asks for a grouped (GROUP BY) query.
    pub fn is_grouped(&self) -> bool {
        self.type_analysis
            .as_ref()
            .is_some_and(TypeAnalysis::is_grouped)
    }

    /// This bundle with the metric-specific predicates of `own` copied in.
    ///
    /// `global_filter` and `closed_condition` belong to the metric, not to
    /// the report, so they always come from the metric's own bundle.
    pub fn for_metric(&self, own: &MetricFilters) -> MetricFilters {
        MetricFilters {
            global_filter: own.global_filter.clone(),
            closed_condition: own.closed_condition.clone(),
            ..self.clone()
        }
    }
}

// ============================================
// Metric trait
// ============================================

/// A computation exposed by a data source's query builder.
///
/// Capabilities a metric does not have keep the default implementation,
/// which reports [`Error::Unimplemented`]. Asking a metric for a capability
/// it lacks is a catalog defect and aborts the report.
pub trait Metric: Send + Sync {
    /// Stable short name, unique within a data source.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Display description.
    fn description(&self) -> &str;

    /// Legacy chart hints.
    fn envision(&self) -> Option<&Value> {
        None
    }

    /// Legacy action hint.
    fn action(&self) -> Option<&str> {
        None
    }

    /// The bundle currently bound to this metric.
    fn filters(&self) -> &MetricFilters;

    /// Mutable access for [`FilterScope`].
    fn filters_mut(&mut self) -> &mut MetricFilters;

    /// Aggregate value(s) for the bound filters.
    fn get_agg(&self) -> Result<ResultMap> {
        Err(Error::unimplemented(self.id(), "get_agg"))
    }

    /// Time series for the bound filters.
    fn get_ts(&self) -> Result<ResultMap> {
        Err(Error::unimplemented(self.id(), "get_ts"))
    }

    /// Value over the `days` before `end_date`, compared with the window
    /// before it. Keys carry the window as suffix (`closed_7`).
    fn get_trends(&self, end_date: NaiveDate, days: u32) -> Result<ResultMap> {
        let _ = (end_date, days);
        Err(Error::unimplemented(self.id(), "get_trends"))
    }
}

// ============================================
// Scoped filter binding
// ============================================

/// Binds a temporary bundle to a metric for the lifetime of the scope.
///
/// The metric's previous bundle is restored on drop, so an early `?`
/// return or a panic inside the invocation never leaves the override in
/// place.
pub struct FilterScope<'a, M: Metric + ?Sized> {
    metric: &'a mut M,
    saved: Option<MetricFilters>,
}

impl<'a, M: Metric + ?Sized> FilterScope<'a, M> {
    /// Bind `bundle` as is.
    pub fn bind(metric: &'a mut M, bundle: MetricFilters) -> Self {
        let saved = std::mem::replace(metric.filters_mut(), bundle);
        Self {
            metric,
            saved: Some(saved),
        }
    }

    /// Bind `bundle` after copying in the metric's own predicates.
    pub fn bind_report(metric: &'a mut M, bundle: &MetricFilters) -> Self {
        let bundle = bundle.for_metric(metric.filters());
        Self::bind(metric, bundle)
    }
}

impl<M: Metric + ?Sized> Deref for FilterScope<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        &*self.metric
    }
}

impl<M: Metric + ?Sized> Drop for FilterScope<'_, M> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.metric.filters_mut() = saved;
        }
    }
}

// ============================================
// Catalog
// ============================================

/// Entry of the metrics definition export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub divid: String,
    pub column: String,
    pub name: String,
    pub desc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envision: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// The metrics a data source offers, in registration order.
#[derive(Default)]
pub struct MetricCatalog {
    metrics: Vec<Box<dyn Metric>>,
}

impl MetricCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric; a metric with the same id is replaced.
    pub fn register(&mut self, metric: Box<dyn Metric>) {
        if let Some(slot) = self.metrics.iter_mut().find(|m| m.id() == metric.id()) {
            tracing::warn!(metric = metric.id(), "Replacing metric with duplicate id");
            *slot = metric;
            return;
        }
        tracing::debug!(metric = metric.id(), "Registered metric");
        self.metrics.push(metric);
    }

    pub fn ids(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.id()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.metrics.iter().any(|m| m.id() == id)
    }

    pub fn get(&self, id: &str) -> Option<&dyn Metric> {
        self.metrics.iter().find(|m| m.id() == id).map(|m| m.as_ref())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Box<dyn Metric>> {
        self.metrics.iter_mut().find(|m| m.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Metric> {
        self.metrics.iter().map(|m| m.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Metric>> {
        self.metrics.iter_mut()
    }

    /// Metrics whose id is in `ids`, in catalog order.
    pub fn selected_mut<'a>(
        &'a mut self,
        ids: &'a [String],
    ) -> impl Iterator<Item = &'a mut Box<dyn Metric>> + 'a {
        self.metrics
            .iter_mut()
            .filter(move |m| ids.iter().any(|id| id == m.id()))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Definitions keyed by `<ds>_<id>`.
    pub fn definitions(&self, ds_name: &str) -> BTreeMap<String, MetricDefinition> {
        self.metrics
            .iter()
            .map(|metric| {
                let divid = format!("{}_{}", ds_name, metric.id());
                let definition = MetricDefinition {
                    divid: divid.clone(),
                    column: metric.id().to_string(),
                    name: metric.name().to_string(),
                    desc: metric.description().to_string(),
                    envision: metric.envision().cloned(),
                    action: metric.action().map(str::to_string),
                };
                (divid, definition)
            })
            .collect()
    }
}

impl std::fmt::Debug for MetricCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricCatalog")
            .field("metrics", &self.ids())
            .finish()
    }
}

// ============================================
// Recorded metrics
// ============================================

/// Canned query results for a [`RecordedMetric`].
///
/// `grouped_*` results answer invocations whose bundle asks for a GROUP BY
/// query; the others answer unfiltered and single-item invocations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordedResults {
    #[serde(default)]
    pub agg: Option<ResultMap>,
    #[serde(default)]
    pub grouped_agg: Option<ResultMap>,
    #[serde(default)]
    pub ts: Option<ResultMap>,
    #[serde(default)]
    pub grouped_ts: Option<ResultMap>,
    /// Keyed by window length in days
    #[serde(default)]
    pub trends: BTreeMap<u32, ResultMap>,
    #[serde(default)]
    pub grouped_trends: BTreeMap<u32, ResultMap>,
}

/// Declarative description of a recorded metric (fixture format).
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedMetricSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub envision: Option<Value>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub closed_condition: Option<String>,
    #[serde(default)]
    pub results: RecordedResults,
}

/// Shared history of the bundles a [`RecordedMetric`] ran with.
///
/// Clones share the same history, so a handle taken before the metric is
/// moved into a catalog keeps observing it.
#[derive(Debug, Clone, Default)]
pub struct InvocationLog(Arc<Mutex<Vec<MetricFilters>>>);

impl InvocationLog {
    /// Recorded bundles, oldest first.
    pub fn calls(&self) -> Vec<MetricFilters> {
        self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn push(&self, filters: MetricFilters) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(filters);
        }
    }
}

/// A metric that replays previously recorded query results.
///
/// Every invocation records the bundle it ran with, which makes the
/// engine's filter handling observable.
pub struct RecordedMetric {
    id: String,
    name: String,
    desc: String,
    envision: Option<Value>,
    action: Option<String>,
    filters: MetricFilters,
    results: RecordedResults,
    invocations: InvocationLog,
}

impl RecordedMetric {
    pub fn new(id: impl Into<String>, results: RecordedResults) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            desc: String::new(),
            id,
            envision: None,
            action: None,
            filters: MetricFilters::default(),
            results,
            invocations: InvocationLog::default(),
        }
    }

    pub fn from_spec(spec: RecordedMetricSpec) -> Self {
        let mut metric = Self::new(spec.id, spec.results);
        if let Some(name) = spec.name {
            metric.name = name;
        }
        metric.desc = spec.desc.unwrap_or_default();
        metric.envision = spec.envision;
        metric.action = spec.action;
        metric.filters.closed_condition = spec.closed_condition;
        metric
    }

    pub fn with_description(mut self, name: impl Into<String>, desc: impl Into<String>) -> Self {
        self.name = name.into();
        self.desc = desc.into();
        self
    }

    pub fn with_filters(mut self, filters: MetricFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Bundles this metric has been invoked with, oldest first.
    pub fn invocations(&self) -> Vec<MetricFilters> {
        self.invocations.calls()
    }

    /// Handle on the invocation history that outlives moving the metric.
    pub fn invocation_log(&self) -> InvocationLog {
        self.invocations.clone()
    }

    fn record(&self) {
        self.invocations.push(self.filters.clone());
    }

    fn replay(
        &self,
        capability: &str,
        plain: Option<&ResultMap>,
        grouped: Option<&ResultMap>,
    ) -> Result<ResultMap> {
        self.record();
        if plain.is_none() && grouped.is_none() {
            return Err(Error::unimplemented(&self.id, capability));
        }
        let recorded = if self.filters.is_grouped() { grouped } else { plain };
        recorded.cloned().ok_or_else(|| Error::Metric {
            metric: self.id.clone(),
            message: format!("no {} result recorded for this filter", capability),
        })
    }
}

impl Metric for RecordedMetric {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.desc
    }

    fn envision(&self) -> Option<&Value> {
        self.envision.as_ref()
    }

    fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    fn filters(&self) -> &MetricFilters {
        &self.filters
    }

    fn filters_mut(&mut self) -> &mut MetricFilters {
        &mut self.filters
    }

    fn get_agg(&self) -> Result<ResultMap> {
        self.replay(
            "get_agg",
            self.results.agg.as_ref(),
            self.results.grouped_agg.as_ref(),
        )
    }

    fn get_ts(&self) -> Result<ResultMap> {
        self.replay(
            "get_ts",
            self.results.ts.as_ref(),
            self.results.grouped_ts.as_ref(),
        )
    }

    fn get_trends(&self, _end_date: NaiveDate, days: u32) -> Result<ResultMap> {
        let plain = if self.results.trends.is_empty() {
            None
        } else {
            Some(self.results.trends.get(&days).cloned().unwrap_or_default())
        };
        let grouped = if self.results.grouped_trends.is_empty() {
            None
        } else {
            Some(
                self.results
                    .grouped_trends
                    .get(&days)
                    .cloned()
                    .unwrap_or_default(),
            )
        };
        self.replay("get_trends", plain.as_ref(), grouped.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::into_result_map;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn report_bundle() -> MetricFilters {
        MetricFilters::new(
            Period::Month,
            date(2013, 1, 1),
            date(2014, 1, 1),
            Some(TypeAnalysis::new("company", None)),
        )
        .with_people_out(vec!["bot".to_string()])
    }

    fn closed_metric() -> RecordedMetric {
        RecordedMetric::new(
            "closed",
            RecordedResults {
                agg: Some(into_result_map(json!({"closed": 12}))),
                grouped_agg: Some(into_result_map(json!({"name": ["a"], "closed": [12]}))),
                ..Default::default()
            },
        )
        .with_filters(
            MetricFilters::default().with_closed_condition("status = 'closed'"),
        )
    }

    #[test]
    fn test_scope_binds_and_restores() {
        let mut metric = closed_metric();
        let original = metric.filters().clone();

        {
            let scope = FilterScope::bind_report(&mut metric, &report_bundle());
            assert!(scope.filters().is_grouped());
            assert_eq!(scope.filters().people_out, vec!["bot".to_string()]);
            // Predicates come from the metric, not the report
            assert_eq!(
                scope.filters().closed_condition.as_deref(),
                Some("status = 'closed'")
            );
            let value = scope.get_agg().unwrap();
            assert_eq!(value["closed"], json!([12]));
        }

        assert_eq!(metric.filters(), &original);
    }

    #[test]
    fn test_scope_restores_on_error() {
        fn run(metric: &mut RecordedMetric) -> Result<ResultMap> {
            let scope = FilterScope::bind_report(metric, &report_bundle());
            scope.get_ts()?;
            Ok(ResultMap::new())
        }

        let mut metric = closed_metric();
        let original = metric.filters().clone();
        let err = run(&mut metric).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(metric.filters(), &original);
    }

    #[test]
    fn test_scope_restores_on_panic() {
        let mut metric = closed_metric();
        let original = metric.filters().clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = FilterScope::bind_report(&mut metric, &report_bundle());
            panic!("query builder exploded");
        }));

        assert!(outcome.is_err());
        assert_eq!(metric.filters(), &original);
    }

    #[test]
    fn test_recorded_metric_selects_grouped_result() {
        let mut metric = closed_metric();
        assert_eq!(metric.get_agg().unwrap()["closed"], json!(12));

        let scope = FilterScope::bind(&mut metric, report_bundle());
        assert_eq!(scope.get_agg().unwrap()["closed"], json!([12]));
        drop(scope);

        let calls = metric.invocations();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].is_grouped());
        assert!(calls[1].is_grouped());
    }

    #[test]
    fn test_recorded_metric_missing_capability() {
        let metric = closed_metric();
        let err = metric.get_trends(date(2014, 1, 1), 7).unwrap_err();
        assert!(matches!(err, Error::Unimplemented { .. }));
    }

    #[test]
    fn test_recorded_metric_missing_grouped_result_is_recoverable() {
        let mut metric = RecordedMetric::new(
            "opened",
            RecordedResults {
                agg: Some(into_result_map(json!({"opened": 3}))),
                ..Default::default()
            },
        );
        let scope = FilterScope::bind(&mut metric, report_bundle());
        let err = scope.get_agg().unwrap_err();
        assert!(matches!(err, Error::Metric { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_catalog_definitions() {
        let mut catalog = MetricCatalog::new();
        catalog.register(Box::new(
            closed_metric().with_description("Closed", "Tickets closed"),
        ));
        catalog.register(Box::new(
            RecordedMetric::new("opened", RecordedResults::default()).with_action("summable"),
        ));

        let defs = catalog.definitions("its");
        assert_eq!(defs.len(), 2);
        let closed = &defs["its_closed"];
        assert_eq!(closed.divid, "its_closed");
        assert_eq!(closed.column, "closed");
        assert_eq!(closed.name, "Closed");
        assert_eq!(closed.desc, "Tickets closed");
        assert_eq!(
            serde_json::to_value(closed).unwrap(),
            json!({"divid": "its_closed", "column": "closed", "name": "Closed", "desc": "Tickets closed"})
        );
        assert_eq!(defs["its_opened"].action.as_deref(), Some("summable"));
    }

    #[test]
    fn test_catalog_replaces_duplicate_ids() {
        let mut catalog = MetricCatalog::new();
        catalog.register(Box::new(closed_metric()));
        catalog.register(Box::new(
            closed_metric().with_description("Closed again", ""),
        ));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("closed").map(|m| m.name()), Some("Closed again"));
    }

    #[test]
    fn test_recorded_metric_spec_from_json() {
        let spec: RecordedMetricSpec = serde_json::from_value(json!({
            "id": "commits",
            "name": "Commits",
            "results": {
                "agg": {"commits": 120},
                "trends": {"7": {"commits_7": 5, "diff_netcommits_7": 1}}
            }
        }))
        .unwrap();
        let metric = RecordedMetric::from_spec(spec);
        assert_eq!(metric.name(), "Commits");
        let trend = metric.get_trends(date(2014, 1, 1), 7).unwrap();
        assert_eq!(trend["commits_7"], json!(5));
        assert!(metric.get_trends(date(2014, 1, 1), 30).unwrap().is_empty());
    }
}
