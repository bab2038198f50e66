//! # vizreport-core
//!
//! Core library for vizreport - a metrics report engine for software
//! development analytics dashboards.
//!
//! This library provides:
//! - The aggregation engine merging per-metric results into one report
//! - Alignment of GROUP BY results against a master item list
//! - Reshaping of grouped results into per-item report files
//! - Filter, metric and data source models
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Report shapes
//!
//! Every data source produces three shapes of data:
//! - **Aggregate:** one value per metric, plus activity date bounds and
//!   7/30/365 day trend windows
//! - **Evolutionary:** one series per metric over time buckets
//! - **Grouped:** either of the above for all items of a filter dimension
//!   at once, one array entry per item
//!
//! ## Example
//!
//! ```rust,no_run
//! use vizreport_core::{AggregationEngine, Config, ReportRequest};
//! use vizreport_core::datasource::DataSourceSpec;
//!
//! let config = Config::load().expect("failed to load config");
//! let spec: DataSourceSpec = serde_json::from_str("{\"kind\": \"scm\"}").expect("bad spec");
//! let mut ds = spec.build().expect("failed to build data source");
//!
//! let start = chrono::NaiveDate::from_ymd_opt(2013, 1, 1).unwrap();
//! let end = chrono::NaiveDate::from_ymd_opt(2014, 1, 1).unwrap();
//! let request = ReportRequest::aggregate(config.output.period, start, end);
//! let data = AggregationEngine::new(&config.report)
//!     .compute(&mut ds, &request)
//!     .expect("report failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use datasource::{DataSource, QueryBackend};
pub use engine::{AggregationEngine, ReportRequest};
pub use error::{Error, Result};
pub use filter::{FilterSpec, GlobalFilter, TypeAnalysis};
pub use metric::{FilterScope, Metric, MetricCatalog, MetricFilters};
pub use period::Period;
pub use report::ReportWriter;
pub use reshape::GroupReshaper;
pub use result::{merge_later_wins, ResultMap};
pub use types::*;

// Public modules
pub mod align;
pub mod config;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod filter;
pub mod logging;
pub mod metric;
pub mod period;
pub mod report;
pub mod reshape;
pub mod result;
pub mod study;
pub mod types;
