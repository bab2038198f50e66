//! Optional studies
//!
//! Studies are analyses outside of the metric catalog (ages, onion,
//! demographics...) whose results are folded into a data source's global
//! aggregate and evolutionary reports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::filter::FilterSpec;
use crate::metric::MetricFilters;
use crate::report::write_json_file;
use crate::result::{merge_later_wins, ResultMap};

/// Id of the study run once per company by
/// [`ReportWriter::ages_study_com`](crate::report::ReportWriter::ages_study_com).
pub const AGES_STUDY: &str = "ages";

/// A study contributing fields to the global reports.
///
/// A study that cannot follow this calling convention for a data source
/// keeps the default implementation, which reports
/// [`Error::StudyUnsupported`] and makes the study be skipped quietly.
pub trait Study: Send + Sync {
    /// Unique name for this study.
    fn id(&self) -> &str;

    /// Aggregate contribution; `None` when there is nothing to add.
    fn get_agg(&self, ds: &DataSource, filters: &MetricFilters) -> Result<Option<ResultMap>> {
        let _ = (ds, filters);
        Err(Error::StudyUnsupported(self.id().to_string()))
    }

    /// Evolutionary contribution; `None` when there is nothing to add.
    fn get_ts(&self, ds: &DataSource, filters: &MetricFilters) -> Result<Option<ResultMap>> {
        let _ = (ds, filters);
        Err(Error::StudyUnsupported(self.id().to_string()))
    }

    /// Write the study's own report files for the item bound in `filters`
    /// into `destdir`.
    fn create_report(
        &self,
        ds: &DataSource,
        filters: &MetricFilters,
        destdir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let _ = (ds, filters, destdir);
        Err(Error::StudyUnsupported(self.id().to_string()))
    }
}

/// Run every study for `ds` and merge their results later-wins.
///
/// Unsupported studies are skipped with a debug log. A study that fails
/// for any other reason is skipped too, but logged as an error with its
/// id. Only [`Error::Unimplemented`] aborts.
pub fn studies_data(
    ds: &DataSource,
    studies: &[Box<dyn Study>],
    filters: &MetricFilters,
    evolutionary: bool,
) -> Result<ResultMap> {
    let mut data = ResultMap::new();
    tracing::info!(
        ds = ds.name(),
        studies = studies.len(),
        evolutionary,
        "Creating studies"
    );

    for study in studies {
        let outcome = if evolutionary {
            study.get_ts(ds, filters)
        } else {
            study.get_agg(ds, filters)
        };
        match outcome {
            Ok(Some(result)) => merge_later_wins(&mut data, result),
            Ok(None) => {}
            Err(Error::StudyUnsupported(_)) => {
                tracing::debug!(
                    ds = ds.name(),
                    study = study.id(),
                    "Study does not support the standard API, not used"
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(
                    ds = ds.name(),
                    study = study.id(),
                    error = %e,
                    "Study failed, not used"
                );
            }
        }
    }

    Ok(data)
}

/// Study replaying recorded results (fixture format).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordedStudy {
    pub id: String,
    #[serde(default)]
    pub agg: Option<ResultMap>,
    #[serde(default)]
    pub ts: Option<ResultMap>,
    /// Per-item report records, keyed by item
    #[serde(default)]
    pub reports: BTreeMap<String, ResultMap>,
    /// Error message the study fails with, if set
    #[serde(default)]
    pub error: Option<String>,
}

impl RecordedStudy {
    fn replay(&self, recorded: Option<&ResultMap>) -> Result<Option<ResultMap>> {
        if let Some(message) = &self.error {
            return Err(Error::Study {
                study: self.id.clone(),
                message: message.clone(),
            });
        }
        match (&self.agg, &self.ts) {
            (None, None) => Err(Error::StudyUnsupported(self.id.clone())),
            _ => Ok(recorded.cloned()),
        }
    }
}

impl Study for RecordedStudy {
    fn id(&self) -> &str {
        &self.id
    }

    /// Writes `<item>-<ds>-<short>-<study id>.json` when a record exists
    /// for the bound item.
    fn create_report(
        &self,
        ds: &DataSource,
        filters: &MetricFilters,
        destdir: &Path,
    ) -> Result<Vec<PathBuf>> {
        if let Some(message) = &self.error {
            return Err(Error::Study {
                study: self.id.clone(),
                message: message.clone(),
            });
        }
        if self.reports.is_empty() {
            return Err(Error::StudyUnsupported(self.id.clone()));
        }
        let Some(analysis) = &filters.type_analysis else {
            return Ok(Vec::new());
        };
        let Some(item) = analysis.value.as_deref() else {
            return Ok(Vec::new());
        };
        let Some(record) = self.reports.get(item) else {
            return Ok(Vec::new());
        };
        let filename = FilterSpec::new(analysis.field.as_str(), item).item_filename(ds.name(), &self.id);
        Ok(vec![write_json_file(destdir, &filename, record)?])
    }

    fn get_agg(&self, _ds: &DataSource, _filters: &MetricFilters) -> Result<Option<ResultMap>> {
        self.replay(self.agg.as_ref())
    }

    fn get_ts(&self, _ds: &DataSource, _filters: &MetricFilters) -> Result<Option<ResultMap>> {
        self.replay(self.ts.as_ref())
    }
}
