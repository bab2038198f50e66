//! Report files
//!
//! [`ReportWriter`] runs the engine for a data source and writes every
//! resulting dataset as a pretty-printed JSON file into one destination
//! directory. File names follow the conventions of [`DataSource`] and
//! [`FilterSpec`], which dashboards rely on.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::ReportConfig;
use crate::datasource::DataSource;
use crate::engine::{AggregationEngine, ReportRequest};
use crate::error::{Error, Result};
use crate::filter::{sanitize_item, FilterSpec};
use crate::metric::{MetricFilters, DEFAULT_NPEOPLE};
use crate::period::{parse_date, Period};
use crate::reshape::GroupReshaper;
use crate::result::{merge_later_wins, ResultMap};
use crate::study::{studies_data, Study, AGES_STUDY};
use crate::types::ReportMode;

/// Dimension the ages study is split on.
const COMPANY_DIMENSION: &str = "company";

/// Writes the report files of one run.
pub struct ReportWriter<'a> {
    destdir: PathBuf,
    config: &'a ReportConfig,
    studies: &'a [Box<dyn Study>],
    period: Period,
    start: NaiveDate,
    end: NaiveDate,
    identities_db: String,
    npeople: usize,
}

impl<'a> ReportWriter<'a> {
    pub fn new(
        destdir: impl Into<PathBuf>,
        config: &'a ReportConfig,
        period: Period,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            destdir: destdir.into(),
            config,
            studies: &[],
            period,
            start,
            end,
            identities_db: String::new(),
            npeople: DEFAULT_NPEOPLE,
        }
    }

    pub fn with_identities_db(mut self, identities_db: impl Into<String>) -> Self {
        self.identities_db = identities_db.into();
        self
    }

    /// Size of people listings.
    pub fn with_npeople(mut self, npeople: usize) -> Self {
        self.npeople = npeople;
        self
    }

    /// Studies merged into the global reports.
    pub fn with_studies(mut self, studies: &'a [Box<dyn Study>]) -> Self {
        self.studies = studies;
        self
    }

    pub fn destdir(&self) -> &Path {
        &self.destdir
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Serialize `value` into `<destdir>/<filename>`.
    pub fn write_json<T: Serialize + ?Sized>(&self, filename: &str, value: &T) -> Result<PathBuf> {
        write_json_file(&self.destdir, filename, value)
    }

    fn request(&self, mode: ReportMode) -> ReportRequest {
        ReportRequest::new(mode, self.period, self.start, self.end)
            .with_identities_db(self.identities_db.clone())
    }

    fn engine(&self) -> AggregationEngine<'a> {
        AggregationEngine::new(self.config)
    }

    /// Global report of `ds` for `mode`, studies included.
    fn global_data(&self, ds: &mut DataSource, mode: ReportMode) -> Result<ResultMap> {
        let mut data = self.engine().compute(ds, &self.request(mode))?;
        if !self.studies.is_empty() {
            let filters = MetricFilters::new(self.period, self.start, self.end, None)
                .with_people_out(self.engine().people_out(ds));
            let studies = studies_data(ds, self.studies, &filters, mode.is_evolutionary())?;
            merge_later_wins(&mut data, studies);
        }
        Ok(data)
    }

    /// `<ds>-static.json`
    pub fn create_agg_report(&self, ds: &mut DataSource) -> Result<PathBuf> {
        let data = self.global_data(ds, ReportMode::Aggregate)?;
        self.write_json(&ds.agg_filename(None), &data)
    }

    /// `<ds>-evolutionary.json`
    pub fn create_evolutionary_report(&self, ds: &mut DataSource) -> Result<PathBuf> {
        let data = self.global_data(ds, ReportMode::TimeSeries)?;
        self.write_json(&ds.evolutionary_filename(None), &data)
    }

    /// Every file of `dimension` computed with GROUP BY queries: the item
    /// listing plus one static and one evolutionary file per item.
    ///
    /// Items listed in the `<plural>_out` config entry get no files.
    pub fn create_filter_report_all(
        &self,
        ds: &mut DataSource,
        dimension: &str,
    ) -> Result<Vec<PathBuf>> {
        let filter = FilterSpec::grouped(dimension);
        // Items are compared in their sanitized form
        let bots: Vec<String> = self
            .config
            .filter_bots(&filter.name_plural())
            .iter()
            .map(|bot| sanitize_item(bot))
            .collect();
        let reshaper = GroupReshaper::for_data_source(ds);
        let mut written = Vec::new();

        for mode in [ReportMode::Aggregate, ReportMode::TimeSeries] {
            let request = self.request(mode).with_filter(filter.clone());
            let data = self.engine().compute(ds, &request)?;
            if data.is_empty() {
                tracing::info!(
                    ds = ds.name(),
                    filter = %filter,
                    mode = ?mode,
                    "Empty filter report, no files written"
                );
                continue;
            }

            let exploded =
                match reshaper.explode(data, &filter, mode.is_evolutionary(), self.period) {
                    Ok(exploded) => exploded,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            ds = ds.name(),
                            filter = %filter,
                            mode = ?mode,
                            error = %e,
                            "Cannot split filter report per item, no files written"
                        );
                        continue;
                    }
                };
            if let Some(listing) = &exploded.listing {
                written.push(self.write_json(&listing.filename, &listing.record)?);
            }
            for (item, file) in &exploded.items {
                if bots.contains(item) {
                    tracing::debug!(ds = ds.name(), item = item.as_str(), "Skipping excluded item");
                    continue;
                }
                written.push(self.write_json(&file.filename, &file.record)?);
            }
        }

        tracing::info!(
            ds = ds.name(),
            filter = %filter,
            files = written.len(),
            "Created filter report"
        );
        Ok(written)
    }

    /// `<ds>-<plural>-summary.json`, capped at the people listing size.
    pub fn create_filter_summary_report(
        &self,
        ds: &DataSource,
        dimension: &str,
    ) -> Result<PathBuf> {
        let filter = FilterSpec::grouped(dimension);
        let summary = ds.backend().filter_summary(
            &filter,
            self.period,
            self.start,
            self.end,
            &self.identities_db,
            self.npeople,
        )?;
        self.write_json(&ds.filter_summary_filename(&filter), &summary)
    }

    /// `<ds>-top.json`
    pub fn create_top_report(&self, ds: &DataSource) -> Result<PathBuf> {
        let top = ds.backend().top_data(
            self.start,
            self.end,
            &self.identities_db,
            None,
            self.npeople,
        )?;
        self.write_json(&ds.top_filename(None), &top)
    }

    /// People listing plus an evolutionary and a static file per person.
    ///
    /// Without `people_ids` the backend's top people are used; a backend
    /// with no people produces no files.
    pub fn create_people_report(
        &self,
        ds: &DataSource,
        people_ids: Option<&[String]>,
    ) -> Result<Vec<PathBuf>> {
        let people = match people_ids {
            Some(ids) if !ids.is_empty() => ids.to_vec(),
            _ => {
                let top = ds.backend().top_people(
                    self.start,
                    self.end,
                    &self.identities_db,
                    self.npeople,
                )?;
                match top {
                    Some(people) => people,
                    None => {
                        tracing::info!(ds = ds.name(), "No people to report");
                        return Ok(Vec::new());
                    }
                }
            }
        };

        let mut written = vec![self.write_json(&ds.top_people_filename(), &people)?];
        for uuid in &people {
            let evol = ds.backend().person_evol(
                uuid,
                self.period,
                self.start,
                self.end,
                &self.identities_db,
            )?;
            written.push(self.write_json(&ds.person_evol_filename(uuid), &evol)?);

            let agg = ds
                .backend()
                .person_agg(uuid, self.start, self.end, &self.identities_db)?;
            written.push(self.write_json(&ds.person_agg_filename(uuid), &agg)?);
        }
        Ok(written)
    }

    /// Run the `ages` study once per company in `items`, each time bound to
    /// that company. `<ds>_start_date` / `<ds>_end_date` override the run's
    /// dates. Does nothing when no `ages` study is configured.
    pub fn ages_study_com(&self, ds: &DataSource, items: &[String]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        let Some(ages) = self.studies.iter().find(|study| study.id() == AGES_STUDY) else {
            tracing::debug!(ds = ds.name(), "No ages study configured");
            return Ok(written);
        };

        let start = match self.config.study_start_date(ds.name()) {
            Some(raw) => parse_date(&raw)?,
            None => self.start,
        };
        let end = match self.config.study_end_date(ds.name()) {
            Some(raw) => parse_date(&raw)?,
            None => self.end,
        };
        let people_out = self.engine().people_out(ds);

        for item in items {
            let company = FilterSpec::new(COMPANY_DIMENSION, item.as_str());
            let filters = MetricFilters::new(self.period, start, end, Some(company.type_analysis()))
                .with_people_out(people_out.clone());
            match ages.create_report(ds, &filters, &self.destdir) {
                Ok(paths) => written.extend(paths),
                Err(Error::StudyUnsupported(_)) => {
                    tracing::debug!(
                        ds = ds.name(),
                        study = ages.id(),
                        "Study has no per-company reports, not used"
                    );
                    break;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(
                        ds = ds.name(),
                        study = ages.id(),
                        company = item.as_str(),
                        error = %e,
                        "Study failed for company, not used"
                    );
                }
            }
        }

        tracing::info!(
            ds = ds.name(),
            companies = items.len(),
            files = written.len(),
            %start,
            %end,
            "Created ages study by company"
        );
        Ok(written)
    }

    /// [`ages_study_com`](Self::ages_study_com) over every company the
    /// backend knows for the run's dates.
    pub fn create_ages_company_report(&self, ds: &DataSource) -> Result<Vec<PathBuf>> {
        let companies = ds
            .backend()
            .filter_items(
                &FilterSpec::grouped(COMPANY_DIMENSION),
                self.start,
                self.end,
                &self.identities_db,
            )?
            .unwrap_or_default();
        self.ages_study_com(ds, &companies)
    }

    /// `<ds>-metrics-definition.json`
    pub fn create_metrics_definition_report(&self, ds: &DataSource) -> Result<PathBuf> {
        let filename = format!("{}-metrics-definition.json", ds.name());
        self.write_json(&filename, &ds.metrics_definition())
    }
}

/// Serialize `value` as pretty JSON into `<destdir>/<filename>`, creating
/// `destdir` when needed.
pub fn write_json_file<T: Serialize + ?Sized>(
    destdir: &Path,
    filename: &str,
    value: &T,
) -> Result<PathBuf> {
    fs::create_dir_all(destdir)?;
    let path = destdir.join(filename);
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    tracing::debug!(path = %path.display(), "Wrote report file");
    Ok(path)
}
