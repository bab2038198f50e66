//! Reshaping of grouped results into per-item records.
//!
//! A grouped report is columnar: one array per field, index-aligned on the
//! `name` column. Dashboards expect one file per item instead, so the
//! [`GroupReshaper`] explodes the columns into one record per item, plus
//! (aggregate reports only) a listing of all items with a few summary
//! fields.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::align::identity_key;
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::filter::{sanitize_item, FilterSpec};
use crate::period::Period;
use crate::result::{rename_field, ResultMap};
use crate::types::DataSourceKind;

/// Identity column every exploded record is keyed by.
pub const NAME_FIELD: &str = "name";

/// Fields that never become per-item metrics.
const NON_METRIC_FIELDS: &[&str] = &["filter_type"];

/// One output file of an explosion.
#[derive(Debug, Clone, PartialEq)]
pub struct ReshapedFile {
    pub filename: String,
    pub record: ResultMap,
}

/// Result of [`GroupReshaper::explode`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exploded {
    /// Item listing; aggregate reports only
    pub listing: Option<ReshapedFile>,
    /// Per-item records, in `name` order, keyed by item
    pub items: Vec<(String, ReshapedFile)>,
    /// Fields left out of every per-item record
    pub dropped_fields: Vec<String>,
}

impl Exploded {
    /// Every file to write, listing first.
    pub fn files(&self) -> impl Iterator<Item = &ReshapedFile> {
        self.listing
            .iter()
            .chain(self.items.iter().map(|(_, file)| file))
    }
}

/// Explodes grouped results of one data source.
#[derive(Debug, Clone)]
pub struct GroupReshaper {
    kind: DataSourceKind,
    ds_name: String,
}

impl GroupReshaper {
    pub fn new(kind: DataSourceKind, ds_name: impl Into<String>) -> Self {
        Self {
            kind,
            ds_name: ds_name.into(),
        }
    }

    pub fn for_data_source(ds: &DataSource) -> Self {
        Self::new(ds.kind(), ds.name())
    }

    /// Explode the grouped result `data` computed for `filter`.
    pub fn explode(
        &self,
        data: ResultMap,
        filter: &FilterSpec,
        evolutionary: bool,
        period: Period,
    ) -> Result<Exploded> {
        let data = normalize(self.kind, data, filter);
        let names: Vec<String> = data
            .get(NAME_FIELD)
            .and_then(Value::as_array)
            .ok_or_else(|| Error::MissingJoinField {
                source_id: self.ds_name.clone(),
                field: NAME_FIELD.to_string(),
            })?
            .iter()
            .map(identity_key)
            .collect();

        let mut exploded = Exploded::default();

        if !evolutionary {
            let mut listing = ResultMap::new();
            for field in self.kind.summary_fields() {
                if let Some(value) = data.get(*field) {
                    listing.insert(field.to_string(), value.clone());
                }
            }
            exploded.listing = Some(ReshapedFile {
                filename: filter.filename(&self.ds_name),
                record: listing,
            });
        }

        let time_fields = period.time_fields();
        let metric_fields: Vec<&String> = data
            .keys()
            .filter(|field| field.as_str() != NAME_FIELD)
            .filter(|field| !time_fields.contains(&field.as_str()))
            .filter(|field| !NON_METRIC_FIELDS.contains(&field.as_str()))
            .collect();

        // Length guard, once per field
        let mut retained = Vec::with_capacity(metric_fields.len());
        for field in metric_fields {
            match data[field.as_str()].as_array() {
                Some(column) if column.len() >= names.len() => retained.push((field, column)),
                _ => {
                    tracing::warn!(
                        ds = self.ds_name.as_str(),
                        field = field.as_str(),
                        "Field not supported in GROUP BY, not included"
                    );
                    exploded.dropped_fields.push(field.clone());
                }
            }
        }

        let mut non_series = BTreeSet::new();
        for (i, item) in names.iter().enumerate() {
            let mut record = ResultMap::new();
            for (field, column) in &retained {
                let value = &column[i];
                if evolutionary && !value.is_array() {
                    if non_series.insert((*field).clone()) {
                        tracing::warn!(
                            ds = self.ds_name.as_str(),
                            field = field.as_str(),
                            "Evolutionary field not supported in GROUP BY, not included"
                        );
                    }
                    continue;
                }
                record.insert((*field).clone(), value.clone());
            }

            let item_filter = FilterSpec::new(filter.dimension(), item.as_str());
            let filename = if evolutionary {
                for field in time_fields {
                    if let Some(shared) = data.get(field) {
                        record.insert(field.to_string(), shared.clone());
                    }
                }
                item_filter.evolutionary_filename(&self.ds_name)
            } else {
                item_filter.static_filename(&self.ds_name)
            };
            exploded
                .items
                .push((item.clone(), ReshapedFile { filename, record }));
        }

        exploded.dropped_fields.extend(non_series);
        tracing::debug!(
            ds = self.ds_name.as_str(),
            filter = %filter,
            items = exploded.items.len(),
            dropped = exploded.dropped_fields.len(),
            "Exploded grouped result"
        );
        Ok(exploded)
    }
}

/// Rename the kind-specific identity column to `name`.
///
/// Identity URLs are sanitized for use in filenames. Composite filters on
/// kinds that group them under a generic `filter` column are renamed too.
pub fn normalize(kind: DataSourceKind, data: ResultMap, filter: &FilterSpec) -> ResultMap {
    let mut data = data;
    if let Some(column) = kind.identity_column() {
        if let Some(Value::Array(urls)) = data.get(column) {
            let sanitized: Value = urls
                .iter()
                .map(|url| Value::String(sanitize_item(&identity_key(url))))
                .collect();
            data.insert(column.to_string(), sanitized);
            data = rename_field(data, column, NAME_FIELD);
        }
    }
    if kind.renames_composite_filter() && filter.is_composite() {
        data = rename_field(data, "filter", NAME_FIELD);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::into_result_map;
    use serde_json::json;

    fn map(value: Value) -> ResultMap {
        into_result_map(value)
    }

    fn scm() -> GroupReshaper {
        GroupReshaper::new(DataSourceKind::CommitHistory, "scm")
    }

    #[test]
    fn test_round_trip() {
        let data = map(json!({"name": ["x", "y"], "metric1": [10, 20]}));
        let filter = FilterSpec::grouped("company");
        let exploded = scm()
            .explode(data.clone(), &filter, false, Period::Month)
            .unwrap();

        assert_eq!(exploded.items.len(), 2);
        assert_eq!(exploded.items[0].0, "x");
        assert_eq!(Value::Object(exploded.items[0].1.record.clone()), json!({"metric1": 10}));
        assert_eq!(Value::Object(exploded.items[1].1.record.clone()), json!({"metric1": 20}));
        assert_eq!(exploded.items[0].1.filename, "x-scm-com-static.json");

        // Re-merge by name
        let mut rebuilt = ResultMap::new();
        rebuilt.insert(
            NAME_FIELD.to_string(),
            exploded.items.iter().map(|(name, _)| json!(name)).collect(),
        );
        rebuilt.insert(
            "metric1".to_string(),
            exploded
                .items
                .iter()
                .map(|(_, file)| file.record["metric1"].clone())
                .collect(),
        );
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_listing_has_summary_fields() {
        let data = map(json!({
            "name": ["x", "y"],
            "commits_365": [1, 2],
            "authors_365": [3, 4],
            "commits": [5, 6]
        }));
        let exploded = scm()
            .explode(data, &FilterSpec::grouped("company"), false, Period::Month)
            .unwrap();

        let listing = exploded.listing.unwrap();
        assert_eq!(listing.filename, "scm-companies.json");
        let keys: Vec<_> = listing.record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["authors_365", "name", "commits_365"]);
    }

    #[test]
    fn test_length_guard_drops_field_once() {
        let data = map(json!({
            "name": ["x", "y", "z"],
            "commits": [1, 2, 3],
            "authors": [1],
            "total": 6
        }));
        let exploded = scm()
            .explode(data, &FilterSpec::grouped("company"), false, Period::Month)
            .unwrap();

        assert_eq!(exploded.dropped_fields, vec!["authors", "total"]);
        for (_, file) in &exploded.items {
            assert!(!file.record.contains_key("authors"));
            assert!(!file.record.contains_key("total"));
            assert!(file.record.contains_key("commits"));
        }
    }

    #[test]
    fn test_url_renamed_and_sanitized() {
        let data = map(json!({
            "url": ["https://bugs.example.org/proj1"],
            "closed": [5]
        }));
        let normalized = normalize(
            DataSourceKind::IssueTracker,
            data,
            &FilterSpec::grouped("repository"),
        );

        assert!(!normalized.contains_key("url"));
        assert_eq!(normalized["name"], json!(["https:__bugs.example.org_proj1"]));
    }

    #[test]
    fn test_mailing_list_and_composite_normalization() {
        let mls = normalize(
            DataSourceKind::MailingList,
            map(json!({"mailing_list_url": ["lists/dev"], "sent": [1]})),
            &FilterSpec::grouped("repository"),
        );
        assert_eq!(mls["name"], json!(["lists_dev"]));

        let composite = normalize(
            DataSourceKind::IssueTracker,
            map(json!({"filter": ["acme_es"], "closed": [2]})),
            &FilterSpec::grouped("company+country"),
        );
        assert_eq!(composite["name"], json!(["acme_es"]));

        // Review tools never group composite filters under `filter`
        let scr = normalize(
            DataSourceKind::ReviewTool,
            map(json!({"filter": ["acme_es"]})),
            &FilterSpec::grouped("company+country"),
        );
        assert!(scr.contains_key("filter"));
    }

    #[test]
    fn test_evolutionary_records() {
        let data = map(json!({
            "name": ["x", "y"],
            "commits": [[1, 2], [3, 4]],
            "authors": [1, 2],
            "unixtime": [0, 100],
            "id": [0, 1],
            "date": ["Jan 2013", "Feb 2013"],
            "month": [24156, 24157]
        }));
        let exploded = scm()
            .explode(data, &FilterSpec::grouped("company"), true, Period::Month)
            .unwrap();

        assert!(exploded.listing.is_none());
        assert_eq!(exploded.dropped_fields, vec!["authors"]);
        let (item, file) = &exploded.items[1];
        assert_eq!(item, "y");
        assert_eq!(file.filename, "y-scm-com-evolutionary.json");
        assert_eq!(file.record["commits"], json!([3, 4]));
        assert_eq!(file.record["month"], json!([24156, 24157]));
        assert!(!file.record.contains_key("authors"));
    }

    #[test]
    fn test_missing_name_column() {
        let err = scm()
            .explode(
                map(json!({"commits": [1]})),
                &FilterSpec::grouped("company"),
                false,
                Period::Month,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MissingJoinField { .. }));
    }
}
