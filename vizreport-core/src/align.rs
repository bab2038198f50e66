//! Alignment of grouped (GROUP BY) results against the master item list.
//!
//! Each grouped metric returns columns for the items it found, in whatever
//! order the query produced them. The [`Aligner`] rewrites such a result so
//! that it holds exactly one entry per master item, in master order, with a
//! zero (aggregate) or an all-zero series (evolutionary) for items the
//! metric did not report. After alignment a grouped result is
//! indistinguishable from one computed item by item.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::period::{Period, TimeBucket};
use crate::result::ResultMap;

/// Aligns grouped results to one master item list.
#[derive(Debug, Clone)]
pub struct Aligner {
    items: Vec<String>,
    evolutionary: bool,
    period: Period,
    buckets: Vec<TimeBucket>,
}

impl Aligner {
    /// Aligner for aggregate (scalar per item) results.
    pub fn aggregate(items: Vec<String>) -> Self {
        Self {
            items,
            evolutionary: false,
            period: Period::default(),
            buckets: Vec::new(),
        }
    }

    /// Aligner for evolutionary results whose series span `[start, end]`.
    pub fn evolutionary(
        items: Vec<String>,
        period: Period,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self> {
        Ok(Self {
            items,
            evolutionary: true,
            period,
            buckets: period.buckets(start, end)?,
        })
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn is_evolutionary(&self) -> bool {
        self.evolutionary
    }

    /// Align `data` on the identities stored in its `id_field` column.
    ///
    /// Columns with one entry per identity are reordered to master order and
    /// filled for missing items. Anything else (scalars, columns of another
    /// length) is passed through untouched.
    pub fn align(&self, source_id: &str, data: &ResultMap, id_field: &str) -> Result<ResultMap> {
        let ids = data
            .get(id_field)
            .and_then(Value::as_array)
            .ok_or_else(|| Error::MissingJoinField {
                source_id: source_id.to_string(),
                field: id_field.to_string(),
            })?;

        let mut positions: HashMap<String, usize> = HashMap::with_capacity(ids.len());
        for (idx, id) in ids.iter().enumerate() {
            positions.entry(identity_key(id)).or_insert(idx);
        }

        let source_periods = if self.evolutionary {
            data.get(self.period.as_str())
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(Value::as_i64).collect::<Vec<_>>())
        } else {
            None
        };

        let mut aligned = ResultMap::new();
        aligned.insert(
            id_field.to_string(),
            self.items.iter().map(|item| json!(item)).collect(),
        );

        for (field, value) in data {
            if field == id_field {
                continue;
            }
            if self.evolutionary && self.period.is_time_field(field) {
                continue;
            }

            let column = match value.as_array() {
                Some(column) if column.len() == ids.len() => column,
                _ => {
                    tracing::debug!(
                        source = source_id,
                        field = field.as_str(),
                        "Column not aligned to identities, passing through"
                    );
                    aligned.insert(field.clone(), value.clone());
                    continue;
                }
            };

            let filled: Vec<Value> = self
                .items
                .iter()
                .map(|item| match positions.get(item) {
                    Some(&idx) => self.complete(&column[idx], source_periods.as_deref()),
                    None => self.fill_value(),
                })
                .collect();
            aligned.insert(field.clone(), Value::Array(filled));
        }

        if self.evolutionary {
            for (field, value) in self.period.time_columns(&self.buckets) {
                aligned.insert(field, value);
            }
        }

        let missing = self
            .items
            .iter()
            .filter(|item| !positions.contains_key(*item))
            .count();
        tracing::debug!(
            source = source_id,
            items = self.items.len(),
            filled = missing,
            "Aligned grouped result"
        );

        Ok(aligned)
    }

    /// Neutral value for an item the metric did not report.
    fn fill_value(&self) -> Value {
        if self.evolutionary {
            Period::zero_series(&self.buckets)
        } else {
            json!(0)
        }
    }

    /// Spread an item's series over the full bucket range.
    ///
    /// Only applies when the source result carries its period ids; other
    /// values are returned as they are.
    fn complete(&self, value: &Value, source_periods: Option<&[i64]>) -> Value {
        let (Some(series), Some(periods)) = (value.as_array(), source_periods) else {
            return value.clone();
        };
        if series.len() != periods.len() {
            return value.clone();
        }

        let by_period: HashMap<i64, &Value> = periods.iter().copied().zip(series).collect();
        Value::Array(
            self.buckets
                .iter()
                .map(|bucket| {
                    by_period
                        .get(&bucket.period_id)
                        .map(|v| (*v).clone())
                        .unwrap_or_else(|| json!(0))
                })
                .collect(),
        )
    }
}

/// String form of an identity value.
pub fn identity_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Align `data` against `items` in one call.
pub fn fill_and_order_items(
    items: &[String],
    data: &ResultMap,
    id_field: &str,
    evolutionary: bool,
    period: Period,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<ResultMap> {
    let aligner = if evolutionary {
        Aligner::evolutionary(items.to_vec(), period, start, end)?
    } else {
        Aligner::aggregate(items.to_vec())
    };
    aligner.align(id_field, data, id_field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::into_result_map;

    fn items(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_order_and_fill_aggregate() {
        let data = into_result_map(json!({
            "name": ["c", "a"],
            "commits": [30, 10],
            "authors": [3, 1]
        }));
        let aligned = Aligner::aggregate(items(&["a", "b", "c"]))
            .align("commits", &data, "name")
            .unwrap();

        assert_eq!(aligned["name"], json!(["a", "b", "c"]));
        assert_eq!(aligned["commits"], json!([10, 0, 30]));
        assert_eq!(aligned["authors"], json!([1, 0, 3]));
    }

    #[test]
    fn test_unaligned_columns_pass_through() {
        let data = into_result_map(json!({
            "name": ["a"],
            "total": 99,
            "partial": [1, 2, 3]
        }));
        let aligned = Aligner::aggregate(items(&["a", "b"]))
            .align("x", &data, "name")
            .unwrap();

        assert_eq!(aligned["total"], json!(99));
        assert_eq!(aligned["partial"], json!([1, 2, 3]));
    }

    #[test]
    fn test_missing_join_field() {
        let data = into_result_map(json!({"commits": [1]}));
        let err = Aligner::aggregate(items(&["a"]))
            .align("commits", &data, "name")
            .unwrap_err();
        assert!(matches!(err, Error::MissingJoinField { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_non_string_identities() {
        let data = into_result_map(json!({"uuid": [7, 3], "sent": [70, 30]}));
        let aligned = Aligner::aggregate(items(&["3", "5", "7"]))
            .align("sent", &data, "uuid")
            .unwrap();
        assert_eq!(aligned["sent"], json!([30, 0, 70]));
    }

    #[test]
    fn test_evolutionary_fill_with_zero_series() {
        let data = into_result_map(json!({
            "name": ["b"],
            "commits": [[4, 5, 6]],
            "month": [2014 * 12, 2014 * 12 + 1, 2014 * 12 + 2]
        }));
        let aligned = fill_and_order_items(
            &items(&["a", "b"]),
            &data,
            "name",
            true,
            Period::Month,
            date(2014, 1, 1),
            date(2014, 3, 1),
        )
        .unwrap();

        assert_eq!(aligned["commits"], json!([[0, 0, 0], [4, 5, 6]]));
        assert_eq!(aligned["id"], json!([0, 1, 2]));
        assert_eq!(aligned["date"], json!(["Jan 2014", "Feb 2014", "Mar 2014"]));
    }

    #[test]
    fn test_evolutionary_series_completed_onto_range() {
        // Query only returned the buckets with activity
        let data = into_result_map(json!({
            "name": ["a"],
            "commits": [[8]],
            "month": [2014 * 12 + 1]
        }));
        let aligned = fill_and_order_items(
            &items(&["a"]),
            &data,
            "name",
            true,
            Period::Month,
            date(2014, 1, 1),
            date(2014, 3, 1),
        )
        .unwrap();

        assert_eq!(aligned["commits"], json!([[0, 8, 0]]));
        assert_eq!(aligned["month"], json!([2014 * 12, 2014 * 12 + 1, 2014 * 12 + 2]));
    }

    #[test]
    fn test_empty_master_list() {
        let data = into_result_map(json!({"name": ["a"], "commits": [1]}));
        let aligned = Aligner::aggregate(Vec::new())
            .align("commits", &data, "name")
            .unwrap();
        assert_eq!(aligned["name"], json!([]));
        assert_eq!(aligned["commits"], json!([]));
    }
}
