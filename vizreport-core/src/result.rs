//! Result mappings produced by metrics and reports.
//!
//! A [`ResultMap`] is an insertion-ordered map from field name to a JSON
//! value: a scalar, an array aligned to the master item list (grouped
//! results) or an array aligned to time buckets (time series).

use serde_json::{Map, Value};

/// Ordered mapping from field/metric key to value.
pub type ResultMap = Map<String, Value>;

/// Merge `other` into `acc`; on duplicate keys the value from `other` wins.
///
/// Keys already in `acc` keep their position, new keys are appended in
/// `other`'s order.
pub fn merge_later_wins(acc: &mut ResultMap, other: ResultMap) {
    for (key, value) in other {
        acc.insert(key, value);
    }
}

/// Fold several mappings left to right with [`merge_later_wins`].
pub fn merge_all<I>(parts: I) -> ResultMap
where
    I: IntoIterator<Item = ResultMap>,
{
    let mut merged = ResultMap::new();
    for part in parts {
        merge_later_wins(&mut merged, part);
    }
    merged
}

/// Rename `from` to `to`, keeping the field's position.
///
/// An existing `to` field is replaced. Does nothing when `from` is absent.
pub fn rename_field(data: ResultMap, from: &str, to: &str) -> ResultMap {
    if from == to || !data.contains_key(from) {
        return data;
    }
    let mut renamed = ResultMap::new();
    for (key, value) in data {
        if key == to {
            continue;
        }
        if key == from {
            renamed.insert(to.to_string(), value);
        } else {
            renamed.insert(key, value);
        }
    }
    renamed
}

/// Length of the array stored under `field`, if it is an array.
pub fn column_len(data: &ResultMap, field: &str) -> Option<usize> {
    data.get(field).and_then(Value::as_array).map(Vec::len)
}

/// Convert a JSON object value into a [`ResultMap`].
///
/// Non-object values produce an empty mapping.
pub fn into_result_map(value: Value) -> ResultMap {
    match value {
        Value::Object(map) => map,
        _ => ResultMap::new(),
    }
}
