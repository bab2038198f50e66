//! Report dimensions and their derived query parameters.
//!
//! A [`FilterSpec`] names an axis (`"company"`, `"company+country"`) and
//! optionally one concrete item on that axis. Without an item the filter
//! asks for every item at once through a single GROUP BY query; this is the
//! *grouped* mode that routes results through the aligner.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Query steering pair derived from a filter: the group field and the
/// concrete value, or `None` for grouped queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAnalysis {
    pub field: String,
    pub value: Option<String>,
}

impl TypeAnalysis {
    pub fn new(field: impl Into<String>, value: Option<String>) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// `true` when the query returns one row per item (GROUP BY).
    pub fn is_grouped(&self) -> bool {
        self.value.is_none()
    }
}

/// A report dimension, optionally narrowed to one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    dimension: String,
    value: Option<String>,
}

impl FilterSpec {
    /// Filter on a single item of `dimension`.
    pub fn new(dimension: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            value: Some(value.into()),
        }
    }

    /// Filter on every item of `dimension` at once.
    pub fn grouped(dimension: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            value: None,
        }
    }

    pub fn dimension(&self) -> &str {
        &self.dimension
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_grouped(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_composite(&self) -> bool {
        self.dimension.contains('+')
    }

    pub fn type_analysis(&self) -> TypeAnalysis {
        TypeAnalysis::new(self.dimension.clone(), self.value.clone())
    }

    /// Plural of the dimension, used for listing files and `<plural>_out`
    /// bot lists.
    pub fn name_plural(&self) -> String {
        self.dimension
            .split('+')
            .map(plural_of)
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Short tag used inside per-item filenames.
    pub fn name_short(&self) -> String {
        self.dimension
            .split('+')
            .map(short_of)
            .collect::<Vec<_>>()
            .join("+")
    }

    /// File listing every item of this dimension for data source `ds`.
    pub fn filename(&self, ds: &str) -> String {
        format!("{}-{}.json", ds, self.name_plural())
    }

    pub fn static_filename(&self, ds: &str) -> String {
        self.item_filename(ds, "static")
    }

    pub fn evolutionary_filename(&self, ds: &str) -> String {
        self.item_filename(ds, "evolutionary")
    }

    pub fn top_filename(&self, ds: &str) -> String {
        self.item_filename(ds, "top")
    }

    /// `<item>-<ds>-<short>-<kind>.json`, or `<ds>-<short>-<kind>.json`
    /// for a grouped filter.
    pub fn item_filename(&self, ds: &str, kind: &str) -> String {
        match &self.value {
            Some(item) => format!(
                "{}-{}-{}-{}.json",
                sanitize_item(item),
                ds,
                self.name_short(),
                kind
            ),
            None => format!("{}-{}-{}.json", ds, self.name_short(), kind),
        }
    }
}

impl std::fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.dimension, value),
            None => write!(f, "{}=*", self.dimension),
        }
    }
}

/// Replace path separators so an item can be used in a filename.
pub fn sanitize_item(item: &str) -> String {
    item.replace('/', "_")
}

fn plural_of(dimension: &str) -> String {
    match dimension {
        "repository" => "repos".to_string(),
        "company" => "companies".to_string(),
        "country" => "countries".to_string(),
        "people2" => "people2".to_string(),
        other if other.ends_with('s') => other.to_string(),
        other => format!("{}s", other),
    }
}

fn short_of(dimension: &str) -> String {
    match dimension {
        "repository" => "rep".to_string(),
        "company" => "com".to_string(),
        "country" => "cou".to_string(),
        "domain" => "dom".to_string(),
        "project" => "prj".to_string(),
        "people2" => "people2".to_string(),
        other => other.chars().take(3).collect(),
    }
}

/// Predicate applied to every metric of a data source.
///
/// Configured in the legacy list form
/// `['ticket_type,,ticket_type','"Bug",,"New Feature"']`: a field list and a
/// value list, each separated by `,,`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalFilter {
    pub fields: String,
    pub values: String,
}

impl GlobalFilter {
    pub fn parse(raw: &str) -> Result<Self> {
        let stripped = raw.trim().replace(['[', ']'], "");
        let parts: Vec<&str> = stripped.split("','").collect();
        let &[fields, values] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "global filter must have a field list and a value list: {}",
                raw
            )));
        };

        Ok(Self {
            fields: fields.strip_prefix('\'').unwrap_or(fields).to_string(),
            values: values.strip_suffix('\'').unwrap_or(values).to_string(),
        })
    }

    /// Individual field names.
    pub fn field_list(&self) -> Vec<&str> {
        self.fields.split(",,").collect()
    }

    /// Individual values, in field order.
    pub fn value_list(&self) -> Vec<&str> {
        self.values.split(",,").collect()
    }

    /// The filter as a type analysis pair.
    pub fn type_analysis(&self) -> TypeAnalysis {
        TypeAnalysis::new(self.fields.clone(), Some(self.values.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_analysis_grouped() {
        let grouped = FilterSpec::grouped("company");
        assert!(grouped.is_grouped());
        assert_eq!(grouped.type_analysis(), TypeAnalysis::new("company", None));
        assert!(grouped.type_analysis().is_grouped());

        let single = FilterSpec::new("company", "Bitergia");
        assert!(!single.type_analysis().is_grouped());
        assert_eq!(single.type_analysis().value.as_deref(), Some("Bitergia"));
    }

    #[test]
    fn test_names() {
        assert_eq!(FilterSpec::grouped("repository").name_plural(), "repos");
        assert_eq!(FilterSpec::grouped("domain").name_plural(), "domains");
        assert_eq!(
            FilterSpec::grouped("company+country").name_plural(),
            "companies+countries"
        );
        assert_eq!(FilterSpec::grouped("company+country").name_short(), "com+cou");
        assert_eq!(FilterSpec::grouped("tracker").name_short(), "tra");
    }

    #[test]
    fn test_filenames() {
        let filter = FilterSpec::new("repository", "https://git.example.org/a/b");
        assert_eq!(
            filter.static_filename("scm"),
            "https:__git.example.org_a_b-scm-rep-static.json"
        );
        assert_eq!(
            filter.evolutionary_filename("its"),
            "https:__git.example.org_a_b-its-rep-evolutionary.json"
        );
        assert_eq!(
            FilterSpec::grouped("company").filename("mls"),
            "mls-companies.json"
        );
        assert_eq!(
            FilterSpec::new("company", "Acme").top_filename("scm"),
            "Acme-scm-com-top.json"
        );
    }

    #[test]
    fn test_global_filter_parse() {
        let filter =
            GlobalFilter::parse(r#"['ticket_type,,ticket_type','"Bug",,"New Feature"']"#).unwrap();
        assert_eq!(filter.fields, "ticket_type,,ticket_type");
        assert_eq!(filter.values, r#""Bug",,"New Feature""#);
        assert_eq!(filter.field_list(), vec!["ticket_type", "ticket_type"]);
        assert_eq!(filter.value_list(), vec![r#""Bug""#, r#""New Feature""#]);
        assert!(!filter.type_analysis().is_grouped());
    }

    #[test]
    fn test_global_filter_rejects_single_list() {
        let err = GlobalFilter::parse("['ticket_type']").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
