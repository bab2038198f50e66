//! Core domain types for vizreport
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Data source** | A family of activity data (commits, issues, mails, reviews) |
//! | **Metric** | A named computation producing an aggregate, a time series or a trend |
//! | **Item** | One value of a report dimension (a repository, a company, a person) |
//! | **Grouped result** | Columnar GROUP-BY output: one array per field, index-aligned |
//! | **Master item list** | Ordered item identifiers every grouped result is aligned to |

use serde::{Deserialize, Serialize};

// ============================================
// Report mode
// ============================================

/// Shape of report requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    /// Single snapshot values (plus date bounds and trend windows)
    Aggregate,
    /// Values per time bucket
    TimeSeries,
}

impl ReportMode {
    /// Suffix used by the `<ds>_metrics_<mode>` configuration keys.
    pub fn config_suffix(&self) -> &'static str {
        match self {
            ReportMode::Aggregate => "agg",
            ReportMode::TimeSeries => "ts",
        }
    }

    pub fn is_evolutionary(&self) -> bool {
        matches!(self, ReportMode::TimeSeries)
    }
}

// ============================================
// Data source kinds
// ============================================

/// Composite dimensions whose grouped results carry a generic `filter` column.
pub const COMPOSITE_FILTERS: &[&str] = &["company+country", "company+project"];

/// Known data source families.
///
/// Kind-specific behaviour (column renames, summary listings, group aliases)
/// is kept as data on the variant rather than spread across type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    /// Source code management (commits)
    #[serde(alias = "scm")]
    CommitHistory,
    /// Issue tracking systems
    #[serde(alias = "its")]
    IssueTracker,
    /// Mailing lists
    #[serde(alias = "mls")]
    MailingList,
    /// Code review systems
    #[serde(alias = "scr")]
    ReviewTool,
}

impl DataSourceKind {
    /// Conventional short name, also used as default data source name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceKind::CommitHistory => "scm",
            DataSourceKind::IssueTracker => "its",
            DataSourceKind::MailingList => "mls",
            DataSourceKind::ReviewTool => "scr",
        }
    }

    /// Column that holds item identities in grouped results and is renamed
    /// to `name` before explosion.
    pub fn identity_column(&self) -> Option<&'static str> {
        match self {
            DataSourceKind::IssueTracker | DataSourceKind::ReviewTool => Some("url"),
            DataSourceKind::MailingList => Some("mailing_list_url"),
            DataSourceKind::CommitHistory => None,
        }
    }

    /// Whether composite filters produce a generic `filter` column for this kind.
    pub fn renames_composite_filter(&self) -> bool {
        matches!(
            self,
            DataSourceKind::IssueTracker | DataSourceKind::CommitHistory
        )
    }

    /// Fields copied into the per-filter item listing in aggregate mode.
    pub fn summary_fields(&self) -> &'static [&'static str] {
        match self {
            DataSourceKind::CommitHistory => &["authors_365", "name", "commits_365"],
            DataSourceKind::IssueTracker => &["closed_365", "closers_365", "name"],
            DataSourceKind::MailingList => &["sent_365", "senders_365", "name"],
            DataSourceKind::ReviewTool => &[
                "submitted",
                "review_time_days_median",
                "review_time_pending_upload_ReviewsWaitingForReviewer_days_median",
                "name",
            ],
        }
    }

    /// Alias of the GROUP BY column the query builder uses for `dimension`.
    pub fn group_field_alias(&self, dimension: &str) -> &'static str {
        if COMPOSITE_FILTERS.contains(&dimension) || dimension.contains('+') {
            return "filter";
        }
        match dimension {
            "repository" => self.identity_column().unwrap_or("name"),
            "people2" => "uuid",
            _ => "name",
        }
    }
}

impl std::fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scm" | "commit_history" => Ok(DataSourceKind::CommitHistory),
            "its" | "issue_tracker" => Ok(DataSourceKind::IssueTracker),
            "mls" | "mailing_list" => Ok(DataSourceKind::MailingList),
            "scr" | "review_tool" => Ok(DataSourceKind::ReviewTool),
            _ => Err(format!("unknown data source kind: {}", s)),
        }
    }
}
