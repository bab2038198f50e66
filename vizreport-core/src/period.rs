//! Report periods and time buckets.
//!
//! Time series results share four columns across all items: `id`
//! (sequential bucket index), `unixtime` (bucket start), `date` (display
//! label) and a column named after the period holding the period id.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::result::ResultMap;

/// Granularity of time series buckets and trend windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// Names of the columns shared by every item of a time series.
    pub fn time_fields(&self) -> [&'static str; 4] {
        ["unixtime", "id", "date", self.as_str()]
    }

    /// Whether `field` is one of the shared time series columns.
    pub fn is_time_field(&self, field: &str) -> bool {
        self.time_fields().contains(&field)
    }

    /// First day of the bucket containing `date`.
    pub fn bucket_start(&self, date: NaiveDate) -> Result<NaiveDate> {
        let start = match self {
            Period::Day => Some(date),
            Period::Week => {
                Some(date - Duration::days(i64::from(date.weekday().num_days_from_monday())))
            }
            Period::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            Period::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        };
        start.ok_or_else(|| Error::InvalidDate(date.to_string()))
    }

    /// Identifier of the bucket containing `date`.
    pub fn period_id(&self, date: NaiveDate) -> i64 {
        match self {
            Period::Day => date.signed_duration_since(NaiveDate::default()).num_days(),
            Period::Week => {
                let iso = date.iso_week();
                i64::from(iso.year()) * 100 + i64::from(iso.week())
            }
            Period::Month => i64::from(date.year()) * 12 + i64::from(date.month0()),
            Period::Year => i64::from(date.year()),
        }
    }

    fn label(&self, date: NaiveDate) -> String {
        match self {
            Period::Day => date.format("%Y-%m-%d").to_string(),
            Period::Week => {
                let iso = date.iso_week();
                format!("W{:02} {}", iso.week(), iso.year())
            }
            Period::Month => date.format("%b %Y").to_string(),
            Period::Year => date.year().to_string(),
        }
    }

    fn next(&self, bucket_start: NaiveDate) -> Result<NaiveDate> {
        let next = match self {
            Period::Day => bucket_start.succ_opt(),
            Period::Week => bucket_start.checked_add_signed(Duration::days(7)),
            Period::Month => {
                let (year, month) = if bucket_start.month() == 12 {
                    (bucket_start.year() + 1, 1)
                } else {
                    (bucket_start.year(), bucket_start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
            }
            Period::Year => NaiveDate::from_ymd_opt(bucket_start.year() + 1, 1, 1),
        };
        next.ok_or_else(|| Error::InvalidDate(format!("no {} after {}", self, bucket_start)))
    }

    /// All buckets touching `[start, end]`, in chronological order.
    ///
    /// Returns an empty list when `end` is before `start`.
    pub fn buckets(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<TimeBucket>> {
        let mut buckets = Vec::new();
        if end < start {
            return Ok(buckets);
        }

        let mut current = self.bucket_start(start)?;
        while current <= end {
            buckets.push(TimeBucket {
                id: buckets.len() as i64,
                unixtime: current
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or_default(),
                date: self.label(current),
                period_id: self.period_id(current),
            });
            current = self.next(current)?;
        }
        Ok(buckets)
    }

    /// Shared time columns for `buckets`.
    pub fn time_columns(&self, buckets: &[TimeBucket]) -> ResultMap {
        let mut columns = ResultMap::new();
        columns.insert(
            "unixtime".to_string(),
            buckets.iter().map(|b| json!(b.unixtime)).collect(),
        );
        columns.insert("id".to_string(), buckets.iter().map(|b| json!(b.id)).collect());
        columns.insert(
            "date".to_string(),
            buckets.iter().map(|b| json!(b.date)).collect(),
        );
        columns.insert(
            self.as_str().to_string(),
            buckets.iter().map(|b| json!(b.period_id)).collect(),
        );
        columns
    }

    /// A series of zeros, one per bucket.
    pub fn zero_series(buckets: &[TimeBucket]) -> Value {
        Value::Array(vec![json!(0); buckets.len()])
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "day" | "days" => Ok(Period::Day),
            "week" | "weeks" => Ok(Period::Week),
            "month" | "months" => Ok(Period::Month),
            "year" | "years" => Ok(Period::Year),
            _ => Err(format!("unknown period: {}", s)),
        }
    }
}

/// One time series bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Sequential index starting at 0
    pub id: i64,
    /// Bucket start as a unix timestamp (UTC midnight)
    pub unixtime: i64,
    /// Display label
    pub date: String,
    /// Period identifier (see [`Period::period_id`])
    pub period_id: i64,
}

/// Parse a report date.
///
/// Accepts `YYYY-MM-DD`, optionally wrapped in single quotes as query
/// builders expect them.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim().trim_matches('\'');
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|e| Error::InvalidDate(format!("{}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_buckets_span_range() {
        let buckets = Period::Month
            .buckets(date(2013, 11, 15), date(2014, 2, 1))
            .unwrap();
        let labels: Vec<_> = buckets.iter().map(|b| b.date.as_str()).collect();
        assert_eq!(labels, vec!["Nov 2013", "Dec 2013", "Jan 2014", "Feb 2014"]);
        assert_eq!(buckets[0].id, 0);
        assert_eq!(buckets[3].id, 3);
        assert_eq!(buckets[2].period_id, 2014 * 12);
    }

    #[test]
    fn test_week_buckets_start_on_monday() {
        // 2014-01-01 is a Wednesday
        let buckets = Period::Week
            .buckets(date(2014, 1, 1), date(2014, 1, 14))
            .unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].date, "W01 2014");
        assert_eq!(
            buckets[0].unixtime,
            date(2013, 12, 30)
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp()
        );
    }

    #[test]
    fn test_day_and_year_buckets() {
        let days = Period::Day.buckets(date(2014, 2, 27), date(2014, 3, 1)).unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[2].date, "2014-03-01");

        let years = Period::Year.buckets(date(2010, 6, 1), date(2012, 1, 1)).unwrap();
        let ids: Vec<_> = years.iter().map(|b| b.period_id).collect();
        assert_eq!(ids, vec![2010, 2011, 2012]);
    }

    #[test]
    fn test_empty_range() {
        let buckets = Period::Month.buckets(date(2014, 2, 1), date(2014, 1, 1)).unwrap();
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_time_columns() {
        let buckets = Period::Month.buckets(date(2014, 1, 1), date(2014, 2, 1)).unwrap();
        let columns = Period::Month.time_columns(&buckets);
        let keys: Vec<_> = columns.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["unixtime", "id", "date", "month"]);
        assert_eq!(columns["id"], json!([0, 1]));
        assert_eq!(Period::zero_series(&buckets), json!([0, 0]));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2013-01-01").unwrap(), date(2013, 1, 1));
        assert_eq!(parse_date("'2014-12-31'").unwrap(), date(2014, 12, 31));
        assert!(matches!(parse_date("yesterday"), Err(Error::InvalidDate(_))));
    }

    #[test]
    fn test_period_from_str() {
        assert_eq!("week".parse::<Period>(), Ok(Period::Week));
        assert_eq!("months".parse::<Period>(), Ok(Period::Month));
        assert!("fortnight".parse::<Period>().is_err());
    }
}
