//! Time handling for capture timestamps and query windows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DssError, DssResult};

/// Parse an ISO 8601 timestamp.
///
/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (assumed UTC), or a bare date
/// (midnight UTC).
pub fn parse_datetime(s: &str) -> DssResult<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(DssError::Validation(format!("Invalid ISO 8601 timestamp: '{}'", s)))
}

/// An inclusive time window for catalog queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> DssResult<Self> {
        if start > end {
            return Err(DssError::Validation(format!(
                "Date range start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a window from two ISO 8601 strings.
    ///
    /// A bare end date covers that whole day.
    pub fn parse(start: &str, end: &str) -> DssResult<Self> {
        let start_dt = parse_datetime(start)?;
        let end_trimmed = end.trim();
        let end_dt = match NaiveDate::parse_from_str(end_trimmed, "%Y-%m-%d") {
            Ok(date) => date
                .and_hms_opt(23, 59, 59)
                .map(|ndt| Utc.from_utc_datetime(&ndt))
                .ok_or_else(|| DssError::Validation(format!("Invalid end date '{}'", end)))?,
            Err(_) => parse_datetime(end_trimmed)?,
        };
        Self::new(start_dt, end_dt)
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_datetime_variants() {
        let a = parse_datetime("2024-03-01T10:30:00Z").unwrap();
        let b = parse_datetime("2024-03-01T10:30:00").unwrap();
        assert_eq!(a, b);

        let c = parse_datetime("2024-03-01").unwrap();
        assert_eq!(c.day(), 1);
        assert!(parse_datetime("March 1st").is_err());
    }

    #[test]
    fn test_date_range_end_of_day() {
        let range = DateRange::parse("2024-01-01", "2024-01-31").unwrap();
        let late = parse_datetime("2024-01-31T18:00:00Z").unwrap();
        assert!(range.contains(&late));
        assert!(!range.contains(&parse_datetime("2024-02-01").unwrap()));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = DateRange::parse("2024-06-01", "2024-01-01").unwrap_err();
        assert!(matches!(err, DssError::Validation(_)));
    }
}
