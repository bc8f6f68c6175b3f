//! Timestamp utilities
//!
//! Every service stores creation times as fixed-width RFC 3339 text with
//! millisecond precision so that lexical order equals chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub fn from_db(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid stored timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_format_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(5);
        assert_eq!(to_db(&a), "2025-03-01T08:00:00.000Z");
        assert_eq!(to_db(&b), "2025-03-01T08:00:00.005Z");
        assert!(to_db(&a) < to_db(&b));
    }

    #[test]
    fn test_db_roundtrip_keeps_millis() {
        let ts = Utc.timestamp_millis_opt(1_730_000_000_123).unwrap();
        assert_eq!(from_db(&to_db(&ts)).unwrap(), ts);
    }

    #[test]
    fn test_from_db_rejects_garbage() {
        assert!(from_db("yesterday").is_err());
    }
}
