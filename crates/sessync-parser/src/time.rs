use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a record timestamp: RFC 3339 strings, naive ISO strings (as UTC), or
/// Unix seconds/milliseconds.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.abs() >= 1_000_000_000_000 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

pub(crate) fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Track the earliest and latest of a stream of timestamps.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Bounds {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Bounds {
    pub fn observe(&mut self, ts: Option<DateTime<Utc>>) {
        let Some(ts) = ts else { return };
        self.start = Some(self.start.map_or(ts, |s| s.min(ts)));
        self.end = Some(self.end.map_or(ts, |e| e.max(ts)));
    }

    pub fn merge(self, other: Bounds) -> Bounds {
        let mut merged = self;
        merged.observe(other.start);
        merged.observe(other.end);
        merged
    }
}
