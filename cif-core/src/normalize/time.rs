use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde_json::Value;

pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// Tried in order. `%.f` also accepts a missing fraction.
const UTC_FORMATS: &[&str] = &[
  "%Y-%m-%dT%H:%M:%S%.fZ",
  "%Y-%m-%dT%H:%M:%SZ",
  "%m/%d/%Y %H:%M:%SZ",
  "%m/%d/%Y %H:%M:%S",
];

/// Parses the timestamp shapes the server emits, all taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  for fmt in UTC_FORMATS {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
      return Some(naive.and_utc());
    }
  }
  DateTime::parse_from_rfc3339(raw)
    .ok()
    .map(|t| t.with_timezone(&Utc))
}

/// Unix epoch seconds (number or numeric string) in the local time zone.
pub fn parse_epoch_local(v: &Value) -> Option<DateTime<Local>> {
  let secs = match v {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
    Value::String(s) => {
      let s = s.trim();
      s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))?
    }
    _ => return None,
  };
  DateTime::<Utc>::from_timestamp(secs, 0).map(|t| t.with_timezone(&Local))
}

pub fn format_utc(t: &DateTime<Utc>) -> String {
  t.format(TIME_FORMAT).to_string()
}

pub fn format_local(t: &DateTime<Local>) -> String {
  t.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}
