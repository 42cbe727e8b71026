use super::time::{format_local, format_utc};
use chrono::{DateTime, Local, Utc};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  Null,
  Time(DateTime<Utc>),
  LocalTime(DateTime<Local>),
  Tags(BTreeSet<String>),
  Text(String),
  Raw(Value),
}

impl FieldValue {
  pub fn is_null(&self) -> bool {
    matches!(self, FieldValue::Null | FieldValue::Raw(Value::Null))
  }

  pub fn as_time(&self) -> Option<DateTime<Utc>> {
    match self {
      FieldValue::Time(t) => Some(*t),
      _ => None,
    }
  }

  pub fn as_local_time(&self) -> Option<DateTime<Local>> {
    match self {
      FieldValue::LocalTime(t) => Some(*t),
      _ => None,
    }
  }

  pub fn as_tags(&self) -> Option<&BTreeSet<String>> {
    match self {
      FieldValue::Tags(t) => Some(t),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      FieldValue::Text(s) => Some(s),
      FieldValue::Raw(Value::String(s)) => Some(s),
      _ => None,
    }
  }
}

impl fmt::Display for FieldValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FieldValue::Null => Ok(()),
      FieldValue::Time(t) => f.write_str(&format_utc(t)),
      FieldValue::LocalTime(t) => f.write_str(&format_local(t)),
      FieldValue::Tags(tags) => {
        let joined: Vec<&str> = tags.iter().map(String::as_str).collect();
        f.write_str(&joined.join(", "))
      }
      FieldValue::Text(s) => f.write_str(s),
      FieldValue::Raw(v) => write_raw(f, v),
    }
  }
}

fn write_raw(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
  match v {
    Value::Null => Ok(()),
    Value::String(s) => f.write_str(s),
    Value::Array(items) => {
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          f.write_str(", ")?;
        }
        write_raw(f, item)?;
      }
      Ok(())
    }
    other => write!(f, "{other}"),
  }
}

impl Serialize for FieldValue {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      FieldValue::Null => serializer.serialize_none(),
      FieldValue::Time(t) => serializer.serialize_str(&format_utc(t)),
      FieldValue::LocalTime(t) => serializer.serialize_str(&format_local(t)),
      FieldValue::Tags(tags) => {
        let mut seq = serializer.serialize_seq(Some(tags.len()))?;
        for tag in tags {
          seq.serialize_element(tag)?;
        }
        seq.end()
      }
      FieldValue::Text(s) => serializer.serialize_str(s),
      FieldValue::Raw(v) => v.serialize(serializer),
    }
  }
}

/// Sparse record: only the keys the server sent, in the order it sent them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
  fields: Vec<(String, FieldValue)>,
}

impl NormalizedRecord {
  pub fn new() -> Self {
    Self::default()
  }

  /// Later values for an existing key replace the earlier one in place.
  pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
    let key = key.into();
    if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
      slot.1 = value;
    } else {
      self.fields.push((key, value));
    }
  }

  pub fn get(&self, key: &str) -> Option<&FieldValue> {
    self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.fields.iter().map(|(k, _)| k.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
    self.fields.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }
}

impl Serialize for NormalizedRecord {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.fields.len()))?;
    for (k, v) in &self.fields {
      map.serialize_entry(k, v)?;
    }
    map.end()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
  Integer(i64),
  Text(String),
}

impl fmt::Display for Scalar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Scalar::Integer(n) => write!(f, "{n}"),
      Scalar::Text(s) => f.write_str(s),
    }
  }
}

/// One output item. Endpoints that only report an affected-row count or an
/// acknowledgement produce `Scalar` or `Boolean` instead of records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Normalized {
  Record(NormalizedRecord),
  Scalar(Scalar),
  Boolean(bool),
}

impl Normalized {
  pub fn as_record(&self) -> Option<&NormalizedRecord> {
    match self {
      Normalized::Record(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_scalar(&self) -> Option<&Scalar> {
    match self {
      Normalized::Scalar(s) => Some(s),
      _ => None,
    }
  }
}
