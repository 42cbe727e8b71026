use serde_json::{Map, Value};

pub mod record;
mod rules;
pub mod time;

pub use record::{FieldValue, Normalized, NormalizedRecord, Scalar};

/// Start of an Elasticsearch result document embedded as a string in `data`.
pub const SEARCH_ENVELOPE_PREFIX: &str = r#"{"hits":"#;

/// How "no result" is spelled by the server and by local storage.
pub const EMPTY_MARKER: &str = "{}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DatePolicy {
  /// Keep unparsable timestamps as raw values and log a warning.
  #[default]
  Lenient,
  /// Abort the whole normalization on the first unparsable timestamp.
  Strict,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
  #[error("unexpected response shape: {0}")]
  Shape(String),

  #[error("could not parse {field} value {value:?} as a timestamp")]
  DateParse { field: String, value: String },
}

/// Normalized items of one payload, produced on demand and in server order.
pub struct Items {
  elements: std::vec::IntoIter<Value>,
  policy: DatePolicy,
}

impl Iterator for Items {
  type Item = Result<Normalized, NormalizeError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let element = self.elements.next()?;
      if let Some(item) = classify(element, self.policy).transpose() {
        return Some(item);
      }
    }
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.elements.len()))
  }
}

/// Unwraps the payload and returns a lazy sequence over its elements.
/// Shape errors surface here; date errors surface per item.
pub fn normalize(payload: Value, policy: DatePolicy) -> Result<Items, NormalizeError> {
  let elements = unwrap_elements(payload)?;
  Ok(Items {
    elements: elements.into_iter(),
    policy,
  })
}

/// All-or-nothing: any error discards the items produced so far.
pub fn normalize_all(payload: Value, policy: DatePolicy) -> Result<Vec<Normalized>, NormalizeError> {
  normalize(payload, policy)?.collect()
}

fn unwrap_elements(payload: Value) -> Result<Vec<Value>, NormalizeError> {
  match payload {
    Value::Object(mut map) => match map.remove("data") {
      Some(Value::String(s)) if s.trim_start().starts_with(SEARCH_ENVELOPE_PREFIX) => {
        search_hits(&s)
      }
      Some(data) => Ok(into_elements(data)),
      None if map.get("message").and_then(Value::as_str) == Some("success") => Ok(Vec::new()),
      None => Err(NormalizeError::Shape(
        "payload has neither data nor a success message".to_string(),
      )),
    },
    Value::Array(items) => Ok(items),
    other => Ok(vec![other]),
  }
}

fn into_elements(data: Value) -> Vec<Value> {
  match data {
    Value::Array(items) => items,
    Value::Null => Vec::new(),
    other => vec![other],
  }
}

fn search_hits(raw: &str) -> Result<Vec<Value>, NormalizeError> {
  let envelope: Value = serde_json::from_str(raw)
    .map_err(|e| NormalizeError::Shape(format!("search envelope is not valid JSON: {e}")))?;

  let hits = envelope
    .get("hits")
    .and_then(|h| h.get("hits"))
    .and_then(Value::as_array)
    .ok_or_else(|| NormalizeError::Shape("search envelope has no hits.hits array".to_string()))?;

  hits
    .iter()
    .map(|hit| {
      hit
        .get("_source")
        .cloned()
        .ok_or_else(|| NormalizeError::Shape("search hit has no _source".to_string()))
    })
    .collect()
}

fn classify(element: Value, policy: DatePolicy) -> Result<Option<Normalized>, NormalizeError> {
  let item = match element {
    Value::String(s) if s.trim() == EMPTY_MARKER => return Ok(None),
    Value::Object(m) if m.is_empty() => return Ok(None),
    Value::String(s) => Normalized::Scalar(match s.trim().parse::<i64>() {
      Ok(n) => Scalar::Integer(n),
      Err(_) => Scalar::Text(s),
    }),
    Value::Number(n) => Normalized::Scalar(match n.as_i64() {
      Some(i) => Scalar::Integer(i),
      None => Scalar::Text(n.to_string()),
    }),
    Value::Bool(b) => Normalized::Boolean(b),
    Value::Object(m) => Normalized::Record(build_record(m, policy)?),
    other => Normalized::Scalar(Scalar::Text(other.to_string())),
  };
  Ok(Some(item))
}

fn build_record(source: Map<String, Value>, policy: DatePolicy) -> Result<NormalizedRecord, NormalizeError> {
  let mut out = NormalizedRecord::new();
  for (key, value) in source {
    let (name, field) = rules::apply(&key, value, policy)?;
    out.insert(name, field);
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::BTreeSet;

  fn all(payload: Value) -> Vec<Normalized> {
    normalize_all(payload, DatePolicy::Lenient).unwrap()
  }

  #[test]
  fn indicator_list_becomes_records_in_order() {
    let items = all(json!({
      "status": "success",
      "data": [
        {"indicator": "example.com", "itype": "fqdn", "tlp": "green"},
        {"indicator": "10.0.0.1", "itype": "ipv4", "tlp": "amber"}
      ]
    }));

    assert_eq!(items.len(), 2);
    let first = items[0].as_record().unwrap();
    assert_eq!(first.keys().collect::<Vec<_>>(), vec!["Indicator", "IType", "TLP"]);
    assert_eq!(first.get("Indicator").and_then(FieldValue::as_str), Some("example.com"));
    assert_eq!(
      items[1].as_record().unwrap().get("TLP").and_then(FieldValue::as_str),
      Some("amber")
    );
  }

  #[test]
  fn records_are_sparse() {
    let items = all(json!({"data": [{"indicator": "a"}, {"tlp": "red", "tags": "x"}]}));
    assert_eq!(items[0].as_record().unwrap().len(), 1);
    assert!(items[0].as_record().unwrap().get("TLP").is_none());
    assert_eq!(items[1].as_record().unwrap().len(), 2);
  }

  #[test]
  fn reporttime_round_trips_to_seconds() {
    let items = all(json!({"data": [{"reporttime": "2020-02-10T17:51:55.734794Z"}]}));
    let rt = items[0].as_record().unwrap().get("ReportTime").unwrap();
    assert_eq!(rt.to_string(), "2020-02-10T17:51:55Z");
  }

  #[test]
  fn tags_become_a_set() {
    let items = all(json!({"data": [{"tags": "malware,botnet"}]}));
    let tags = items[0].as_record().unwrap().get("Tag").and_then(FieldValue::as_tags).cloned();
    let expected: BTreeSet<String> = ["malware", "botnet"].iter().map(|s| s.to_string()).collect();
    assert_eq!(tags, Some(expected));
  }

  #[test]
  fn portlist_none_is_null() {
    let items = all(json!({"data": [{"portlist": "None"}]}));
    let port = items[0].as_record().unwrap().get("Port").unwrap();
    assert!(port.is_null());
  }

  #[test]
  fn empty_marker_contributes_nothing() {
    assert!(all(json!({"data": ["{}"]})).is_empty());
    assert!(all(json!({"data": "{}"})).is_empty());
    assert!(all(json!({"data": [{}]})).is_empty());

    let items = all(json!({"data": ["{}", {"indicator": "a"}, "{}"]}));
    assert_eq!(items.len(), 1);
  }

  #[test]
  fn integer_string_becomes_bare_integer() {
    assert_eq!(all(json!({"data": "3"})), vec![Normalized::Scalar(Scalar::Integer(3))]);
    assert_eq!(all(json!({"data": 12})), vec![Normalized::Scalar(Scalar::Integer(12))]);
  }

  #[test]
  fn non_numeric_string_is_kept_verbatim() {
    assert_eq!(
      all(json!({"data": "pong"})),
      vec![Normalized::Scalar(Scalar::Text("pong".to_string()))]
    );
  }

  #[test]
  fn boolean_passes_through() {
    assert_eq!(all(json!({"data": true})), vec![Normalized::Boolean(true)]);
    assert_eq!(all(json!(false)), vec![Normalized::Boolean(false)]);
  }

  #[test]
  fn search_envelope_is_unwrapped() {
    let payload = json!({
      "data": "{\"hits\":{\"hits\":[{\"_source\":{\"tlp\":\"green\"}}]}}"
    });
    let items = all(payload);
    assert_eq!(items.len(), 1);
    assert_eq!(
      items[0].as_record().unwrap().get("TLP").and_then(FieldValue::as_str),
      Some("green")
    );
  }

  #[test]
  fn search_envelope_without_hits_is_a_shape_error() {
    let err = normalize(json!({"data": "{\"hits\":{\"total\":0}}"}), DatePolicy::Lenient)
      .err()
      .unwrap();
    assert!(matches!(err, NormalizeError::Shape(_)));

    let err = normalize(json!({"data": "{\"hits\": nope"}), DatePolicy::Lenient)
      .err()
      .unwrap();
    assert!(matches!(err, NormalizeError::Shape(_)));
  }

  #[test]
  fn success_message_without_data_is_empty() {
    assert!(all(json!({"status": "success", "message": "success"})).is_empty());
  }

  #[test]
  fn unexpected_shape_is_rejected() {
    let err = normalize(json!({"status": "success", "message": "ok"}), DatePolicy::Lenient)
      .err()
      .unwrap();
    assert!(err.to_string().contains("unexpected response shape"));
  }

  #[test]
  fn strict_dates_abort_the_whole_batch() {
    let payload = json!({"data": [
      {"indicator": "a", "reporttime": "2020-02-10T17:51:55Z"},
      {"indicator": "b", "reporttime": "sometime"}
    ]});
    let err = normalize_all(payload, DatePolicy::Strict).unwrap_err();
    assert!(matches!(err, NormalizeError::DateParse { .. }));
  }

  #[test]
  fn items_are_produced_lazily() {
    let payload = json!({"data": [{"indicator": "a"}, {"reporttime": "sometime"}]});
    let mut items = normalize(payload, DatePolicy::Strict).unwrap();
    assert!(items.next().unwrap().is_ok());
    assert!(items.next().unwrap().is_err());
    assert!(items.next().is_none());
  }

  #[test]
  fn normalizing_the_same_payload_twice_is_identical() {
    let payload = json!({"data": [{"indicator": "a", "tags": "x,y", "lasttime": "02/10/2020 17:51:55Z"}]});
    assert_eq!(all(payload.clone()), all(payload));
  }
}
