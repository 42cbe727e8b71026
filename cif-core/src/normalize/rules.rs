use super::record::FieldValue;
use super::time::{parse_epoch_local, parse_timestamp};
use super::{DatePolicy, NormalizeError};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transform {
  Timestamp,
  EpochLocal,
  Tags,
  Uppercase,
  NoneAsNull,
  Passthrough,
}

pub(crate) struct Rule {
  pub input: &'static str,
  pub output: &'static str,
  pub transform: Transform,
}

pub(crate) const RULES: &[Rule] = &[
  Rule { input: "reporttime", output: "ReportTime", transform: Transform::Timestamp },
  Rule { input: "firsttime", output: "FirstTime", transform: Transform::Timestamp },
  Rule { input: "lasttime", output: "LastTime", transform: Transform::Timestamp },
  Rule { input: "expires", output: "ExpireTime", transform: Transform::Timestamp },
  Rule { input: "last_activity_at", output: "LastActivityTime", transform: Transform::EpochLocal },
  Rule { input: "tags", output: "Tag", transform: Transform::Tags },
  Rule { input: "tlp", output: "TLP", transform: Transform::Passthrough },
  Rule { input: "itype", output: "IType", transform: Transform::Passthrough },
  Rule { input: "groups", output: "Group", transform: Transform::Passthrough },
  Rule { input: "protocol", output: "Protocol", transform: Transform::Uppercase },
  Rule { input: "portlist", output: "Port", transform: Transform::NoneAsNull },
];

pub(crate) fn lookup(key: &str) -> Option<&'static Rule> {
  RULES.iter().find(|r| r.input == key)
}

/// Maps one source property to its output key and value. Keys without a rule
/// fall through to a title-cased passthrough.
pub(crate) fn apply(
  key: &str,
  value: Value,
  policy: DatePolicy,
) -> Result<(String, FieldValue), NormalizeError> {
  let Some(rule) = lookup(key) else {
    return Ok((title_case(key), passthrough(value)));
  };

  let out = match rule.transform {
    Transform::Timestamp => timestamp(key, value, policy)?,
    Transform::EpochLocal => epoch(key, value, policy)?,
    Transform::Tags => tags(value),
    Transform::Uppercase => match value {
      Value::String(s) => FieldValue::Text(s.to_uppercase()),
      other => passthrough(other),
    },
    Transform::NoneAsNull => match value {
      Value::String(s) if s == "None" => FieldValue::Null,
      other => passthrough(other),
    },
    Transform::Passthrough => passthrough(value),
  };
  Ok((rule.output.to_string(), out))
}

/// `reference_tlp` -> `ReferenceTlp`; only first letters change, so `CC` stays `CC`.
pub(crate) fn title_case(key: &str) -> String {
  let mut out = String::with_capacity(key.len());
  for piece in key.split('_').filter(|p| !p.is_empty()) {
    let mut chars = piece.chars();
    if let Some(first) = chars.next() {
      out.extend(first.to_uppercase());
      out.push_str(chars.as_str());
    }
  }
  if out.is_empty() {
    key.to_string()
  } else {
    out
  }
}

fn passthrough(value: Value) -> FieldValue {
  match value {
    Value::Null => FieldValue::Null,
    other => FieldValue::Raw(other),
  }
}

fn timestamp(key: &str, value: Value, policy: DatePolicy) -> Result<FieldValue, NormalizeError> {
  let parsed = match &value {
    Value::Null => return Ok(FieldValue::Null),
    Value::String(s) if s.trim().is_empty() => return Ok(FieldValue::Null),
    Value::String(s) => parse_timestamp(s),
    _ => None,
  };
  match parsed {
    Some(t) => Ok(FieldValue::Time(t)),
    None => unparsed_date(key, value, policy),
  }
}

fn epoch(key: &str, value: Value, policy: DatePolicy) -> Result<FieldValue, NormalizeError> {
  if value.is_null() {
    return Ok(FieldValue::Null);
  }
  match parse_epoch_local(&value) {
    Some(t) => Ok(FieldValue::LocalTime(t)),
    None => unparsed_date(key, value, policy),
  }
}

fn unparsed_date(key: &str, value: Value, policy: DatePolicy) -> Result<FieldValue, NormalizeError> {
  let text = match &value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  };
  match policy {
    DatePolicy::Strict => Err(NormalizeError::DateParse {
      field: key.to_string(),
      value: text,
    }),
    DatePolicy::Lenient => {
      tracing::warn!(field = key, value = %text, "unrecognized timestamp; keeping raw value");
      Ok(FieldValue::Raw(value))
    }
  }
}

fn tags(value: Value) -> FieldValue {
  let set: BTreeSet<String> = match value {
    Value::Null => return FieldValue::Null,
    Value::String(s) => split_tags(&s).collect(),
    Value::Array(items) => items
      .into_iter()
      .filter_map(|v| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
      })
      .filter(|s| !s.is_empty())
      .collect(),
    other => std::iter::once(other.to_string()).collect(),
  };
  FieldValue::Tags(set)
}

fn split_tags(raw: &str) -> impl Iterator<Item = String> + '_ {
  raw
    .split(',')
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .map(str::to_string)
}
