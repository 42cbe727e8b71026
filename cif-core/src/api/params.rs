use serde::{Serialize, Serializer};

fn is_false(b: &bool) -> bool {
  !*b
}

#[allow(clippy::ptr_arg)]
fn csv<S: Serializer>(items: &Vec<String>, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_str(&items.join(","))
}

/// Filters for `GET /indicators` (query string) and `DELETE /indicators` (body).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorQuery {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub indicator: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub itype: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub confidence: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "csv")]
  pub tags: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tlp: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub group: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reporttime: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reporttime_end: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub firsttime: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lasttime: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub limit: Option<u32>,
  #[serde(skip_serializing_if = "is_false")]
  pub nolog: bool,
}

impl IndicatorQuery {
  pub fn has_filter(&self) -> bool {
    self.indicator.is_some()
      || self.itype.is_some()
      || self.confidence.is_some()
      || self.provider.is_some()
      || !self.tags.is_empty()
      || self.tlp.is_some()
      || self.group.is_some()
      || self.reporttime.is_some()
      || self.reporttime_end.is_some()
      || self.firsttime.is_some()
      || self.lasttime.is_some()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedQuery {
  pub itype: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub confidence: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "csv")]
  pub tags: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tlp: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub days: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSubmission {
  pub indicator: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tlp: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub confidence: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub group: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lasttime: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub portlist: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenQuery {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenSpec {
  pub username: String,
  #[serde(skip_serializing_if = "is_false")]
  pub admin: bool,
  #[serde(skip_serializing_if = "is_false")]
  pub read: bool,
  #[serde(skip_serializing_if = "is_false")]
  pub write: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expires: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenUpdate {
  pub token: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub groups: Vec<String>,
}

/// Splits a comma-separated command-line value into trimmed, non-empty parts.
pub fn split_list(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}
