use crate::config::{ClientConfig, Config};
use crate::normalize::{self, DatePolicy, Normalized, NormalizeError};
use crate::transport::{
  HttpSend, Method, ReqwestSender, Request, Sleeper, ThreadSleeper, Transport, TransportError,
};
use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};

pub mod params;

pub use params::{
  FeedQuery, IndicatorQuery, IndicatorSubmission, TokenQuery, TokenSpec, TokenUpdate,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error(transparent)]
  Normalize(#[from] NormalizeError),

  #[error("invalid remote URI {remote}: {reason}")]
  InvalidRemote { remote: String, reason: String },

  #[error("invalid request parameters: {0}")]
  Params(String),

  #[error("could not encode request parameters: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Whether replies go through the normalizer or come back as sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
  #[default]
  Normalized,
  Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
  Items(Vec<Normalized>),
  Raw(Value),
}

pub struct Client<S = ReqwestSender, Z = ThreadSleeper> {
  config: ClientConfig,
  transport: Transport<S, Z>,
  date_policy: DatePolicy,
}

impl Client {
  pub fn from_config(cfg: &Config) -> Self {
    Self::with_sleeper(cfg, ThreadSleeper)
  }
}

impl<Z: Sleeper> Client<ReqwestSender, Z> {
  pub fn with_sleeper(cfg: &Config, sleeper: Z) -> Self {
    let sender = ReqwestSender::new(cfg.client.timeout(), cfg.client.verify_ssl);
    Client::new(
      cfg.client.clone(),
      Transport::new(sender, sleeper, cfg.retry.policy()),
    )
  }
}

impl<S: HttpSend, Z: Sleeper> Client<S, Z> {
  pub fn new(config: ClientConfig, transport: Transport<S, Z>) -> Self {
    Self {
      config,
      transport,
      date_policy: DatePolicy::default(),
    }
  }

  pub fn with_date_policy(mut self, policy: DatePolicy) -> Self {
    self.date_policy = policy;
    self
  }

  pub fn execute(&self, req: &Request) -> Result<Vec<Normalized>, Error> {
    let payload = self.transport.execute(req)?;
    Ok(normalize::normalize_all(payload, self.date_policy)?)
  }

  pub fn execute_raw(&self, req: &Request) -> Result<Value, Error> {
    Ok(self.transport.execute(req)?)
  }

  pub fn call(&self, req: &Request, mode: Mode) -> Result<Reply, Error> {
    match mode {
      Mode::Normalized => self.execute(req).map(Reply::Items),
      Mode::Raw => self.execute_raw(req).map(Reply::Raw),
    }
  }

  pub fn ping(&self) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.ping_request()?)
  }

  pub fn search_indicators(&self, q: &IndicatorQuery) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.search_request(q)?)
  }

  pub fn submit_indicator(&self, s: &IndicatorSubmission) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.submit_request(s)?)
  }

  pub fn delete_indicators(&self, q: &IndicatorQuery) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.delete_request(q)?)
  }

  pub fn feed(&self, q: &FeedQuery) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.feed_request(q)?)
  }

  pub fn list_tokens(&self, q: &TokenQuery) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.list_tokens_request(q)?)
  }

  pub fn create_token(&self, spec: &TokenSpec) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.create_token_request(spec)?)
  }

  pub fn delete_token(&self, q: &TokenQuery) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.delete_token_request(q)?)
  }

  pub fn update_token(&self, u: &TokenUpdate) -> Result<Vec<Normalized>, Error> {
    self.execute(&self.update_token_request(u)?)
  }

  pub fn ping_request(&self) -> Result<Request, Error> {
    self.build(Method::Get, "/ping", &[], None)
  }

  pub fn search_request(&self, q: &IndicatorQuery) -> Result<Request, Error> {
    self.build(Method::Get, "/indicators", &query_pairs(q)?, None)
  }

  pub fn submit_request(&self, s: &IndicatorSubmission) -> Result<Request, Error> {
    if s.indicator.trim().is_empty() {
      return Err(Error::Params("indicator is required".to_string()));
    }
    self.build(Method::Post, "/indicators", &[], Some(to_body(s)?))
  }

  pub fn delete_request(&self, q: &IndicatorQuery) -> Result<Request, Error> {
    if !q.has_filter() {
      return Err(Error::Params(
        "refusing to delete indicators without at least one filter".to_string(),
      ));
    }
    self.build(Method::Delete, "/indicators", &[], Some(to_body(q)?))
  }

  pub fn feed_request(&self, q: &FeedQuery) -> Result<Request, Error> {
    if q.itype.trim().is_empty() {
      return Err(Error::Params("feed requires an itype".to_string()));
    }
    self.build(Method::Get, "/feed", &query_pairs(q)?, None)
  }

  pub fn list_tokens_request(&self, q: &TokenQuery) -> Result<Request, Error> {
    self.build(Method::Get, "/tokens", &query_pairs(q)?, None)
  }

  pub fn create_token_request(&self, spec: &TokenSpec) -> Result<Request, Error> {
    if spec.username.trim().is_empty() {
      return Err(Error::Params("username is required".to_string()));
    }
    self.build(Method::Post, "/tokens", &[], Some(to_body(spec)?))
  }

  pub fn delete_token_request(&self, q: &TokenQuery) -> Result<Request, Error> {
    if q.username.is_none() && q.token.is_none() {
      return Err(Error::Params("a username or token is required".to_string()));
    }
    self.build(Method::Delete, "/tokens", &[], Some(to_body(q)?))
  }

  pub fn update_token_request(&self, u: &TokenUpdate) -> Result<Request, Error> {
    if u.token.trim().is_empty() {
      return Err(Error::Params("token is required".to_string()));
    }
    self.build(Method::Patch, "/tokens", &[], Some(to_body(u)?))
  }

  fn build(
    &self,
    method: Method,
    path: &str,
    query: &[(String, String)],
    body: Option<Map<String, Value>>,
  ) -> Result<Request, Error> {
    let uri = endpoint_url(&self.config.remote, path, query)?;
    let mut req = Request::new(method, uri, self.config.token.clone())
      .with_proxy(self.config.proxy())
      .with_verbose(self.config.verbose);
    if let Some(body) = body {
      req = req.with_body(body);
    }
    Ok(req)
  }

  #[cfg(test)]
  fn transport(&self) -> &Transport<S, Z> {
    &self.transport
  }
}

fn endpoint_url(remote: &str, path: &str, query: &[(String, String)]) -> Result<String, Error> {
  let remote = remote.trim();
  if remote.is_empty() {
    return Err(TransportError::Precondition("remote URI").into());
  }

  let mut url = Url::parse(remote).map_err(|e| Error::InvalidRemote {
    remote: remote.to_string(),
    reason: e.to_string(),
  })?;
  if url.cannot_be_a_base() {
    return Err(Error::InvalidRemote {
      remote: remote.to_string(),
      reason: "not a base URL".to_string(),
    });
  }

  let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
  url.set_path(&joined);
  url.set_query(None);
  if !query.is_empty() {
    url.query_pairs_mut().extend_pairs(query);
  }
  Ok(url.to_string())
}

fn to_body<T: Serialize>(params: &T) -> Result<Map<String, Value>, Error> {
  match serde_json::to_value(params)? {
    Value::Object(map) => Ok(map),
    _ => Err(Error::Params("parameters must serialize to an object".to_string())),
  }
}

fn query_pairs<T: Serialize>(params: &T) -> Result<Vec<(String, String)>, Error> {
  Ok(
    to_body(params)?
      .into_iter()
      .filter(|(_, v)| !v.is_null())
      .map(|(k, v)| {
        let text = match v {
          Value::String(s) => s,
          other => other.to_string(),
        };
        (k, text)
      })
      .collect(),
  )
}
