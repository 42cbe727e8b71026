use serde_json::{Map, Value};
use std::time::{Duration, Instant};

pub mod http;
pub mod retry;
#[cfg(test)]
pub(crate) mod testing;

pub use http::{HttpReply, HttpSend, ReqwestSender};
pub use retry::{RetryPolicy, SignalSleeper, Sleeper, StopSignal, ThreadSleeper};

pub const MEDIA_TYPE: &str = "application/vnd.cif.v3+json";

const STATUS_UNAUTHORIZED: u16 = 401;
const STATUS_REQUEST_TIMEOUT: u16 = 408;
const STATUS_UNPROCESSABLE: u16 = 422;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Delete,
  Patch,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Delete => "DELETE",
      Method::Patch => "PATCH",
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(m: Method) -> Self {
    match m {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Delete => reqwest::Method::DELETE,
      Method::Patch => reqwest::Method::PATCH,
    }
  }
}

/// One API call. Re-sent unchanged when the server rate limits us.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub uri: String,
  pub token: String,
  pub body: Option<Map<String, Value>>,
  pub proxy: Option<String>,
  pub verbose: bool,
}

impl Request {
  pub fn new(method: Method, uri: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      method,
      uri: uri.into(),
      token: token.into(),
      body: None,
      proxy: None,
      verbose: false,
    }
  }

  pub fn with_body(mut self, body: Map<String, Value>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
    self.proxy = proxy.filter(|p| !p.trim().is_empty());
    self
  }

  pub fn with_verbose(mut self, verbose: bool) -> Self {
    self.verbose = verbose;
    self
  }

  /// Compact JSON body, only for non-GET calls with something to send.
  pub fn json_body(&self) -> Result<Option<String>, serde_json::Error> {
    if self.method == Method::Get {
      return Ok(None);
    }
    match &self.body {
      Some(body) if !body.is_empty() => serde_json::to_string(body).map(Some),
      _ => Ok(None),
    }
  }

  fn validate(&self) -> Result<(), TransportError> {
    if self.token.trim().is_empty() {
      return Err(TransportError::Precondition("API token"));
    }
    if self.uri.trim().is_empty() {
      return Err(TransportError::Precondition("remote URI"));
    }
    Ok(())
  }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("missing {0}: set it in the config file or pass it on the command line")]
  Precondition(&'static str),

  #[error("authentication failed (HTTP 401); check that the API token is valid")]
  Auth,

  #[error("request timed out (HTTP 408)")]
  Timeout,

  #[error("server could not process the request (HTTP 422): {message}")]
  ServerValidation { message: String },

  #[error("server returned an empty or null response")]
  EmptyResponse,

  #[error("request failed: {message}")]
  FailedStatus { message: String },

  #[error("server reported missing data")]
  MissingData,

  #[error("{message} (HTTP {status})")]
  ServerMessage { status: u16, message: String },

  #[error("server returned {status}")]
  GenericHttp { status: u16 },

  #[error("still rate limited after {attempts} attempts")]
  RateLimitExhausted { attempts: u32 },

  #[error("cancelled while waiting to retry")]
  Cancelled,

  #[error("response exceeds max size {max} bytes")]
  ResponseTooLarge { max: usize },

  #[error("read response body: {0}")]
  Read(#[from] std::io::Error),

  #[error("response body is not valid UTF-8: {0}")]
  Utf8(#[from] std::string::FromUtf8Error),

  #[error("API token cannot be sent as a header: {0}")]
  InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

  #[error("HTTP request failed: {0}")]
  Network(#[from] reqwest::Error),

  #[error("response is not valid JSON: {0}")]
  Decode(#[from] serde_json::Error),
}

pub struct Transport<S = ReqwestSender, Z = ThreadSleeper> {
  sender: S,
  sleeper: Z,
  policy: RetryPolicy,
}

impl<S: HttpSend, Z: Sleeper> Transport<S, Z> {
  pub fn new(sender: S, sleeper: Z, policy: RetryPolicy) -> Self {
    Self {
      sender,
      sleeper,
      policy,
    }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  #[cfg(test)]
  pub(crate) fn sender(&self) -> &S {
    &self.sender
  }

  /// Sends `req` until the server stops rate limiting (or the policy gives up)
  /// and returns the success payload.
  pub fn execute(&self, req: &Request) -> Result<Value, TransportError> {
    req.validate()?;

    let target = http::safe_url_label(&req.uri);
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
      attempts = attempts.saturating_add(1);
      if req.verbose {
        tracing::info!(method = req.method.as_str(), target = %target, attempt = attempts, "sending request");
      } else {
        tracing::debug!(method = req.method.as_str(), target = %target, attempt = attempts, "sending request");
      }

      let reply = self.sender.send(req)?;

      if reply.status == STATUS_TOO_MANY_REQUESTS {
        let delay = self.policy.delay_for(reply.retry_after.as_deref());
        if !self.policy.allows_retry(attempts, started.elapsed(), delay) {
          tracing::warn!(target = %target, attempts, "rate limit retry bound reached");
          return Err(TransportError::RateLimitExhausted { attempts });
        }
        tracing::warn!(
          target = %target,
          attempt = attempts,
          delay_secs = delay.as_secs_f64(),
          "rate limited by server; retrying"
        );
        if !self.sleeper.sleep(delay) {
          return Err(TransportError::Cancelled);
        }
        continue;
      }

      let result = interpret(reply);
      if let Err(e) = &result {
        tracing::warn!(method = req.method.as_str(), target = %target, error = %e, "request failed");
      }
      return result;
    }
  }
}

fn interpret(reply: HttpReply) -> Result<Value, TransportError> {
  match reply.status {
    STATUS_UNAUTHORIZED => return Err(TransportError::Auth),
    STATUS_REQUEST_TIMEOUT => return Err(TransportError::Timeout),
    STATUS_UNPROCESSABLE => {
      let message =
        error_message(&reply.body).unwrap_or_else(|| "no details provided".to_string());
      return Err(TransportError::ServerValidation { message });
    }
    s if !(200..300).contains(&s) => {
      return Err(match error_message(&reply.body) {
        Some(message) => TransportError::ServerMessage { status: s, message },
        None => TransportError::GenericHttp { status: s },
      });
    }
    _ => {}
  }

  if reply.body.trim().is_empty() {
    return Err(TransportError::EmptyResponse);
  }
  let payload: Value = serde_json::from_str(&reply.body)?;
  check_payload(payload)
}

fn check_payload(payload: Value) -> Result<Value, TransportError> {
  let empty = match &payload {
    Value::Null => true,
    Value::String(s) => s.is_empty(),
    Value::Object(m) => m.is_empty(),
    _ => false,
  };
  if empty {
    return Err(TransportError::EmptyResponse);
  }

  if payload.get("status").and_then(Value::as_str) == Some("failed") {
    let message = payload
      .get("message")
      .map(value_text)
      .unwrap_or_else(|| "no message".to_string());
    return Err(TransportError::FailedStatus { message });
  }

  if payload.get("message").and_then(Value::as_str) == Some("missing data") {
    return Err(TransportError::MissingData);
  }

  Ok(payload)
}

fn error_message(body: &str) -> Option<String> {
  let v: Value = serde_json::from_str(body).ok()?;
  let message = v.get("message")?;
  if message.is_null() {
    return None;
  }
  Some(value_text(message))
}

fn value_text(v: &Value) -> String {
  match v {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
