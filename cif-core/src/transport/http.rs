use super::{Request, TransportError, MEDIA_TYPE};
use reqwest::blocking::{Client, Response};
use reqwest::header::{
  HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT,
};
use reqwest::{Proxy, Url};
use std::io::Read;
use std::time::Duration;

const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// Status, first `Retry-After` value and body of one HTTP round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
  pub status: u16,
  pub retry_after: Option<String>,
  pub body: String,
}

pub trait HttpSend {
  fn send(&self, request: &Request) -> Result<HttpReply, TransportError>;
}

pub struct ReqwestSender {
  timeout: Duration,
  verify_ssl: bool,
}

impl ReqwestSender {
  pub fn new(timeout: Duration, verify_ssl: bool) -> Self {
    Self {
      timeout,
      verify_ssl,
    }
  }

  fn client(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
    let builder = Client::builder()
      .timeout(self.timeout)
      .danger_accept_invalid_certs(!self.verify_ssl);
    // only the configured proxy; environment proxies are ignored
    let builder = match proxy {
      Some(proxy) => builder.proxy(Proxy::all(proxy)?),
      None => builder.no_proxy(),
    };
    Ok(builder.build()?)
  }
}

impl HttpSend for ReqwestSender {
  fn send(&self, request: &Request) -> Result<HttpReply, TransportError> {
    let client = self.client(request.proxy.as_deref())?;

    let mut builder = client
      .request(request.method.into(), request.uri.as_str())
      .headers(request_headers(request)?);
    if let Some(body) = request.json_body()? {
      builder = builder.body(body);
    }

    let response = builder.send()?;
    let status = response.status().as_u16();
    let retry_after = first_retry_after(response.headers());
    let body = read_response_with_limit(response, MAX_RESPONSE_BYTES)?;

    Ok(HttpReply {
      status,
      retry_after,
      body,
    })
  }
}

fn request_headers(request: &Request) -> Result<HeaderMap, TransportError> {
  let mut auth = HeaderValue::from_str(&format!("Token token={}", request.token))?;
  auth.set_sensitive(true);

  let mut headers = HeaderMap::new();
  headers.insert(AUTHORIZATION, auth);
  headers.insert(ACCEPT, HeaderValue::from_static(MEDIA_TYPE));
  headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
  headers.insert(
    USER_AGENT,
    HeaderValue::from_static(concat!("cif-client/", env!("CARGO_PKG_VERSION"))),
  );
  Ok(headers)
}

fn first_retry_after(headers: &HeaderMap) -> Option<String> {
  headers
    .get_all(RETRY_AFTER)
    .iter()
    .next()
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
}

fn read_response_with_limit(response: Response, max_bytes: usize) -> Result<String, TransportError> {
  let mut out = Vec::new();
  let mut limited = response.take((max_bytes.saturating_add(1)) as u64);
  limited.read_to_end(&mut out)?;
  body_text(out, max_bytes)
}

fn body_text(bytes: Vec<u8>, max_bytes: usize) -> Result<String, TransportError> {
  if bytes.len() > max_bytes {
    return Err(TransportError::ResponseTooLarge { max: max_bytes });
  }
  Ok(String::from_utf8(bytes)?)
}

/// Host and path only; query strings may carry indicator values.
pub(crate) fn safe_url_label(raw: &str) -> String {
  let Ok(url) = Url::parse(raw) else {
    return "<invalid-uri>".to_string();
  };
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}
