use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::CacheKey;

/// Declared destination of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  /// Top-level document
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  Worker,
  /// No declared destination (fetch/XHR)
  #[default]
  Empty,
}

/// Request mode as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Page navigation
  Navigate,
  #[default]
  Cors,
  NoCors,
  SameOrigin,
}

/// Header fields in wire order.
///
/// Repeated fields (`Set-Cookie`, `Link`, `Vary`) are kept as separate
/// entries and values are raw bytes, so nothing outside visible ASCII is
/// lost. Names are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, Vec<u8>)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a field, keeping any earlier fields of the same name.
  pub fn append(&mut self, name: &str, value: impl Into<Vec<u8>>) {
    self.0.push((name.to_ascii_lowercase(), value.into()));
  }

  /// First value of a field.
  pub fn get(&self, name: &str) -> Option<&[u8]> {
    self
      .0
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_slice())
  }

  /// Every value of a field, in order.
  pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
    self
      .0
      .iter()
      .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_slice())
  }

  /// First value of a field, if it is valid UTF-8.
  pub fn get_str(&self, name: &str) -> Option<&str> {
    self.get(name).and_then(|v| std::str::from_utf8(v).ok())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<N: AsRef<str>, V: Into<Vec<u8>>> FromIterator<(N, V)> for Headers {
  fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
    let mut headers = Self::new();
    for (name, value) in iter {
      headers.append(name.as_ref(), value);
    }
    headers
  }
}

/// An intercepted resource request
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
  pub headers: Headers,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      headers: Headers::new(),
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Cache key for this request
  pub fn cache_key(&self) -> CacheKey {
    CacheKey::new(&self.method, &self.url)
  }
}

/// A response, either from the network, replayed from cache, or synthesized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
  /// Final URL after redirects, when the response came from the network
  pub url: Option<Url>,
}

impl Response {
  /// Synthetic response when a document can't be fetched or replayed
  pub fn offline() -> Self {
    Self::unavailable("Offline")
  }

  /// Synthetic response when an asset is neither cached nor fetchable
  pub fn network_error() -> Self {
    Self::unavailable("Network error")
  }

  fn unavailable(body: &str) -> Self {
    let mut headers = Headers::new();
    headers.append("content-type", "text/plain; charset=utf-8");

    Self {
      status: 503,
      status_text: "Service Unavailable".to_string(),
      headers,
      body: body.as_bytes().to_vec(),
      url: None,
    }
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  RuntimeCache,
  Precache,
  /// Generated locally because nothing else was available
  Synthetic,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::RuntimeCache => "runtime-cache",
      Self::Precache => "precache",
      Self::Synthetic => "synthetic",
    }
  }
}
