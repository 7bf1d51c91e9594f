//! Core traits and types for the cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;

use super::generation::CacheNamespace;
use crate::net::{Headers, Request, Response};

/// Canonical request identity: upper-cased method plus the URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(format!("{} {}", method.to_ascii_uppercase(), url))
  }

  /// Rebuild a key read back from storage.
  pub(crate) fn from_stored(raw: String) -> Self {
    Self(raw)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A stored response, with enough metadata to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub url: String,
  pub status: u16,
  pub status_text: String,
  /// Every header field of the response, in order
  pub headers: Headers,
  pub body: Vec<u8>,
  /// SHA-256 of the body, hex encoded
  pub digest: String,
  /// When this content was first stored
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Snapshot a network response for storage.
  pub fn from_response(request: &Request, response: &Response) -> Self {
    let url = response.url.as_ref().unwrap_or(&request.url);

    Self {
      url: url.to_string(),
      status: response.status,
      status_text: response.status_text.clone(),
      headers: response.headers.clone(),
      body: response.body.clone(),
      digest: body_digest(&response.body),
      cached_at: Utc::now(),
    }
  }

  /// Rebuild a response that replays this entry.
  pub fn to_response(&self) -> Response {
    Response {
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      url: Url::parse(&self.url).ok(),
    }
  }
}

pub fn body_digest(body: &[u8]) -> String {
  hex::encode(Sha256::digest(body))
}

/// Trait for cache store backends.
///
/// All operations are keyed by namespace. Staleness is managed only at
/// namespace granularity; entries never expire on their own.
pub trait CacheStore: Send + Sync {
  /// Create the namespace if absent. Idempotent.
  fn open(&self, namespace: &CacheNamespace) -> Result<()>;

  /// Look up an entry. A miss is `Ok(None)`, including a missing namespace.
  fn get(&self, namespace: &CacheNamespace, key: &CacheKey) -> Result<Option<CacheEntry>>;

  /// Store an entry, creating the namespace if needed. Last write wins.
  fn put(&self, namespace: &CacheNamespace, key: &CacheKey, entry: &CacheEntry) -> Result<()>;

  /// Names of all namespaces in the store.
  fn list_namespaces(&self) -> Result<BTreeSet<String>>;

  /// Remove a namespace and all its entries. Returns whether it existed.
  fn delete(&self, namespace: &CacheNamespace) -> Result<bool>;

  /// Keys stored in a namespace, sorted.
  fn keys(&self, namespace: &CacheNamespace) -> Result<Vec<CacheKey>>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_strips_fragment() {
    let a = Url::parse("https://app.example/main.js#v=1").unwrap();
    let b = Url::parse("https://app.example/main.js").unwrap();
    assert_eq!(CacheKey::new("get", &a), CacheKey::new("GET", &b));
    assert_eq!(
      CacheKey::new("GET", &b).as_str(),
      "GET https://app.example/main.js"
    );
  }

  #[test]
  fn test_key_keeps_query() {
    let a = Url::parse("https://app.example/main.js?v=1").unwrap();
    let b = Url::parse("https://app.example/main.js?v=2").unwrap();
    assert_ne!(CacheKey::new("GET", &a), CacheKey::new("GET", &b));
  }

  #[test]
  fn test_entry_replays_response() {
    let url = Url::parse("https://app.example/app.css").unwrap();
    let request = Request::get(url.clone());
    let response = Response {
      status: 200,
      status_text: "OK".to_string(),
      headers: [
        ("content-type", "text/css"),
        ("vary", "Accept-Encoding"),
        ("vary", "Origin"),
      ]
      .into_iter()
      .collect(),
      body: b"body{}".to_vec(),
      url: Some(url),
    };

    let entry = CacheEntry::from_response(&request, &response);
    assert_eq!(entry.digest, body_digest(b"body{}"));
    assert_eq!(entry.to_response(), response);
  }
}
