//! Per-request strategy selection.

use color_eyre::{eyre::eyre, Result};
use url::{Origin, Url};

use crate::net::{Destination, Request, Response};

/// How a request is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Fresh from the network, cached copy as offline fallback
  NetworkFirst,
  /// Cached copy if present, network otherwise
  CacheFirst,
  /// Not intercepted; the host's default network path handles it
  Bypass,
}

impl Strategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::NetworkFirst => "network-first",
      Self::CacheFirst => "cache-first",
      Self::Bypass => "bypass",
    }
  }
}

/// Endpoints whose responses must never be served from cache
#[derive(Debug, Clone, Default)]
pub struct LiveDataRules {
  /// Path prefixes, e.g. `/api/`
  pub path_prefixes: Vec<String>,
  /// Host suffixes, e.g. `firestore.googleapis.com`
  pub host_suffixes: Vec<String>,
}

impl LiveDataRules {
  pub fn matches(&self, url: &Url) -> bool {
    let path = url.path();
    if self.path_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
      return true;
    }

    let Some(host) = url.host_str() else {
      return false;
    };
    let host = host.to_ascii_lowercase();
    self.host_suffixes.iter().any(|suffix| {
      let suffix = suffix.trim_start_matches('.').to_ascii_lowercase();
      host == suffix || host.ends_with(&format!(".{}", suffix))
    })
  }
}

/// The worker's own origin and routing rules
#[derive(Debug, Clone)]
pub struct Scope {
  base: Url,
  origin: Origin,
  live_data: LiveDataRules,
  markup_extensions: Vec<String>,
}

impl Scope {
  pub fn new(origin: &Url, live_data: LiveDataRules, markup_extensions: Vec<String>) -> Self {
    Self {
      base: origin.clone(),
      origin: origin.origin(),
      live_data,
      markup_extensions: markup_extensions
        .into_iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect(),
    }
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin
  }

  pub fn origin(&self) -> &Origin {
    &self.origin
  }

  /// Resolve a path (or absolute URL) against the worker's origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  /// Check that a response may be written to the cache: a GET with a 2xx
  /// status whose request URL and final URL (after redirects) are both
  /// same-origin. The error names the first rule broken.
  pub fn check_storable(&self, request: &Request, response: &Response) -> Result<()> {
    if request.method != "GET" {
      return Err(eyre!("{} responses are not cached", request.method));
    }
    if !response.is_ok() {
      return Err(eyre!("Bad response status {}", response.status));
    }
    if !self.is_same_origin(&request.url) {
      return Err(eyre!("Cross-origin request {}", request.url));
    }
    if let Some(final_url) = &response.url {
      if !self.is_same_origin(final_url) {
        return Err(eyre!("Redirected cross-origin to {}", final_url));
      }
    }
    Ok(())
  }

  /// Whether the path names a markup resource: a directory index or a
  /// file with a markup extension.
  fn is_markup_path(&self, url: &Url) -> bool {
    let path = url.path();
    if path.ends_with('/') {
      return true;
    }

    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
      Some((_, ext)) => {
        let ext = ext.to_ascii_lowercase();
        self.markup_extensions.iter().any(|m| *m == ext)
      }
      None => false,
    }
  }
}

/// Pick the strategy for a request. First matching rule wins:
///
/// 1. cross-origin -> Bypass
/// 2. live-data path or host -> Bypass
/// 3. document, navigation, or markup path -> NetworkFirst
/// 4. anything else -> CacheFirst
pub fn select(request: &Request, scope: &Scope) -> Strategy {
  if !scope.is_same_origin(&request.url) {
    return Strategy::Bypass;
  }

  if scope.live_data.matches(&request.url) {
    return Strategy::Bypass;
  }

  if request.destination == Destination::Document
    || request.is_navigation()
    || scope.is_markup_path(&request.url)
  {
    return Strategy::NetworkFirst;
  }

  Strategy::CacheFirst
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::RequestMode;

  fn scope() -> Scope {
    Scope::new(
      &Url::parse("https://app.example").unwrap(),
      LiveDataRules {
        path_prefixes: vec!["/api/".to_string(), "/firebase/".to_string()],
        host_suffixes: vec!["firestore.googleapis.com".to_string()],
      },
      vec!["html".to_string(), ".htm".to_string()],
    )
  }

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_documents_are_network_first() {
    let scope = scope();
    for url in [
      "https://app.example/",
      "https://app.example/index.html",
      "https://app.example/docs/page.HTM",
      "https://app.example/settings/",
    ] {
      assert_eq!(select(&request(url), &scope), Strategy::NetworkFirst, "{}", url);
    }

    let doc = request("https://app.example/profile").with_destination(Destination::Document);
    assert_eq!(select(&doc, &scope), Strategy::NetworkFirst);

    let nav = request("https://app.example/profile").with_mode(RequestMode::Navigate);
    assert_eq!(select(&nav, &scope), Strategy::NetworkFirst);
  }

  #[test]
  fn test_assets_are_cache_first() {
    let scope = scope();
    for (url, destination) in [
      ("https://app.example/main.dart.js", Destination::Script),
      ("https://app.example/styles/app.css", Destination::Style),
      ("https://app.example/icons/Icon-192.png", Destination::Image),
      ("https://app.example/manifest.json", Destination::Manifest),
      ("https://app.example/assets/html.bin", Destination::Empty),
    ] {
      let req = request(url).with_destination(destination);
      assert_eq!(select(&req, &scope), Strategy::CacheFirst, "{}", url);
    }
  }

  #[test]
  fn test_cross_origin_is_bypassed() {
    let scope = scope();
    for url in [
      "https://cdn.example/lib.js",
      "http://app.example/index.html",
      "https://app.example:8443/index.html",
    ] {
      let req = request(url).with_destination(Destination::Document);
      assert_eq!(select(&req, &scope), Strategy::Bypass, "{}", url);
    }
  }

  #[test]
  fn test_live_data_is_bypassed() {
    let scope = scope();
    for url in [
      "https://app.example/api/users",
      "https://app.example/firebase/config.html",
    ] {
      let req = request(url).with_destination(Destination::Document);
      assert_eq!(select(&req, &scope), Strategy::Bypass, "{}", url);
    }

    // "/apis" is not under the "/api/" prefix
    let req = request("https://app.example/apis.js");
    assert_eq!(select(&req, &scope), Strategy::CacheFirst);
  }

  #[test]
  fn test_live_host_suffix() {
    let rules = LiveDataRules {
      path_prefixes: Vec::new(),
      host_suffixes: vec![".firestore.googleapis.com".to_string()],
    };
    let matches = |url: &str| rules.matches(&Url::parse(url).unwrap());

    assert!(matches("https://firestore.googleapis.com/v1/doc"));
    assert!(matches("https://eu.Firestore.googleapis.com/v1/doc"));
    assert!(!matches("https://notfirestore.googleapis.com/v1/doc"));
  }

  #[test]
  fn test_live_host_on_own_origin() {
    let scope = Scope::new(
      &Url::parse("https://live.example").unwrap(),
      LiveDataRules {
        path_prefixes: Vec::new(),
        host_suffixes: vec!["live.example".to_string()],
      },
      vec!["html".to_string()],
    );
    assert_eq!(
      select(&request("https://live.example/app.js"), &scope),
      Strategy::Bypass
    );
  }

  fn response(status: u16, final_url: &str) -> Response {
    Response {
      status,
      status_text: String::new(),
      headers: Default::default(),
      body: Vec::new(),
      url: Some(Url::parse(final_url).unwrap()),
    }
  }

  #[test]
  fn test_storable_responses() {
    let scope = scope();
    let req = request("https://app.example/app.js");

    assert!(scope
      .check_storable(&req, &response(200, "https://app.example/app.js"))
      .is_ok());
    assert!(scope
      .check_storable(&req, &response(204, "https://app.example/v2/app.js"))
      .is_ok());

    let err = scope
      .check_storable(&req, &response(404, "https://app.example/app.js"))
      .unwrap_err();
    assert!(err.to_string().contains("404"));

    let post = request("https://app.example/app.js").with_method("POST");
    assert!(scope
      .check_storable(&post, &response(200, "https://app.example/app.js"))
      .is_err());
  }

  #[test]
  fn test_cross_origin_is_never_storable() {
    let scope = scope();

    let cdn = request("https://cdn.example/lib.js");
    assert!(scope
      .check_storable(&cdn, &response(200, "https://cdn.example/lib.js"))
      .is_err());

    let login = request("https://app.example/login.html");
    let err = scope
      .check_storable(&login, &response(200, "https://auth.example/login.html"))
      .unwrap_err();
    assert!(err.to_string().contains("auth.example"));
  }

  #[test]
  fn test_resolve_against_origin() {
    let scope = scope();
    assert_eq!(
      scope.resolve("/icons/Icon-192.png").unwrap().as_str(),
      "https://app.example/icons/Icon-192.png"
    );
    assert_eq!(
      scope.resolve("https://cdn.example/lib.js").unwrap().as_str(),
      "https://cdn.example/lib.js"
    );
  }
}
