//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{body_digest, CacheEntry, CacheKey, CacheNamespace, CacheStore, SqliteStorage};
use crate::net::{Headers, Network, Request, Response};
use crate::worker::{Clients, LiveDataRules, Scope};

pub const ORIGIN: &str = "https://app.example";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn request(path: &str) -> Request {
  Request::get(url(path))
}

pub fn scope() -> Scope {
  Scope::new(
    &Url::parse(ORIGIN).unwrap(),
    LiveDataRules {
      path_prefixes: vec!["/api/".to_string()],
      host_suffixes: Vec::new(),
    },
    vec!["html".to_string()],
  )
}

pub fn entry(request: &Request, body: &str) -> CacheEntry {
  CacheEntry {
    url: request.url.to_string(),
    status: 200,
    status_text: "OK".to_string(),
    headers: Headers::new(),
    body: body.as_bytes().to_vec(),
    digest: body_digest(body.as_bytes()),
    cached_at: Utc::now(),
  }
}

enum Route {
  Respond(Response),
  Fail,
}

/// Scripted network: unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Route>>,
  calls: AtomicUsize,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(&self, path: &str, body: &str) {
    self.respond(path, 200, body);
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    let response = Response {
      status,
      status_text: String::new(),
      headers: Headers::new(),
      body: body.as_bytes().to_vec(),
      url: Some(url(path)),
    };
    self.route(path, Route::Respond(response));
  }

  pub fn redirect(&self, path: &str, final_url: &str, body: &str) {
    let response = Response {
      status: 200,
      status_text: "OK".to_string(),
      headers: Headers::new(),
      body: body.as_bytes().to_vec(),
      url: Some(Url::parse(final_url).unwrap()),
    };
    self.route(path, Route::Respond(response));
  }

  pub fn fail(&self, path: &str) {
    self.route(path, Route::Fail);
  }

  fn route(&self, path: &str, route: Route) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), route);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let routes = self.routes.lock().unwrap();
    match routes.get(request.url.as_str()) {
      Some(Route::Respond(response)) => Ok(response.clone()),
      Some(Route::Fail) | None => Err(eyre!("Failed to fetch {}: offline", request.url)),
    }
  }
}

/// Store whose every operation fails.
pub struct FailingStore;

impl CacheStore for FailingStore {
  fn open(&self, namespace: &CacheNamespace) -> Result<()> {
    Err(eyre!("Failed to open namespace {}: disk full", namespace))
  }

  fn get(&self, _namespace: &CacheNamespace, key: &CacheKey) -> Result<Option<CacheEntry>> {
    Err(eyre!("Failed to read entry {}: disk error", key))
  }

  fn put(&self, _namespace: &CacheNamespace, key: &CacheKey, _entry: &CacheEntry) -> Result<()> {
    Err(eyre!("Failed to store entry {}: disk full", key))
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>> {
    Err(eyre!("Failed to list namespaces: disk error"))
  }

  fn delete(&self, namespace: &CacheNamespace) -> Result<bool> {
    Err(eyre!("Failed to delete namespace {}: disk error", namespace))
  }

  fn keys(&self, namespace: &CacheNamespace) -> Result<Vec<CacheKey>> {
    Err(eyre!("Failed to list keys of {}: disk error", namespace))
  }
}

/// SQLite store that refuses to delete the listed namespaces.
pub struct StickyStore {
  pub inner: SqliteStorage,
  pub sticky: BTreeSet<String>,
}

impl CacheStore for StickyStore {
  fn open(&self, namespace: &CacheNamespace) -> Result<()> {
    self.inner.open(namespace)
  }

  fn get(&self, namespace: &CacheNamespace, key: &CacheKey) -> Result<Option<CacheEntry>> {
    self.inner.get(namespace, key)
  }

  fn put(&self, namespace: &CacheNamespace, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
    self.inner.put(namespace, key, entry)
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>> {
    self.inner.list_namespaces()
  }

  fn delete(&self, namespace: &CacheNamespace) -> Result<bool> {
    if self.sticky.contains(namespace.name()) {
      return Err(eyre!("Failed to delete namespace {}: locked", namespace));
    }
    self.inner.delete(namespace)
  }

  fn keys(&self, namespace: &CacheNamespace) -> Result<Vec<CacheKey>> {
    self.inner.keys(namespace)
  }
}

/// SQLite store that can't open new namespaces, like a full disk.
pub struct UnopenableStore {
  pub inner: SqliteStorage,
}

impl CacheStore for UnopenableStore {
  fn open(&self, namespace: &CacheNamespace) -> Result<()> {
    Err(eyre!("Failed to open namespace {}: disk full", namespace))
  }

  fn get(&self, namespace: &CacheNamespace, key: &CacheKey) -> Result<Option<CacheEntry>> {
    self.inner.get(namespace, key)
  }

  fn put(&self, namespace: &CacheNamespace, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
    self.inner.put(namespace, key, entry)
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>> {
    self.inner.list_namespaces()
  }

  fn delete(&self, namespace: &CacheNamespace) -> Result<bool> {
    self.inner.delete(namespace)
  }

  fn keys(&self, namespace: &CacheNamespace) -> Result<Vec<CacheKey>> {
    self.inner.keys(namespace)
  }
}

/// Clients collaborator that records claims and what the store looked
/// like at the moment of each claim.
pub struct RecordingClients {
  open: usize,
  claims: AtomicUsize,
  store: Option<Arc<dyn CacheStore>>,
  seen_at_claim: Mutex<Option<BTreeSet<String>>>,
}

impl RecordingClients {
  pub fn new(open: usize) -> Self {
    Self {
      open,
      claims: AtomicUsize::new(0),
      store: None,
      seen_at_claim: Mutex::new(None),
    }
  }

  pub fn observing(open: usize, store: Arc<dyn CacheStore>) -> Self {
    Self {
      store: Some(store),
      ..Self::new(open)
    }
  }

  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }

  pub fn namespaces_at_claim(&self) -> Option<BTreeSet<String>> {
    self.seen_at_claim.lock().unwrap().clone()
  }
}

#[async_trait]
impl Clients for RecordingClients {
  async fn claim(&self) -> Result<usize> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    if let Some(store) = &self.store {
      *self.seen_at_claim.lock().unwrap() = Some(store.list_namespaces()?);
    }
    Ok(self.open)
  }
}
