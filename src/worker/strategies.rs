//! Fetch strategies that coordinate the cache store and the network.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::selector::Scope;
use super::with_store;
use crate::cache::{CacheEntry, CacheKey, CacheStore, GenerationNamespaces};
use crate::net::{Network, Request, Response, ResponseSource};

/// A response handed back to the requester, plus the cache write it
/// triggered, if any.
///
/// The write runs in the background and never delays the response. Hosts
/// that need the event fully settled await [`Served::settle`].
#[derive(Debug)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the replayed entry was stored (cache hits only)
  pub cached_at: Option<DateTime<Utc>>,
  write: Option<JoinHandle<()>>,
}

impl Served {
  fn from_network(response: Response, write: Option<JoinHandle<()>>) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
      write,
    }
  }

  fn from_cache(entry: CacheEntry, source: ResponseSource) -> Self {
    Self {
      response: entry.to_response(),
      source,
      cached_at: Some(entry.cached_at),
      write: None,
    }
  }

  /// A response the worker didn't intercept.
  pub(crate) fn passthrough(response: Response) -> Self {
    Self::from_network(response, None)
  }

  fn synthetic(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthetic,
      cached_at: None,
      write: None,
    }
  }

  /// Whether a background cache write is outstanding.
  pub fn has_pending_write(&self) -> bool {
    self.write.is_some()
  }

  /// Wait for the background cache write, if any.
  pub async fn settle(&mut self) {
    if let Some(write) = self.write.take() {
      if let Err(e) = write.await {
        warn!("Cache write task did not complete: {}", e);
      }
    }
  }
}

/// Network-first and cache-first algorithms over one generation's
/// runtime and precache namespaces.
pub struct FetchStrategies<S: CacheStore> {
  store: Arc<S>,
  network: Arc<dyn Network>,
  namespaces: GenerationNamespaces,
  scope: Scope,
}

impl<S: CacheStore + 'static> FetchStrategies<S> {
  pub fn new(
    store: Arc<S>,
    network: Arc<dyn Network>,
    namespaces: GenerationNamespaces,
    scope: Scope,
  ) -> Self {
    Self {
      store,
      network,
      namespaces,
      scope,
    }
  }

  /// Fetch from the network; fall back to a cached copy, then to a
  /// synthetic 503 "Offline" response.
  ///
  /// A successful cacheable response is written to the runtime namespace
  /// in the background and returned unmodified.
  pub async fn network_first(&self, request: &Request) -> Served {
    let key = request.cache_key();

    match self.network.fetch(request).await {
      Ok(response) => {
        let write = self.store_in_background(request, &key, &response);
        Served::from_network(response, write)
      }
      Err(e) => {
        debug!("Network failed for {}, falling back to cache: {}", key, e);
        match self.lookup(&key).await {
          Some((entry, source)) => Served::from_cache(entry, source),
          None => {
            debug!("No cached copy of {}, serving offline response", key);
            Served::synthetic(Response::offline())
          }
        }
      }
    }
  }

  /// Serve a cached copy without touching the network; on a miss fetch,
  /// store and return, or a synthetic 503 "Network error" response.
  pub async fn cache_first(&self, request: &Request) -> Served {
    let key = request.cache_key();

    if let Some((entry, source)) = self.lookup(&key).await {
      return Served::from_cache(entry, source);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        let write = self.store_in_background(request, &key, &response);
        Served::from_network(response, write)
      }
      Err(e) => {
        debug!("Network failed for uncached {}: {}", key, e);
        Served::synthetic(Response::network_error())
      }
    }
  }

  /// Look up a key in the runtime namespace, then the precache namespace.
  ///
  /// Read failures are logged and treated as a miss.
  async fn lookup(&self, key: &CacheKey) -> Option<(CacheEntry, ResponseSource)> {
    let candidates = [
      (&self.namespaces.runtime, ResponseSource::RuntimeCache),
      (&self.namespaces.precache, ResponseSource::Precache),
    ];

    for (namespace, source) in candidates {
      let (ns, lookup_key) = (namespace.clone(), key.clone());
      match with_store(&self.store, move |store| store.get(&ns, &lookup_key)).await {
        Ok(Some(entry)) => return Some((entry, source)),
        Ok(None) => {}
        Err(e) => warn!("Failed to read {} from {}: {}", key, namespace, e),
      }
    }
    None
  }

  fn store_in_background(
    &self,
    request: &Request,
    key: &CacheKey,
    response: &Response,
  ) -> Option<JoinHandle<()>> {
    if let Err(reason) = self.scope.check_storable(request, response) {
      debug!("Not caching {}: {}", key, reason);
      return None;
    }

    let store = Arc::clone(&self.store);
    let namespace = self.namespaces.runtime.clone();
    let key = key.clone();
    let entry = CacheEntry::from_response(request, response);

    Some(tokio::spawn(async move {
      let (ns, put_key) = (namespace.clone(), key.clone());
      match with_store(&store, move |store| store.put(&ns, &put_key, &entry)).await {
        Ok(()) => debug!("Cached {} in {}", key, namespace),
        Err(e) => warn!("Failed to cache {} in {}: {}", key, namespace, e),
      }
    }))
  }
}
