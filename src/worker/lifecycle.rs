//! Install/activate orchestration and generation garbage collection.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::clients::Clients;
use super::message::WorkerMessage;
use super::selector::Scope;
use super::with_store;
use crate::cache::{CacheEntry, CacheNamespace, CacheStore, GenerationNamespaces};
use crate::net::{Network, Request};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
  /// Booted, no lifecycle event handled yet
  #[default]
  Parsed,
  /// Install event in progress
  Installing,
  /// Installed but not yet active
  Installed,
  /// Activate event in progress
  Activating,
  /// Active and controlling clients
  Activated,
  /// Install failed; this worker will never activate
  Redundant,
}

/// Per-entry result of precaching the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecacheOutcome {
  Cached { url: String },
  Failed { url: String, reason: String },
}

/// Result of the install event
#[derive(Debug, Clone)]
pub struct InstallReport {
  pub namespace: CacheNamespace,
  /// One outcome per manifest entry, in manifest order
  pub outcomes: Vec<PrecacheOutcome>,
}

impl InstallReport {
  pub fn cached(&self) -> impl Iterator<Item = &str> {
    self.outcomes.iter().filter_map(|o| match o {
      PrecacheOutcome::Cached { url } => Some(url.as_str()),
      PrecacheOutcome::Failed { .. } => None,
    })
  }

  pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
    self.outcomes.iter().filter_map(|o| match o {
      PrecacheOutcome::Failed { url, reason } => Some((url.as_str(), reason.as_str())),
      PrecacheOutcome::Cached { .. } => None,
    })
  }

  /// A non-empty manifest of which nothing could be cached.
  pub fn is_degraded(&self) -> bool {
    !self.outcomes.is_empty() && self.cached().next().is_none()
  }
}

/// Result of the activate event
#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
  pub failed: Vec<(String, String)>,
  pub retained: Vec<String>,
  /// Namespaces of other apps sharing the store, left untouched
  pub foreign: Vec<String>,
  pub clients_claimed: usize,
}

#[derive(Debug, Default)]
struct LifecycleState {
  state: WorkerState,
  skip_waiting: bool,
}

/// Owns generation transitions: install-time precaching, activate-time
/// cleanup of stale generations, and takeover of open clients.
pub struct LifecycleManager<S: CacheStore> {
  store: Arc<S>,
  network: Arc<dyn Network>,
  clients: Arc<dyn Clients>,
  namespaces: GenerationNamespaces,
  scope: Scope,
  manifest: Vec<String>,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStore + 'static> LifecycleManager<S> {
  pub fn new(
    store: Arc<S>,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    namespaces: GenerationNamespaces,
    scope: Scope,
    manifest: Vec<String>,
  ) -> Self {
    Self {
      store,
      network,
      clients,
      namespaces,
      scope,
      manifest,
      state: Mutex::new(LifecycleState::default()),
    }
  }

  pub fn state(&self) -> WorkerState {
    self.with_state(|s| s.state)
  }

  /// Whether this worker asked to activate without waiting for old clients.
  pub fn skip_waiting_requested(&self) -> bool {
    self.with_state(|s| s.skip_waiting)
  }

  /// Advance to "ready to activate" immediately.
  pub fn skip_waiting(&self) {
    info!("Skip waiting requested");
    self.with_state(|s| s.skip_waiting = true);
  }

  fn set_state(&self, state: WorkerState) {
    debug!("Worker state -> {:?}", state);
    self.with_state(|s| s.state = state);
  }

  fn with_state<T>(&self, f: impl FnOnce(&mut LifecycleState) -> T) -> T {
    // The state is plain data, so a poisoned lock still holds a usable value
    let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
  }

  /// Precache the manifest into this generation's precache namespace.
  ///
  /// Every entry is attempted; individual failures are logged and reported
  /// but never fail the install. Only a store that can't open the
  /// namespace at all fails it.
  pub async fn install(&self) -> Result<InstallReport> {
    self.set_state(WorkerState::Installing);
    let namespace = self.namespaces.precache.clone();

    let opening = namespace.clone();
    if let Err(e) = with_store(&self.store, move |store| store.open(&opening)).await {
      self.set_state(WorkerState::Redundant);
      return Err(eyre!("Install failed: {}", e));
    }

    info!(
      "Precaching {} resources into {}",
      self.manifest.len(),
      namespace
    );

    let outcomes = join_all(self.manifest.iter().map(|path| self.precache_one(path))).await;

    let report = InstallReport {
      namespace,
      outcomes,
    };

    for (url, reason) in report.failed() {
      warn!("Failed to precache {}: {}", url, reason);
    }
    if report.is_degraded() {
      error!(
        "No precache entries could be stored; the app shell will not work offline"
      );
    }

    self.set_state(WorkerState::Installed);
    self.skip_waiting();

    Ok(report)
  }

  async fn precache_one(&self, path: &str) -> PrecacheOutcome {
    let url = match self.scope.resolve(path) {
      Ok(url) => url,
      Err(e) => {
        return PrecacheOutcome::Failed {
          url: path.to_string(),
          reason: e.to_string(),
        }
      }
    };

    // Never fetched: nothing from another origin is stored
    if !self.scope.is_same_origin(&url) {
      return PrecacheOutcome::Failed {
        url: url.to_string(),
        reason: "cross-origin manifest entry".to_string(),
      };
    }

    match self.fetch_and_store(Request::get(url.clone())).await {
      Ok(()) => PrecacheOutcome::Cached {
        url: url.to_string(),
      },
      Err(e) => PrecacheOutcome::Failed {
        url: url.to_string(),
        reason: e.to_string(),
      },
    }
  }

  async fn fetch_and_store(&self, request: Request) -> Result<()> {
    let response = self.network.fetch(&request).await?;
    self.scope.check_storable(&request, &response)?;

    let entry = CacheEntry::from_response(&request, &response);
    let (namespace, key) = (self.namespaces.precache.clone(), request.cache_key());
    with_store(&self.store, move |store| store.put(&namespace, &key, &entry)).await?;

    debug!("Precached {}", request.url);
    Ok(())
  }

  /// Delete every namespace of this app not owned by the current
  /// generation, then claim open clients.
  ///
  /// Deletions run concurrently and all settle before clients are claimed.
  /// A failed deletion is logged and doesn't stop the others. A worker whose
  /// install failed refuses to activate and touches nothing.
  pub async fn activate(&self) -> Result<ActivateReport> {
    if self.state() == WorkerState::Redundant {
      return Err(eyre!(
        "Refusing to activate: install failed, keeping the previous generation"
      ));
    }

    self.set_state(WorkerState::Activating);
    let mut report = ActivateReport::default();

    let names = match with_store(&self.store, |store| store.list_namespaces()).await {
      Ok(names) => names,
      Err(e) => {
        warn!("Failed to enumerate namespaces, skipping cleanup: {}", e);
        Default::default()
      }
    };

    let (ours, foreign): (Vec<String>, Vec<String>) =
      names.into_iter().partition(|name| self.namespaces.in_scope(name));
    let (retained, stale): (Vec<String>, Vec<String>) =
      ours.into_iter().partition(|name| self.namespaces.owns(name));
    for name in &foreign {
      debug!("Leaving namespace {} of another app", name);
    }
    report.retained = retained;
    report.foreign = foreign;

    let deletions = stale.into_iter().map(|name| async move {
      info!("Deleting stale namespace {}", name);
      let namespace = CacheNamespace::from_name(name.clone());
      let result = with_store(&self.store, move |store| store.delete(&namespace)).await;
      (name, result)
    });

    for (name, result) in join_all(deletions).await {
      match result {
        Ok(_) => report.deleted.push(name),
        Err(e) => {
          warn!("Failed to delete namespace {}: {}", name, e);
          report.failed.push((name, e.to_string()));
        }
      }
    }

    report.clients_claimed = match self.clients.claim().await {
      Ok(count) => count,
      Err(e) => {
        warn!("Failed to claim clients: {}", e);
        0
      }
    };

    self.set_state(WorkerState::Activated);
    info!(
      "Activated: {} stale namespaces deleted, {} clients claimed",
      report.deleted.len(),
      report.clients_claimed
    );

    Ok(report)
  }

  /// Handle a message from a page. Returns whether it was recognized.
  pub fn on_message(&self, data: &Value) -> bool {
    match WorkerMessage::parse(data) {
      Some(WorkerMessage::SkipWaiting) => {
        self.skip_waiting();
        true
      }
      None => {
        debug!("Ignoring unrecognized message: {}", data);
        false
      }
    }
  }
}
