//! The cache-manager worker and the host harness that drives it.
//!
//! A [`Worker`] is booted once per process with its collaborators (store,
//! network, clients) and a [`DispatchTable`]. The host raises events against
//! it and awaits each event's completion.

mod clients;
mod dispatch;
mod lifecycle;
mod message;
mod selector;
mod strategies;

pub use clients::{Clients, HeadlessClients};
pub use dispatch::{Completion, DispatchTable, Event, EventHandler, EventKind, Outcome};
pub use lifecycle::{ActivateReport, InstallReport, LifecycleManager, PrecacheOutcome, WorkerState};
pub use message::WorkerMessage;
pub use selector::{select, LiveDataRules, Scope, Strategy};
pub use strategies::{FetchStrategies, Served};

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheGeneration, CacheStore, GenerationNamespaces};
use crate::config::Config;
use crate::net::{Network, Request};

/// A booted worker instance.
pub struct Worker<S: CacheStore> {
  table: DispatchTable,
  lifecycle: Arc<LifecycleManager<S>>,
  network: Arc<dyn Network>,
  generation: CacheGeneration,
  namespaces: GenerationNamespaces,
}

impl<S: CacheStore + 'static> Worker<S> {
  /// Boot a worker for the configured generation with the standard
  /// dispatch table.
  pub fn boot(
    config: &Config,
    store: Arc<S>,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
  ) -> Result<Self> {
    let generation = config.generation()?;
    let namespaces = GenerationNamespaces::new(config.cache_prefix.as_deref(), &generation);
    let scope = config.scope();

    let lifecycle = Arc::new(LifecycleManager::new(
      Arc::clone(&store),
      Arc::clone(&network),
      clients,
      namespaces.clone(),
      scope.clone(),
      config.precache.clone(),
    ));
    let strategies = Arc::new(FetchStrategies::new(
      store,
      Arc::clone(&network),
      namespaces.clone(),
      scope.clone(),
    ));
    let table = DispatchTable::standard(Arc::clone(&lifecycle), strategies, scope);

    info!("Booted worker for generation {}", generation);

    Ok(Self {
      table,
      lifecycle,
      network,
      generation,
      namespaces,
    })
  }

  /// Replace the dispatch table.
  pub fn with_table(mut self, table: DispatchTable) -> Self {
    self.table = table;
    self
  }

  pub fn generation(&self) -> &CacheGeneration {
    &self.generation
  }

  pub fn namespaces(&self) -> &GenerationNamespaces {
    &self.namespaces
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.lifecycle.skip_waiting_requested()
  }

  /// Raise an event; the returned completion settles when its work is done.
  pub fn dispatch(&self, event: Event) -> Completion {
    self.table.dispatch(event)
  }

  pub async fn install(&self) -> Result<InstallReport> {
    match self.dispatch(Event::Install).await? {
      Outcome::Installed(report) => Ok(report),
      other => Err(unexpected("install", &other)),
    }
  }

  pub async fn activate(&self) -> Result<ActivateReport> {
    match self.dispatch(Event::Activate).await? {
      Outcome::Activated(report) => Ok(report),
      other => Err(unexpected("activate", &other)),
    }
  }

  /// Install, then activate straight away when the worker asked to skip
  /// the usual wait for old clients.
  pub async fn rollout(&self) -> Result<(InstallReport, Option<ActivateReport>)> {
    let installed = self.install().await?;

    if !self.skip_waiting_requested() {
      info!("Installed; waiting for existing clients before activating");
      return Ok((installed, None));
    }

    let activated = self.activate().await?;
    Ok((installed, Some(activated)))
  }

  /// Serve a request. Requests the worker doesn't intercept go straight to
  /// the network and are never cached.
  pub async fn fetch(&self, request: Request) -> Result<Served> {
    if !self.table.handles(EventKind::Fetch) {
      return self.passthrough(request).await;
    }

    match self.dispatch(Event::Fetch(request)).await? {
      Outcome::Responded(served) => Ok(served),
      Outcome::Passthrough(request) => self.passthrough(request).await,
      other => Err(unexpected("fetch", &other)),
    }
  }

  async fn passthrough(&self, request: Request) -> Result<Served> {
    debug!("Passing {} through to the network", request.url);
    let response = self.network.fetch(&request).await?;
    Ok(Served::passthrough(response))
  }

  /// Deliver a page message. Returns whether it was recognized.
  pub async fn message(&self, data: Value) -> Result<bool> {
    match self.dispatch(Event::Message(data)).await? {
      Outcome::Message { recognized } => Ok(recognized),
      Outcome::Unhandled => Ok(false),
      other => Err(unexpected("message", &other)),
    }
  }
}

fn unexpected(event: &str, outcome: &Outcome) -> color_eyre::Report {
  eyre!("Unexpected outcome for {} event: {:?}", event, outcome)
}

/// Run a store operation on the blocking pool. Every store access made while
/// handling an event goes through here, so a slow disk never stalls the
/// async workers.
pub(crate) async fn with_store<S, T, F>(store: &Arc<S>, op: F) -> Result<T>
where
  S: CacheStore + 'static,
  T: Send + 'static,
  F: FnOnce(&S) -> Result<T> + Send + 'static,
{
  let store = Arc::clone(store);
  tokio::task::spawn_blocking(move || op(&store))
    .await
    .map_err(|e| eyre!("Store task failed: {}", e))?
}
