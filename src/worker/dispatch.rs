//! Event dispatch: a table from event kind to handler, built once at boot.
//!
//! Every handler returns a [`Completion`], a future representing all the
//! work the event entails. The host awaits it before treating the event as
//! settled.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::lifecycle::{ActivateReport, InstallReport, LifecycleManager};
use super::selector::{self, Scope, Strategy};
use super::strategies::{FetchStrategies, Served};
use crate::cache::CacheStore;
use crate::net::Request;

/// Events raised by the host
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  Message(Value),
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Install => EventKind::Install,
      Self::Activate => EventKind::Activate,
      Self::Fetch(_) => EventKind::Fetch,
      Self::Message(_) => EventKind::Message,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Message,
}

/// What handling an event produced
#[derive(Debug)]
pub enum Outcome {
  Installed(InstallReport),
  Activated(ActivateReport),
  Responded(Served),
  /// Not intercepted; the host should use its default network path
  Passthrough(Request),
  Message { recognized: bool },
  /// No handler is registered for the event kind
  Unhandled,
}

/// Deferred result of handling one event
pub type Completion = BoxFuture<'static, Result<Outcome>>;

pub trait EventHandler: Send + Sync {
  fn handle(&self, event: Event) -> Completion;
}

/// Mapping from event kind to handler
#[derive(Default)]
pub struct DispatchTable {
  handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl DispatchTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Table wiring every event to the cache manager.
  pub fn standard<S: CacheStore + 'static>(
    lifecycle: Arc<LifecycleManager<S>>,
    strategies: Arc<FetchStrategies<S>>,
    scope: Scope,
  ) -> Self {
    Self::new()
      .with(
        EventKind::Install,
        Arc::new(InstallHandler {
          lifecycle: Arc::clone(&lifecycle),
        }),
      )
      .with(
        EventKind::Activate,
        Arc::new(ActivateHandler {
          lifecycle: Arc::clone(&lifecycle),
        }),
      )
      .with(
        EventKind::Fetch,
        Arc::new(FetchHandler { strategies, scope }),
      )
      .with(EventKind::Message, Arc::new(MessageHandler { lifecycle }))
  }

  /// Register a handler, replacing any previous one for the kind.
  pub fn with(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
    self.handlers.insert(kind, handler);
    self
  }

  pub fn handles(&self, kind: EventKind) -> bool {
    self.handlers.contains_key(&kind)
  }

  pub fn dispatch(&self, event: Event) -> Completion {
    match self.handlers.get(&event.kind()) {
      Some(handler) => handler.handle(event),
      None => {
        debug!("No handler for {:?} event", event.kind());
        async { Ok(Outcome::Unhandled) }.boxed()
      }
    }
  }
}

fn misrouted(handler: &'static str, kind: EventKind) -> Completion {
  async move { Err(eyre!("{} handler received a {:?} event", handler, kind)) }.boxed()
}

struct InstallHandler<S: CacheStore> {
  lifecycle: Arc<LifecycleManager<S>>,
}

impl<S: CacheStore + 'static> EventHandler for InstallHandler<S> {
  fn handle(&self, event: Event) -> Completion {
    if !matches!(event, Event::Install) {
      return misrouted("Install", event.kind());
    }
    let lifecycle = Arc::clone(&self.lifecycle);
    async move { lifecycle.install().await.map(Outcome::Installed) }.boxed()
  }
}

struct ActivateHandler<S: CacheStore> {
  lifecycle: Arc<LifecycleManager<S>>,
}

impl<S: CacheStore + 'static> EventHandler for ActivateHandler<S> {
  fn handle(&self, event: Event) -> Completion {
    if !matches!(event, Event::Activate) {
      return misrouted("Activate", event.kind());
    }
    let lifecycle = Arc::clone(&self.lifecycle);
    async move { lifecycle.activate().await.map(Outcome::Activated) }.boxed()
  }
}

struct FetchHandler<S: CacheStore> {
  strategies: Arc<FetchStrategies<S>>,
  scope: Scope,
}

impl<S: CacheStore + 'static> EventHandler for FetchHandler<S> {
  fn handle(&self, event: Event) -> Completion {
    let request = match event {
      Event::Fetch(request) => request,
      other => return misrouted("Fetch", other.kind()),
    };

    let strategy = selector::select(&request, &self.scope);
    debug!("{} {} -> {}", request.method, request.url, strategy.as_str());

    let strategies = Arc::clone(&self.strategies);
    async move {
      let served = match strategy {
        Strategy::Bypass => return Ok(Outcome::Passthrough(request)),
        Strategy::NetworkFirst => strategies.network_first(&request).await,
        Strategy::CacheFirst => strategies.cache_first(&request).await,
      };
      Ok(Outcome::Responded(served))
    }
    .boxed()
  }
}

struct MessageHandler<S: CacheStore> {
  lifecycle: Arc<LifecycleManager<S>>,
}

impl<S: CacheStore + 'static> EventHandler for MessageHandler<S> {
  fn handle(&self, event: Event) -> Completion {
    let data = match event {
      Event::Message(data) => data,
      other => return misrouted("Message", other.kind()),
    };
    let recognized = self.lifecycle.on_message(&data);
    async move { Ok(Outcome::Message { recognized }) }.boxed()
  }
}
