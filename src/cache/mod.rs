//! Versioned cache store.
//!
//! This module provides:
//! - Cache generations and the namespaces derived from them
//! - A keyed, namespaced store of replayable responses
//! - A durable SQLite backend

mod generation;
mod storage;
mod traits;

pub use generation::{CacheGeneration, CacheNamespace, GenerationNamespaces, NamespacePurpose};
pub use storage::SqliteStorage;
pub use traits::{body_digest, CacheEntry, CacheKey, CacheStore};
