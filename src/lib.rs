//! Versioned resource caching for an offline-capable web app.
//!
//! Each deployed build owns a generation of cache namespaces. Installing a
//! generation precaches the app shell; activating it removes every older
//! generation and takes over open clients. Fetches are served network-first
//! for markup and cache-first for static assets, while live data and
//! cross-origin requests bypass the cache entirely.

pub mod cache;
pub mod config;
pub mod logging;
pub mod net;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
