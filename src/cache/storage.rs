//! SQLite implementation of the cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::generation::CacheNamespace;
use super::traits::{CacheEntry, CacheKey, CacheStore};
use crate::net::Headers;

/// SQLite-based cache store.
///
/// Shared by every concurrently handled request of a worker and durable
/// across worker restarts. Writes are idempotent overwrites, so the only
/// serialization is the connection mutex itself.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Non-durable store, used by tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swcache").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (namespace, request identity)
CREATE TABLE IF NOT EXISTS entries (
    namespace TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, cache_key),
    FOREIGN KEY (namespace) REFERENCES namespaces(name) ON DELETE CASCADE
);
"#;

fn ensure_namespace(conn: &Connection, namespace: &CacheNamespace) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
      params![namespace.name()],
    )
    .map_err(|e| eyre!("Failed to open namespace {}: {}", namespace, e))?;
  Ok(())
}

impl CacheStore for SqliteStorage {
  fn open(&self, namespace: &CacheNamespace) -> Result<()> {
    let conn = self.lock()?;
    ensure_namespace(&conn, namespace)
  }

  fn get(&self, namespace: &CacheNamespace, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, status_text, headers, body, digest, cached_at FROM entries
         WHERE namespace = ? AND cache_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    type Row = (String, u16, String, String, Vec<u8>, String, String);
    let row: Option<Row> = stmt
      .query_row(params![namespace.name(), key.as_str()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key, e))?;

    let Some((url, status, status_text, headers, body, digest, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;

    Ok(Some(CacheEntry {
      url,
      status,
      status_text,
      headers,
      body,
      digest,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, namespace: &CacheNamespace, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
    let mut conn = self.lock()?;
    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_namespace(&tx, namespace)?;

    // Re-storing identical content keeps the original timestamp
    tx.execute(
      "INSERT INTO entries (namespace, cache_key, url, status, status_text, headers, body, digest, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
       ON CONFLICT (namespace, cache_key) DO UPDATE SET
         url = excluded.url,
         status = excluded.status,
         status_text = excluded.status_text,
         headers = excluded.headers,
         body = excluded.body,
         cached_at = CASE WHEN entries.digest = excluded.digest
                          AND entries.status = excluded.status
                          AND entries.headers = excluded.headers
                          THEN entries.cached_at ELSE excluded.cached_at END,
         digest = excluded.digest",
      params![
        namespace.name(),
        key.as_str(),
        entry.url,
        entry.status,
        entry.status_text,
        headers,
        entry.body,
        entry.digest,
        entry.cached_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn list_namespaces(&self) -> Result<BTreeSet<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM namespaces")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<BTreeSet<_>>>()
      .map_err(|e| eyre!("Failed to read namespace name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, namespace: &CacheNamespace) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM entries WHERE namespace = ?",
      params![namespace.name()],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", namespace, e))?;

    let removed = tx
      .execute(
        "DELETE FROM namespaces WHERE name = ?",
        params![namespace.name()],
      )
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn keys(&self, namespace: &CacheNamespace) -> Result<Vec<CacheKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT cache_key FROM entries WHERE namespace = ? ORDER BY cache_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![namespace.name()], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", namespace, e))?
      .map(|r| r.map(CacheKey::from_stored))
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(keys)
  }
}

/// Parse a timestamp written by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
