//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::HttpResponse;

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The cached response
  pub response: HttpResponse,
  /// When the response was cached (epoch ms)
  pub cached_at: i64,
}

/// Trait for cache storage backends.
///
/// Entries live in named caches and are addressed by a request key
/// (see [`super::request_key`]).
pub trait CacheStorage: Send + Sync {
  /// Get a single entry.
  fn get(&self, cache: &str, key: &str) -> Result<Option<CachedEntry>>;

  /// Insert or replace a single entry.
  fn put(&self, cache: &str, key: &str, response: &HttpResponse, now: i64) -> Result<()>;

  /// Write a batch of entries as one unit: either all land or none do.
  fn put_all(&self, cache: &str, entries: &[(String, HttpResponse)], now: i64) -> Result<()>;

  /// Delete a single entry.
  fn delete(&self, cache: &str, key: &str) -> Result<()>;

  /// Names of every cache holding at least one entry.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Drop a whole cache. Returns the number of entries removed.
  fn delete_cache(&self, cache: &str) -> Result<usize>;

  /// Evict the oldest entries until at most `max_entries` remain.
  fn trim(&self, cache: &str, max_entries: usize) -> Result<usize>;

  /// Remove entries cached before `cutoff` (epoch ms).
  fn purge_older_than(&self, cache: &str, cutoff: i64) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Private in-memory cache database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open cache database: {}", e))?;
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_age
    ON response_cache(cache_name, cached_at);
"#;

const INSERT_ENTRY: &str =
  "INSERT OR REPLACE INTO response_cache (cache_name, request_key, url, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, ?)";

fn insert_entry(
  conn: &Connection,
  cache: &str,
  key: &str,
  response: &HttpResponse,
  now: i64,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      INSERT_ENTRY,
      params![
        cache,
        key,
        response.url,
        response.status,
        headers,
        response.body,
        now
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn get(&self, cache: &str, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let row: Option<(String, u16, String, Vec<u8>, i64)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM response_cache
         WHERE cache_name = ? AND request_key = ?",
        params![cache, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedEntry {
          response: HttpResponse {
            url,
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, cache: &str, key: &str, response: &HttpResponse, now: i64) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, cache, key, response, now)
  }

  fn put_all(&self, cache: &str, entries: &[(String, HttpResponse)], now: i64) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      insert_entry(&tx, cache, key, response, now)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn delete(&self, cache: &str, key: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "DELETE FROM response_cache WHERE cache_name = ? AND request_key = ?",
        params![cache, key],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT cache_name FROM response_cache ORDER BY cache_name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, cache: &str) -> Result<usize> {
    self
      .lock()?
      .execute(
        "DELETE FROM response_cache WHERE cache_name = ?",
        params![cache],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))
  }

  fn trim(&self, cache: &str, max_entries: usize) -> Result<usize> {
    self
      .lock()?
      .execute(
        "DELETE FROM response_cache WHERE cache_name = ?1 AND request_key IN (
           SELECT request_key FROM response_cache WHERE cache_name = ?1
           ORDER BY cached_at DESC, rowid DESC LIMIT -1 OFFSET ?2
         )",
        params![cache, max_entries as i64],
      )
      .map_err(|e| eyre!("Failed to trim cache {}: {}", cache, e))
  }

  fn purge_older_than(&self, cache: &str, cutoff: i64) -> Result<usize> {
    self
      .lock()?
      .execute(
        "DELETE FROM response_cache WHERE cache_name = ? AND cached_at < ?",
        params![cache, cutoff],
      )
      .map_err(|e| eyre!("Failed to purge cache {}: {}", cache, e))
  }
}
