//! Generic key/value cache with per-entry expiry.
//!
//! Expiry is checked lazily: a read past `expires` deletes the entry and
//! reports a miss. `clear_expired_cache` sweeps the rest on demand.

use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{LocalStore, StoreError};

/// TTL applied when the caller has no better idea.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(5 * 60 * 1000);

impl LocalStore {
  /// Insert or replace `key`, expiring `ttl` from now.
  pub fn set_cache<T: Serialize + ?Sized>(
    &self,
    key: &str,
    data: &T,
    ttl: Duration,
  ) -> Result<(), StoreError> {
    let now = self.now();
    let expires = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
    let data = serde_json::to_string(data)?;

    self.with_conn(|conn| {
      conn.execute(
        "INSERT OR REPLACE INTO cache (key, data, timestamp, expires) VALUES (?1, ?2, ?3, ?4)",
        params![key, data, now, expires],
      )?;
      Ok(())
    })
  }

  /// Cached value for `key`, or `None` on a miss. Expired entries are
  /// deleted as part of the read.
  pub fn get_cache<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
    let now = self.now();

    let data = self.with_conn(|conn| {
      let entry: Option<(String, i64)> = conn
        .query_row(
          "SELECT data, expires FROM cache WHERE key = ?1",
          params![key],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

      match entry {
        Some((data, expires)) if now < expires => Ok(Some(data)),
        Some(_) => {
          conn.execute("DELETE FROM cache WHERE key = ?1", params![key])?;
          debug!(key, "expired cache entry removed on read");
          Ok(None)
        }
        None => Ok(None),
      }
    })?;

    match data {
      Some(data) => Ok(Some(serde_json::from_str(&data)?)),
      None => Ok(None),
    }
  }

  pub fn delete_cache(&self, key: &str) -> Result<(), StoreError> {
    self.with_conn(|conn| {
      conn.execute("DELETE FROM cache WHERE key = ?1", params![key])?;
      Ok(())
    })
  }

  /// Remove every entry whose `expires` is in the past. Walks the cache in
  /// write order and deletes entries one at a time, so concurrent readers
  /// may observe partial progress. Returns the number of entries removed.
  pub fn clear_expired_cache(&self) -> Result<usize, StoreError> {
    let now = self.now();

    let expired: Vec<String> = self.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT key, expires FROM cache ORDER BY timestamp")?;
      let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(
        rows
          .into_iter()
          .filter(|(_, expires)| *expires < now)
          .map(|(key, _)| key)
          .collect(),
      )
    })?;

    let mut removed = 0;
    for key in &expired {
      self.with_conn(|conn| {
        removed += conn.execute(
          "DELETE FROM cache WHERE key = ?1 AND expires < ?2",
          params![key, now],
        )?;
        Ok(())
      })?;
    }

    debug!(removed, "expired cache entries cleared");
    Ok(removed)
  }

  #[cfg(test)]
  fn cache_entry_exists(&self, key: &str) -> bool {
    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT 1 FROM cache WHERE key = ?1")?;
        Ok(stmt.exists(params![key])?)
      })
      .unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use serde_json::{json, Value};

  #[test]
  fn entry_expires_after_ttl() {
    let clock = ManualClock::at(0);
    let store = LocalStore::in_memory(clock.clone());
    store.open().unwrap();

    let stories = json!([{"id": "story-1"}, {"id": "story-2"}]);
    store
      .set_cache("stories", &stories, Duration::from_millis(1000))
      .unwrap();

    clock.set(500);
    assert_eq!(store.get_cache::<Value>("stories").unwrap(), Some(stories));

    clock.set(1500);
    assert_eq!(store.get_cache::<Value>("stories").unwrap(), None);
    assert!(!store.cache_entry_exists("stories"));
    assert_eq!(store.get_cache::<Value>("stories").unwrap(), None);
  }

  #[test]
  fn expiry_boundary_is_a_miss() {
    let clock = ManualClock::at(10);
    let store = LocalStore::in_memory(clock.clone());
    store.open().unwrap();

    store.set_cache("k", &1, Duration::from_millis(90)).unwrap();
    clock.set(99);
    assert_eq!(store.get_cache::<i32>("k").unwrap(), Some(1));
    clock.set(100);
    assert_eq!(store.get_cache::<i32>("k").unwrap(), None);
  }

  #[test]
  fn default_ttl_is_five_minutes() {
    let clock = ManualClock::at(0);
    let store = LocalStore::in_memory(clock.clone());
    store.open().unwrap();

    store.set_cache("k", "v", DEFAULT_CACHE_TTL).unwrap();
    clock.set(299_999);
    assert_eq!(store.get_cache::<String>("k").unwrap().as_deref(), Some("v"));
    clock.set(300_000);
    assert_eq!(store.get_cache::<String>("k").unwrap(), None);
  }

  #[test]
  fn set_replaces_and_delete_evicts() {
    let store = LocalStore::in_memory(ManualClock::at(0));
    store.open().unwrap();

    store.set_cache("k", &1, DEFAULT_CACHE_TTL).unwrap();
    store.set_cache("k", &2, DEFAULT_CACHE_TTL).unwrap();
    assert_eq!(store.get_cache::<i32>("k").unwrap(), Some(2));

    store.delete_cache("k").unwrap();
    store.delete_cache("k").unwrap();
    assert_eq!(store.get_cache::<i32>("k").unwrap(), None);
  }

  #[test]
  fn sweep_removes_only_expired() {
    let clock = ManualClock::at(0);
    let store = LocalStore::in_memory(clock.clone());
    store.open().unwrap();

    store.set_cache("short", &1, Duration::from_millis(100)).unwrap();
    store.set_cache("long", &2, Duration::from_millis(10_000)).unwrap();
    clock.set(50);
    store.set_cache("medium", &3, Duration::from_millis(100)).unwrap();

    clock.set(200);
    assert_eq!(store.clear_expired_cache().unwrap(), 2);
    assert!(!store.cache_entry_exists("short"));
    assert!(!store.cache_entry_exists("medium"));
    assert!(store.cache_entry_exists("long"));
    assert_eq!(store.clear_expired_cache().unwrap(), 0);
  }
}
