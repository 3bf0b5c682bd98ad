//! Local offline-data store.
//!
//! One versioned SQLite database holds four independent collections:
//! - `offline_stories`: outbox of stories written while offline
//! - `favorites`: story snapshots keyed by story id
//! - `cache`: generic expiring key/value cache
//! - `settings`: last-write-wins key/value settings
//!
//! The store is opened explicitly; every operation on a closed store fails
//! with [`StoreError::NotOpen`].

mod backup;
mod error;
mod expiring;
mod favorites;
mod offline;
mod settings;
mod types;

pub use error::StoreError;
pub use expiring::DEFAULT_CACHE_TTL;
pub use types::{ExportData, ImportSummary, NewStory, OfflineStory, Story};

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::clock::SharedClock;

/// Current schema version. Bumping it runs the newly added migrations once.
pub const SCHEMA_VERSION: u32 = 3;

/// Migration `i` upgrades the schema from version `i` to `i + 1`.
///
/// Every statement is `IF NOT EXISTS` so a partially migrated database can be
/// upgraded again without touching existing collections.
const MIGRATIONS: &[&str] = &[
  r#"
CREATE TABLE IF NOT EXISTS offline_stories (
    id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    photo TEXT NOT NULL,
    lat REAL,
    lon REAL,
    timestamp INTEGER NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    synced_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_offline_stories_timestamp ON offline_stories(timestamp);
CREATE INDEX IF NOT EXISTS idx_offline_stories_synced ON offline_stories(synced);
"#,
  r#"
CREATE TABLE IF NOT EXISTS favorites (
    story_id TEXT PRIMARY KEY,
    story TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_favorites_timestamp ON favorites(timestamp);
"#,
  r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    expires INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_timestamp ON cache(timestamp);
"#,
];

const COLLECTIONS: &[&str] = &["offline_stories", "favorites", "settings", "cache"];

#[derive(Debug, Clone)]
enum Location {
  File(PathBuf),
  #[cfg(test)]
  Memory,
}

/// Handle to the local store. Construct once at startup and share by reference
/// or `Arc`; the inner connection is serialized by a mutex.
pub struct LocalStore {
  location: Location,
  conn: Mutex<Option<Connection>>,
  clock: SharedClock,
}

impl LocalStore {
  /// Create a handle for a database file. Nothing is touched until `open()`.
  pub fn new(path: impl Into<PathBuf>, clock: SharedClock) -> Self {
    Self {
      location: Location::File(path.into()),
      conn: Mutex::new(None),
      clock,
    }
  }

  /// Create a handle for a private in-memory database.
  #[cfg(test)]
  pub fn in_memory(clock: SharedClock) -> Self {
    Self {
      location: Location::Memory,
      conn: Mutex::new(None),
      clock,
    }
  }

  /// Open the database and bring the schema to [`SCHEMA_VERSION`].
  ///
  /// Calling `open()` on an already open store is a no-op.
  pub fn open(&self) -> Result<(), StoreError> {
    let mut guard = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    if guard.is_some() {
      return Ok(());
    }

    let mut conn = match &self.location {
      Location::File(path) => open_file(path)?,
      #[cfg(test)]
      Location::Memory => Connection::open_in_memory()
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?,
    };

    migrate(&mut conn)?;
    *guard = Some(conn);
    Ok(())
  }

  /// Close the underlying connection. Safe to call on a closed store.
  pub fn close(&self) -> Result<(), StoreError> {
    let mut guard = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    if let Some(conn) = guard.take() {
      conn.close().map_err(|(_, e)| StoreError::Database(e))?;
      debug!("local store closed");
    }
    Ok(())
  }

  pub fn is_open(&self) -> bool {
    self.conn.lock().map(|g| g.is_some()).unwrap_or(false)
  }

  /// Schema version recorded in the open database.
  pub fn schema_version(&self) -> Result<u32, StoreError> {
    self.with_conn(|conn| read_user_version(conn).map_err(StoreError::from))
  }

  fn now(&self) -> i64 {
    self.clock.now_millis()
  }

  /// Run `f` against the open connection.
  fn with_conn<T>(
    &self,
    f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
  ) -> Result<T, StoreError> {
    let mut guard = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let conn = guard.as_mut().ok_or(StoreError::NotOpen)?;
    f(conn)
  }
}

fn open_file(path: &Path) -> Result<Connection, StoreError> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(|e| {
      StoreError::StorageUnavailable(format!(
        "failed to create store directory {}: {}",
        parent.display(),
        e
      ))
    })?;
  }

  let conn = Connection::open(path).map_err(|e| {
    StoreError::StorageUnavailable(format!("failed to open {}: {}", path.display(), e))
  })?;

  conn
    .execute_batch(
      "PRAGMA journal_mode = WAL;
       PRAGMA synchronous = NORMAL;
       PRAGMA busy_timeout = 5000;",
    )
    .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

  Ok(conn)
}

fn read_user_version(conn: &Connection) -> rusqlite::Result<u32> {
  conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
  let current =
    read_user_version(conn).map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

  if current > SCHEMA_VERSION {
    return Err(StoreError::VersionMismatch {
      expected: SCHEMA_VERSION,
      found: current,
    });
  }
  if current == SCHEMA_VERSION {
    debug!(version = current, "store schema up to date");
    return Ok(());
  }

  let tx = conn.transaction()?;
  for (from, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
    info!(from, to = from + 1, "migrating store schema");
    tx.execute_batch(sql)?;
  }
  tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
  tx.commit()?;

  info!(version = SCHEMA_VERSION, "store schema migration complete");
  Ok(())
}
