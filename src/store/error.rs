use thiserror::Error;

/// Errors surfaced by the local store.
///
/// Absence is never an error: lookups return `Option` instead.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The platform refused access to persistent storage.
  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),

  /// An operation was attempted before `open()` or after `close()`.
  #[error("store is not open")]
  NotOpen,

  /// Imported data (or the on-disk schema) carries a different schema version.
  #[error("schema version mismatch: expected {expected}, found {found}")]
  VersionMismatch { expected: u32, found: u32 },

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("store lock poisoned")]
  LockPoisoned,
}
