use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use super::{LocalStore, StoreError};

impl LocalStore {
  /// Store `value` under `key`; the last write wins.
  pub fn set_setting<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
    let now = self.now();
    let value = serde_json::to_string(value)?;

    self.with_conn(|conn| {
      conn.execute(
        "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
        params![key, value, now],
      )?;
      Ok(())
    })
  }

  /// Setting for `key`, or `default` when it has never been written.
  pub fn get_setting<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StoreError> {
    let raw: Option<String> = self.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
          )
          .optional()?,
      )
    })?;

    match raw {
      Some(raw) => Ok(serde_json::from_str(&raw)?),
      None => Ok(default),
    }
  }

  pub fn remove_setting(&self, key: &str) -> Result<(), StoreError> {
    self.with_conn(|conn| {
      conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
      Ok(())
    })
  }
}
