//! Export, import and wipe of the whole store.

use chrono::{TimeZone, Utc};
use rusqlite::params;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{ExportData, ImportSummary, LocalStore, StoreError, COLLECTIONS, SCHEMA_VERSION};

impl LocalStore {
  /// Snapshot offline stories, favorites and settings for backup.
  /// Each collection is read separately; there is no cross-collection
  /// snapshot isolation.
  pub fn export_data(&self) -> Result<ExportData, StoreError> {
    let exported_at = Utc
      .timestamp_millis_opt(self.now())
      .single()
      .unwrap_or_else(Utc::now);
    let offline_stories = self.get_offline_stories()?;
    let favorites = self.get_favorites()?;

    let rows: Vec<(String, String)> = self.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(rows)
    })?;

    let mut settings = BTreeMap::new();
    for (key, raw) in rows {
      settings.insert(key, serde_json::from_str::<Value>(&raw)?);
    }

    Ok(ExportData {
      exported_at,
      version: SCHEMA_VERSION,
      offline_stories,
      favorites,
      settings,
    })
  }

  /// Upsert every record of an export, keeping its ids.
  ///
  /// Fails up front with `VersionMismatch` without touching the store.
  /// Otherwise each collection is written in its own transaction; a failing
  /// collection is rolled back and reported in the summary while the others
  /// are still imported.
  pub fn import_data(&self, data: &ExportData) -> Result<ImportSummary, StoreError> {
    if data.version != SCHEMA_VERSION {
      return Err(StoreError::VersionMismatch {
        expected: SCHEMA_VERSION,
        found: data.version,
      });
    }
    // Surface a closed store as an error instead of three per-collection failures.
    self.with_conn(|_| Ok(()))?;

    let now = self.now();
    let mut summary = ImportSummary::default();

    match self.import_offline_stories(data) {
      Ok(count) => summary.offline_stories = count,
      Err(e) => {
        warn!(error = %e, "offline stories import failed");
        summary.failures.push(format!("offline_stories: {}", e));
      }
    }

    match self.import_favorites(data, now) {
      Ok(count) => summary.favorites = count,
      Err(e) => {
        warn!(error = %e, "favorites import failed");
        summary.failures.push(format!("favorites: {}", e));
      }
    }

    match self.import_settings(data, now) {
      Ok(count) => summary.settings = count,
      Err(e) => {
        warn!(error = %e, "settings import failed");
        summary.failures.push(format!("settings: {}", e));
      }
    }

    info!(
      offline_stories = summary.offline_stories,
      favorites = summary.favorites,
      settings = summary.settings,
      failures = summary.failures.len(),
      "import finished"
    );
    Ok(summary)
  }

  fn import_offline_stories(&self, data: &ExportData) -> Result<usize, StoreError> {
    self.with_conn(|conn| {
      let tx = conn.transaction()?;
      for story in &data.offline_stories {
        tx.execute(
          "INSERT OR REPLACE INTO offline_stories (id, description, photo, lat, lon, timestamp, synced, synced_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          params![
            story.id,
            story.description,
            story.photo,
            story.lat,
            story.lon,
            story.timestamp,
            story.synced,
            story.synced_at
          ],
        )?;
      }
      tx.commit()?;
      Ok(data.offline_stories.len())
    })
  }

  fn import_favorites(&self, data: &ExportData, now: i64) -> Result<usize, StoreError> {
    let snapshots = data
      .favorites
      .iter()
      .map(|story| Ok((story.id.as_str(), serde_json::to_string(story)?)))
      .collect::<Result<Vec<_>, StoreError>>()?;

    self.with_conn(|conn| {
      let tx = conn.transaction()?;
      for (story_id, snapshot) in &snapshots {
        tx.execute(
          "INSERT OR REPLACE INTO favorites (story_id, story, timestamp) VALUES (?1, ?2, ?3)",
          params![story_id, snapshot, now],
        )?;
      }
      tx.commit()?;
      Ok(snapshots.len())
    })
  }

  fn import_settings(&self, data: &ExportData, now: i64) -> Result<usize, StoreError> {
    let values = data
      .settings
      .iter()
      .map(|(key, value)| Ok((key.as_str(), serde_json::to_string(value)?)))
      .collect::<Result<Vec<_>, StoreError>>()?;

    self.with_conn(|conn| {
      let tx = conn.transaction()?;
      for (key, value) in &values {
        tx.execute(
          "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
          params![key, value, now],
        )?;
      }
      tx.commit()?;
      Ok(values.len())
    })
  }

  /// Empty every collection. Irreversible.
  pub fn clear_all_data(&self) -> Result<(), StoreError> {
    for table in COLLECTIONS {
      self.with_conn(|conn| {
        conn.execute(&format!("DELETE FROM {}", table), [])?;
        Ok(())
      })?;
    }
    info!("all local data cleared");
    Ok(())
  }
}
