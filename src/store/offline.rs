//! Outbox of stories written while offline.

use rand::Rng;
use rusqlite::{params, Row};
use tracing::debug;

use super::{LocalStore, NewStory, OfflineStory, StoreError};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

const SELECT_COLUMNS: &str =
  "SELECT id, description, photo, lat, lon, timestamp, synced, synced_at FROM offline_stories";

/// Build a locally unique id: `offline_<now>_<random base36 suffix>`.
fn generate_offline_id(now: i64) -> String {
  let mut rng = rand::thread_rng();
  let suffix: String = (0..ID_SUFFIX_LEN)
    .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
    .collect();
  format!("offline_{}_{}", now, suffix)
}

fn row_to_offline_story(row: &Row) -> rusqlite::Result<OfflineStory> {
  Ok(OfflineStory {
    id: row.get(0)?,
    description: row.get(1)?,
    photo: row.get(2)?,
    lat: row.get(3)?,
    lon: row.get(4)?,
    timestamp: row.get(5)?,
    synced: row.get(6)?,
    synced_at: row.get(7)?,
  })
}

impl LocalStore {
  /// Queue a story for later delivery and return its id.
  pub fn save_offline_story(&self, story: NewStory) -> Result<String, StoreError> {
    let now = self.now();
    let id = story.id.unwrap_or_else(|| generate_offline_id(now));

    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO offline_stories (id, description, photo, lat, lon, timestamp, synced, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL)",
        params![id, story.description, story.photo, story.lat, story.lon, now],
      )?;
      Ok(())
    })?;

    debug!(id = %id, "offline story saved");
    Ok(id)
  }

  /// All queued stories, oldest first.
  pub fn get_offline_stories(&self) -> Result<Vec<OfflineStory>, StoreError> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(&format!("{} ORDER BY timestamp, rowid", SELECT_COLUMNS))?;
      let stories = stmt
        .query_map([], row_to_offline_story)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(stories)
    })
  }

  /// Stories the remote API has not confirmed yet.
  pub fn get_unsynced_stories(&self) -> Result<Vec<OfflineStory>, StoreError> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(&format!(
        "{} WHERE synced = 0 ORDER BY timestamp, rowid",
        SELECT_COLUMNS
      ))?;
      let stories = stmt
        .query_map([], row_to_offline_story)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(stories)
    })
  }

  /// Mark a story delivered. Returns `false` when the id is unknown or the
  /// story was already synced; a synced record is never rewritten.
  pub fn mark_story_as_synced(&self, id: &str) -> Result<bool, StoreError> {
    let now = self.now();
    let changed = self.with_conn(|conn| {
      Ok(conn.execute(
        "UPDATE offline_stories SET synced = 1, synced_at = ?2 WHERE id = ?1 AND synced = 0",
        params![id, now],
      )?)
    })?;
    Ok(changed > 0)
  }

  pub fn delete_offline_story(&self, id: &str) -> Result<(), StoreError> {
    self.with_conn(|conn| {
      conn.execute("DELETE FROM offline_stories WHERE id = ?1", params![id])?;
      Ok(())
    })
  }
}
