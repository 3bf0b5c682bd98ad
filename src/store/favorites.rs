use rusqlite::{params, OptionalExtension};

use super::{LocalStore, Story, StoreError};

impl LocalStore {
  /// Favorite a story, replacing any earlier snapshot of the same id.
  pub fn add_to_favorites(&self, story: &Story) -> Result<(), StoreError> {
    let now = self.now();
    let snapshot = serde_json::to_string(story)?;

    self.with_conn(|conn| {
      conn.execute(
        "INSERT INTO favorites (story_id, story, timestamp) VALUES (?1, ?2, ?3)
         ON CONFLICT(story_id) DO UPDATE SET story = excluded.story, timestamp = excluded.timestamp",
        params![story.id, snapshot, now],
      )?;
      Ok(())
    })
  }

  pub fn remove_from_favorites(&self, story_id: &str) -> Result<(), StoreError> {
    self.with_conn(|conn| {
      conn.execute("DELETE FROM favorites WHERE story_id = ?1", params![story_id])?;
      Ok(())
    })
  }

  /// Embedded story snapshots, ordered by story id.
  pub fn get_favorites(&self) -> Result<Vec<Story>, StoreError> {
    let rows: Vec<String> = self.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT story FROM favorites ORDER BY story_id")?;
      let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(rows)
    })?;

    rows
      .iter()
      .map(|data| serde_json::from_str(data).map_err(StoreError::from))
      .collect()
  }

  pub fn is_favorite(&self, story_id: &str) -> Result<bool, StoreError> {
    self.with_conn(|conn| {
      let found = conn
        .query_row(
          "SELECT 1 FROM favorites WHERE story_id = ?1",
          params![story_id],
          |_| Ok(()),
        )
        .optional()?;
      Ok(found.is_some())
    })
  }

  /// Favorited-at time of a story, epoch ms.
  #[cfg(test)]
  fn favorite_timestamp(&self, story_id: &str) -> Result<Option<i64>, StoreError> {
    self.with_conn(|conn| {
      Ok(
        conn
          .query_row(
            "SELECT timestamp FROM favorites WHERE story_id = ?1",
            params![story_id],
            |row| row.get(0),
          )
          .optional()?,
      )
    })
  }
}
