//! Outbox delivery of stories written while offline.

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::store::{LocalStore, OfflineStory, StoreError};

/// Delivers a story to the remote API.
pub trait StoryUploader: Send + Sync {
  fn upload<'a>(&'a self, story: &'a OfflineStory) -> BoxFuture<'a, color_eyre::Result<()>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub synced: usize,
  pub failed: usize,
}

/// Upload every unsynced story, oldest first, marking each delivered one
/// synced. A failed upload is logged and left for the next run.
pub async fn sync_offline_stories<U>(store: &LocalStore, uploader: &U) -> Result<SyncReport, StoreError>
where
  U: StoryUploader + ?Sized,
{
  let pending = store.get_unsynced_stories()?;
  let mut report = SyncReport {
    attempted: pending.len(),
    ..Default::default()
  };

  for story in &pending {
    match uploader.upload(story).await {
      Ok(()) => {
        store.mark_story_as_synced(&story.id)?;
        report.synced += 1;
        info!(id = %story.id, "offline story delivered");
      }
      Err(e) => {
        report.failed += 1;
        warn!(id = %story.id, error = %e, "offline story delivery failed");
      }
    }
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::NewStory;
  use color_eyre::eyre::eyre;
  use std::sync::Mutex;

  /// Accepts every story except those whose description is "reject".
  #[derive(Default)]
  struct FakeUploader {
    uploaded: Mutex<Vec<String>>,
  }

  impl StoryUploader for FakeUploader {
    fn upload<'a>(&'a self, story: &'a OfflineStory) -> BoxFuture<'a, color_eyre::Result<()>> {
      Box::pin(async move {
        if story.description == "reject" {
          return Err(eyre!("413 payload too large"));
        }
        self.uploaded.lock().unwrap().push(story.description.clone());
        Ok(())
      })
    }
  }

  fn store_with(descriptions: &[&str]) -> LocalStore {
    let clock = ManualClock::at(0);
    let store = LocalStore::in_memory(clock.clone());
    store.open().unwrap();
    for description in descriptions {
      clock.advance(1);
      store
        .save_offline_story(NewStory {
          description: description.to_string(),
          photo: "/tmp/p.jpg".to_string(),
          ..Default::default()
        })
        .unwrap();
    }
    store
  }

  #[tokio::test]
  async fn delivers_in_order_and_keeps_failures() {
    let store = store_with(&["first", "reject", "third"]);
    let uploader = FakeUploader::default();

    let report = sync_offline_stories(&store, &uploader).await.unwrap();
    assert_eq!(
      report,
      SyncReport {
        attempted: 3,
        synced: 2,
        failed: 1
      }
    );
    assert_eq!(*uploader.uploaded.lock().unwrap(), vec!["first", "third"]);

    let pending = store.get_unsynced_stories().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].description, "reject");
  }

  #[tokio::test]
  async fn second_run_only_retries_pending() {
    let store = store_with(&["a", "b"]);
    let uploader = FakeUploader::default();

    sync_offline_stories(&store, &uploader).await.unwrap();
    let report = sync_offline_stories(&store, &uploader).await.unwrap();
    assert_eq!(report, SyncReport::default());
    assert_eq!(uploader.uploaded.lock().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn closed_store_fails() {
    let store = store_with(&[]);
    store.close().unwrap();
    assert!(matches!(
      sync_offline_stories(&store, &FakeUploader::default()).await,
      Err(StoreError::NotOpen)
    ));
  }
}
