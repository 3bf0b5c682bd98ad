//! Records persisted by the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Snapshot of a story as published by the remote API.
///
/// Favorites embed a point-in-time copy of this; it is never refreshed from
/// the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub photo_url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lat: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lon: Option<f64>,
}

/// A story written while offline, before the remote API has accepted it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewStory {
  /// Caller-supplied id; one is generated when absent.
  pub id: Option<String>,
  pub description: String,
  /// Local path of the photo to upload.
  pub photo: String,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
}

/// Outbox record for a story awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineStory {
  pub id: String,
  pub description: String,
  pub photo: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lat: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lon: Option<f64>,
  /// Creation time, epoch ms.
  pub timestamp: i64,
  #[serde(default)]
  pub synced: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub synced_at: Option<i64>,
}

/// User-initiated backup document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
  pub exported_at: DateTime<Utc>,
  pub version: u32,
  #[serde(default)]
  pub offline_stories: Vec<OfflineStory>,
  #[serde(default)]
  pub favorites: Vec<Story>,
  #[serde(default)]
  pub settings: BTreeMap<String, Value>,
}

/// Outcome of `import_data`. Collections are imported independently, so a
/// failure in one is reported here while the others still land.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
  pub offline_stories: usize,
  pub favorites: usize,
  pub settings: usize,
  pub failures: Vec<String>,
}

impl ImportSummary {
  pub fn is_complete(&self) -> bool {
    self.failures.is_empty()
  }
}
