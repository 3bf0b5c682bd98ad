//! Push payload decoding and the notification surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

pub const DEFAULT_TITLE: &str = "Story Map";
pub const DEFAULT_BODY: &str = "There is a new story for you";
pub const DEFAULT_URL: &str = "/";
pub const DEFAULT_ICON: &str = "/favicon.png";
pub const DEFAULT_TAG: &str = "story-map";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  /// Page opened when the notification is clicked
  pub url: String,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub tag: String,
  pub data: NotificationData,
}

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  url: Option<String>,
  icon: Option<String>,
  tag: Option<String>,
}

impl Notification {
  /// Build a notification from a raw push payload.
  ///
  /// A JSON object supplies any of title, body, url, icon and tag. Anything
  /// else is shown as the body under the default title.
  pub fn from_push(payload: &[u8]) -> Self {
    let parsed = match serde_json::from_slice::<Value>(payload) {
      Ok(value @ Value::Object(_)) => serde_json::from_value::<PushPayload>(value).ok(),
      Ok(Value::String(text)) => Some(PushPayload {
        body: Some(text),
        ..Default::default()
      }),
      _ => None,
    };

    let payload = parsed.unwrap_or_else(|| PushPayload {
      body: Some(String::from_utf8_lossy(payload).trim().to_string()),
      ..Default::default()
    });

    Self {
      title: non_empty(payload.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
      body: non_empty(payload.body).unwrap_or_else(|| DEFAULT_BODY.to_string()),
      icon: non_empty(payload.icon).unwrap_or_else(|| DEFAULT_ICON.to_string()),
      tag: non_empty(payload.tag).unwrap_or_else(|| DEFAULT_TAG.to_string()),
      data: NotificationData {
        url: non_empty(payload.url).unwrap_or_else(|| DEFAULT_URL.to_string()),
      },
    }
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.is_empty())
}

/// Where notifications are displayed.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification);

  fn close(&self, tag: &str);
}

/// In-process notification tray. A notification replaces any shown
/// notification with the same tag.
#[derive(Default)]
pub struct NotificationCenter {
  shown: Mutex<Vec<Notification>>,
}

impl NotificationCenter {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
    self.shown.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn displayed(&self) -> Vec<Notification> {
    self.lock().clone()
  }
}

impl Notifier for NotificationCenter {
  fn show(&self, notification: &Notification) {
    info!(
      title = %notification.title,
      body = %notification.body,
      url = %notification.data.url,
      "notification shown"
    );
    let mut shown = self.lock();
    shown.retain(|n| n.tag != notification.tag);
    shown.push(notification.clone());
  }

  fn close(&self, tag: &str) {
    self.lock().retain(|n| n.tag != tag);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn json_payload_fills_fields() {
    let n = Notification::from_push(br#"{"title":"Alert","body":"New story","url":"/stories/42"}"#);
    assert_eq!(n.title, "Alert");
    assert_eq!(n.body, "New story");
    assert_eq!(n.data.url, "/stories/42");
    assert_eq!(n.icon, DEFAULT_ICON);
    assert_eq!(n.tag, DEFAULT_TAG);
  }

  #[test]
  fn plain_text_becomes_body() {
    let n = Notification::from_push(b"Hello");
    assert_eq!(n.title, DEFAULT_TITLE);
    assert_eq!(n.body, "Hello");
    assert_eq!(n.data.url, DEFAULT_URL);
  }

  #[test]
  fn json_string_and_empty_payloads() {
    assert_eq!(Notification::from_push(br#""Hi there""#).body, "Hi there");

    let empty = Notification::from_push(b"");
    assert_eq!(empty.title, DEFAULT_TITLE);
    assert_eq!(empty.body, DEFAULT_BODY);

    let partial = Notification::from_push(br#"{"url":"/stories/7"}"#);
    assert_eq!(partial.body, DEFAULT_BODY);
    assert_eq!(partial.data.url, "/stories/7");
  }

  #[test]
  fn same_tag_replaces() {
    let center = NotificationCenter::new();
    center.show(&Notification::from_push(b"first"));
    center.show(&Notification::from_push(b"second"));
    center.show(&Notification::from_push(br#"{"body":"other","tag":"x"}"#));

    let shown = center.displayed();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].body, "second");

    center.close(DEFAULT_TAG);
    assert_eq!(center.displayed().len(), 1);
  }
}
