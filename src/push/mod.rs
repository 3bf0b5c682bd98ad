//! Push subscription lifecycle.
//!
//! A subscription exists in two places: the local push manager (which owns
//! the keys, in the device state file rather than the local store) and the
//! remote story API (which sends the pushes). The
//! [`SubscriptionManager`] keeps the two consistent.

mod keys;
mod local;
mod manager;

pub use keys::decode_application_server_key;
pub use local::LocalPushManager;
pub use manager::SubscriptionManager;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceStateError;

/// Notification permission state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
  Granted,
  Denied,
  /// Not decided yet; requesting grants it
  #[default]
  Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
  /// Client public key, uncompressed P-256 point, base64url
  pub p256dh: String,
  /// 16-byte authentication secret, base64url
  pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
  pub endpoint: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expiration_time: Option<i64>,
  pub keys: SubscriptionKeys,
}

#[derive(Debug, Error)]
pub enum PushError {
  #[error("notification permission not granted")]
  PermissionDenied,

  #[error("invalid application server key: {0}")]
  InvalidKey(String),

  #[error("remote subscription registration failed: {0}")]
  SubscriptionRegistrationFailure(String),

  #[error(transparent)]
  Device(#[from] DeviceStateError),
}

/// Local side of a subscription: permission and key material.
pub trait PushManager: Send + Sync {
  fn permission(&self) -> Result<Permission, PushError>;

  /// Ask for permission; a decided permission is returned unchanged.
  fn request_permission(&self) -> Result<Permission, PushError>;

  fn get_subscription(&self) -> Result<Option<PushSubscription>, PushError>;

  /// Return the current subscription, creating one if there is none.
  fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscription, PushError>;

  /// Returns false when there was nothing to remove.
  fn unsubscribe(&self) -> Result<bool, PushError>;
}

/// Remote side of a subscription.
pub trait PushRegistrar: Send + Sync {
  fn register<'a>(&'a self, subscription: &'a PushSubscription) -> BoxFuture<'a, color_eyre::Result<()>>;

  fn unregister<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, color_eyre::Result<()>>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn subscription_wire_format() {
    let subscription = PushSubscription {
      endpoint: "https://push.example.test/abc".to_string(),
      expiration_time: None,
      keys: SubscriptionKeys {
        p256dh: "BKey".to_string(),
        auth: "secret".to_string(),
      },
    };
    let json = serde_json::to_value(&subscription).unwrap();
    assert_eq!(
      json,
      serde_json::json!({
        "endpoint": "https://push.example.test/abc",
        "keys": {"p256dh": "BKey", "auth": "secret"}
      })
    );

    let parsed: PushSubscription = serde_json::from_str(
      r#"{"endpoint":"e","expirationTime":1700,"keys":{"p256dh":"p","auth":"a"}}"#,
    )
    .unwrap();
    assert_eq!(parsed.expiration_time, Some(1700));
  }

  #[test]
  fn permission_names() {
    assert_eq!(serde_json::to_string(&Permission::Granted).unwrap(), r#""granted""#);
    assert_eq!(
      serde_json::from_str::<Permission>(r#""prompt""#).unwrap(),
      Permission::Prompt
    );
  }
}
