//! Push manager that keeps its subscription in the device state file.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::SecretKey;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Permission, PushError, PushManager, PushSubscription, SubscriptionKeys};
use crate::device::DeviceStateFile;

pub struct LocalPushManager {
  device: Arc<DeviceStateFile>,
  endpoint: String,
  configured: Permission,
}

impl LocalPushManager {
  /// `endpoint` is the push service base URL new subscriptions are issued
  /// under. `configured` is the permission until one is recorded.
  pub fn new(device: Arc<DeviceStateFile>, endpoint: &str, configured: Permission) -> Self {
    Self {
      device,
      endpoint: endpoint.trim_end_matches('/').to_string(),
      configured,
    }
  }

  fn create_subscription(&self) -> (PushSubscription, String) {
    let secret = SecretKey::random(&mut OsRng);
    let public = secret.public_key().to_encoded_point(false);

    let mut auth = [0u8; 16];
    OsRng.fill_bytes(&mut auth);
    let mut token = [0u8; 16];
    OsRng.fill_bytes(&mut token);

    let subscription = PushSubscription {
      endpoint: format!("{}/{}", self.endpoint, hex::encode(token)),
      expiration_time: None,
      keys: SubscriptionKeys {
        p256dh: URL_SAFE_NO_PAD.encode(public.as_bytes()),
        auth: URL_SAFE_NO_PAD.encode(auth),
      },
    };
    debug!(endpoint = %subscription.endpoint, "created push subscription");
    (subscription, URL_SAFE_NO_PAD.encode(secret.to_bytes()))
  }
}

impl PushManager for LocalPushManager {
  fn permission(&self) -> Result<Permission, PushError> {
    Ok(self.device.load()?.push_permission.unwrap_or(self.configured))
  }

  fn request_permission(&self) -> Result<Permission, PushError> {
    let configured = self.configured;
    let permission = self.device.update(|state| {
      let current = state.push_permission.unwrap_or(configured);
      if current != Permission::Prompt {
        return current;
      }
      state.push_permission = Some(Permission::Granted);
      Permission::Granted
    })?;
    if permission == Permission::Granted {
      info!("notification permission granted");
    }
    Ok(permission)
  }

  fn get_subscription(&self) -> Result<Option<PushSubscription>, PushError> {
    Ok(self.device.load()?.push_subscription)
  }

  fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscription, PushError> {
    if self.permission()? != Permission::Granted {
      return Err(PushError::PermissionDenied);
    }
    if application_server_key.len() != 65 || application_server_key[0] != 0x04 {
      return Err(PushError::InvalidKey(format!(
        "{} bytes is not an uncompressed P-256 point",
        application_server_key.len()
      )));
    }

    Ok(self.device.update(|state| {
      if let Some(existing) = &state.push_subscription {
        debug!(endpoint = %existing.endpoint, "reusing existing subscription");
        return existing.clone();
      }
      let (subscription, private_key) = self.create_subscription();
      state.push_subscription = Some(subscription.clone());
      state.push_private_key = Some(private_key);
      subscription
    })?)
  }

  fn unsubscribe(&self) -> Result<bool, PushError> {
    Ok(self.device.update(|state| {
      state.push_private_key = None;
      state.push_subscription.take().is_some()
    })?)
  }
}
