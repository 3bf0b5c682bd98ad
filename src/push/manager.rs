use tracing::{info, warn};

use super::{Permission, PushError, PushManager, PushRegistrar, PushSubscription};

/// Keeps the local subscription and its remote registration in step.
pub struct SubscriptionManager<P, R> {
  push: P,
  registrar: R,
  application_server_key: Vec<u8>,
}

impl<P: PushManager, R: PushRegistrar> SubscriptionManager<P, R> {
  pub fn new(push: P, registrar: R, application_server_key: Vec<u8>) -> Self {
    Self {
      push,
      registrar,
      application_server_key,
    }
  }

  /// Subscribe locally and register the subscription remotely.
  ///
  /// When remote registration fails the local subscription is removed
  /// again, so the caller never ends up subscribed without a registration.
  pub async fn subscribe(&self) -> Result<PushSubscription, PushError> {
    if self.push.request_permission()? != Permission::Granted {
      return Err(PushError::PermissionDenied);
    }

    let subscription = self.push.subscribe(&self.application_server_key)?;

    if let Err(e) = self.registrar.register(&subscription).await {
      warn!(error = %e, "remote registration failed, rolling back local subscription");
      if let Err(rollback) = self.push.unsubscribe() {
        warn!(error = %rollback, "failed to roll back local subscription");
      }
      return Err(PushError::SubscriptionRegistrationFailure(e.to_string()));
    }

    info!(endpoint = %subscription.endpoint, "push subscription registered");
    Ok(subscription)
  }

  /// Unregister remotely, then drop the local subscription.
  ///
  /// A failed remote call is logged and does not block the local removal.
  /// Returns false when there was no subscription.
  pub async fn unsubscribe(&self) -> Result<bool, PushError> {
    let Some(subscription) = self.push.get_subscription()? else {
      return Ok(false);
    };

    if let Err(e) = self.registrar.unregister(&subscription.endpoint).await {
      warn!(error = %e, endpoint = %subscription.endpoint, "remote unsubscribe failed");
    }

    let removed = self.push.unsubscribe()?;
    info!(endpoint = %subscription.endpoint, "push subscription removed");
    Ok(removed)
  }

  pub fn is_subscribed(&self) -> Result<bool, PushError> {
    Ok(self.push.get_subscription()?.is_some())
  }

  pub fn permission(&self) -> Result<Permission, PushError> {
    self.push.permission()
  }

  pub fn subscription(&self) -> Result<Option<PushSubscription>, PushError> {
    self.push.get_subscription()
  }
}
