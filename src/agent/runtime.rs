//! Message-driven agent task.
//!
//! Events reach the agent as messages on a channel, mirroring how a host
//! dispatches lifecycle, fetch and push events. Lifecycle messages are
//! handled in order; fetches are answered concurrently.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{Agent, AgentError, ClickOutcome, FetchRequest, Lifecycle, Notification};
use crate::cache::{CacheStorage, HttpResponse};

/// Events delivered to the agent task
enum AgentMessage {
  Restore(oneshot::Sender<Result<bool, AgentError>>),
  Install(oneshot::Sender<Result<(), AgentError>>),
  Activate(oneshot::Sender<Result<usize, AgentError>>),
  State(oneshot::Sender<Lifecycle>),
  Fetch(FetchRequest, oneshot::Sender<Result<HttpResponse, AgentError>>),
  Push(Vec<u8>, oneshot::Sender<Notification>),
  Click(Notification, oneshot::Sender<ClickOutcome>),
}

/// Cloneable handle to a running agent task.
#[derive(Clone)]
pub struct AgentHandle {
  tx: mpsc::UnboundedSender<AgentMessage>,
}

impl AgentHandle {
  /// Run `agent` on its own task. The task stops once every handle is dropped.
  pub fn spawn<S: CacheStorage + 'static>(agent: Agent<S>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let agent = Arc::new(agent);

    tokio::spawn(async move {
      while let Some(message) = rx.recv().await {
        match message {
          AgentMessage::Restore(reply) => {
            let _ = reply.send(agent.restore());
          }
          AgentMessage::Install(reply) => {
            let _ = reply.send(agent.install().await);
          }
          AgentMessage::Activate(reply) => {
            let _ = reply.send(agent.activate());
          }
          AgentMessage::State(reply) => {
            let _ = reply.send(agent.state());
          }
          AgentMessage::Fetch(request, reply) => {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move {
              let _ = reply.send(agent.handle_fetch(&request).await);
            });
          }
          AgentMessage::Push(payload, reply) => {
            let _ = reply.send(agent.handle_push(&payload));
          }
          AgentMessage::Click(notification, reply) => {
            let _ = reply.send(agent.handle_notification_click(&notification));
          }
        }
      }
      debug!("agent task stopped");
    });

    Self { tx }
  }

  async fn call<T>(
    &self,
    message: impl FnOnce(oneshot::Sender<T>) -> AgentMessage,
  ) -> Result<T, AgentError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(message(reply))
      .map_err(|_| AgentError::Stopped)?;
    rx.await.map_err(|_| AgentError::Stopped)
  }

  /// Bring the agent to `Active`, installing a new generation only when the
  /// current one is not already stored.
  pub async fn start(&self) -> Result<Lifecycle, AgentError> {
    if !self.call(AgentMessage::Restore).await?? {
      self.install().await?;
      self.activate().await?;
    }
    self.state().await
  }

  pub async fn install(&self) -> Result<(), AgentError> {
    self.call(AgentMessage::Install).await?
  }

  pub async fn activate(&self) -> Result<usize, AgentError> {
    self.call(AgentMessage::Activate).await?
  }

  pub async fn state(&self) -> Result<Lifecycle, AgentError> {
    self.call(AgentMessage::State).await
  }

  pub async fn fetch(&self, request: FetchRequest) -> Result<HttpResponse, AgentError> {
    self
      .call(|reply| AgentMessage::Fetch(request, reply))
      .await?
  }

  pub async fn push(&self, payload: Vec<u8>) -> Result<Notification, AgentError> {
    self.call(|reply| AgentMessage::Push(payload, reply)).await
  }

  pub async fn click(&self, notification: Notification) -> Result<ClickOutcome, AgentError> {
    self
      .call(|reply| AgentMessage::Click(notification, reply))
      .await
  }
}
