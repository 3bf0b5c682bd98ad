//! Fakes shared by the agent tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use super::{Agent, ClientRegistry, FetchRequest, Fetcher, NotificationCenter};
use crate::cache::{CacheLayer, HttpResponse, NetworkError, SqliteStorage};
use crate::clock::ManualClock;
use crate::config::AgentConfig;

#[derive(Default)]
pub struct FakeFetcher {
  responses: Mutex<HashMap<String, (u16, String)>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn serve(&self, url: &str, status: u16, body: &str) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, body.to_string()));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn response(&self, url: &str) -> HttpResponse {
    let (status, body) = self
      .responses
      .lock()
      .unwrap()
      .get(url)
      .cloned()
      .unwrap_or((404, "not found".to_string()));
    HttpResponse {
      url: url.to_string(),
      status,
      headers: Vec::new(),
      body: body.into_bytes(),
    }
  }
}

impl Fetcher for FakeFetcher {
  fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<HttpResponse, NetworkError>> {
    Box::pin(async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(NetworkError("offline".to_string()));
      }
      Ok(self.response(request.url.as_str()))
    })
  }
}

pub struct Harness {
  pub agent: Agent<SqliteStorage>,
  pub config: AgentConfig,
  pub fetcher: Arc<FakeFetcher>,
  pub notifier: Arc<NotificationCenter>,
  pub clients: Arc<ClientRegistry>,
  pub clock: Arc<ManualClock>,
}

/// Agent with default config whose fake network serves every manifest
/// asset as `asset <path>`.
pub fn harness() -> Harness {
  let config = AgentConfig::default();
  let fetcher = Arc::new(FakeFetcher::default());
  for path in &config.manifest {
    fetcher.serve(
      &format!("{}{}", config.app_origin, path),
      200,
      &format!("asset {}", path),
    );
  }

  let clock = ManualClock::at(0);
  let notifier = Arc::new(NotificationCenter::new());
  let clients = Arc::new(ClientRegistry::new());
  let layer = CacheLayer::new(SqliteStorage::open_in_memory().unwrap(), clock.clone());

  let agent = Agent::new(
    &config,
    "https://story-api.dicoding.dev/v1",
    layer,
    fetcher.clone(),
    notifier.clone(),
    clients.clone(),
  )
  .unwrap();

  Harness {
    agent,
    config,
    fetcher,
    notifier,
    clients,
    clock,
  }
}
