//! Background cache and notification agent.
//!
//! The agent precaches the static asset manifest on install, drops older
//! asset generations on activate, then intercepts requests and applies a
//! caching policy per route. It also turns push payloads into
//! notifications and routes notification clicks to application windows.

mod clients;
mod fetch;
mod notify;
mod routes;
mod runtime;
#[cfg(test)]
mod testing;

pub use clients::ClientRegistry;
pub use fetch::{FetchRequest, Fetcher, HttpFetcher};
pub use notify::{Notification, NotificationCenter, Notifier};
pub use routes::{Route, Router};
pub use runtime::AgentHandle;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{
  request_key, CacheLayer, CacheResult, CacheSource, CacheStorage, ExpirationPolicy, HttpResponse,
  StrategyError,
};
use crate::config::{AgentConfig, RuntimeCacheConfig};

pub const PRECACHE_PREFIX: &str = "precache-";
pub const API_CACHE: &str = "story-api-cache";
pub const TILE_CACHE: &str = "map-tiles-cache";
pub const CDN_CACHE: &str = "cdn-cache";
pub const RUNTIME_CACHE: &str = "runtime-cache";

const RUNTIME_CACHE_MAX_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Created, not yet installed
  Parsed,
  Installing,
  Installed,
  Activating,
  /// Intercepting requests
  Active,
  /// Install failed; this agent never activates
  Redundant,
}

#[derive(Debug, Error)]
pub enum AgentError {
  #[error("invalid agent configuration: {0}")]
  Config(String),

  #[error("cannot move agent from {state:?}: expected {expected:?}")]
  InvalidTransition {
    state: Lifecycle,
    expected: Lifecycle,
  },

  #[error("precaching {url} failed: {reason}")]
  InstallFailed { url: String, reason: String },

  #[error("network failure: {0}")]
  NetworkFailure(String),

  #[error("cache error: {0}")]
  Cache(String),

  #[error("agent stopped")]
  Stopped,
}

impl From<StrategyError> for AgentError {
  fn from(err: StrategyError) -> Self {
    match err {
      StrategyError::Network(e) => AgentError::NetworkFailure(e.0),
      StrategyError::Storage(e) => AgentError::Cache(e),
    }
  }
}

impl From<color_eyre::Report> for AgentError {
  fn from(report: color_eyre::Report) -> Self {
    AgentError::Cache(report.to_string())
  }
}

/// Result of a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An open window already showed the target page
  Focused(u64),
  /// A new window was opened
  Opened(u64),
}

fn policy(config: &RuntimeCacheConfig) -> ExpirationPolicy {
  ExpirationPolicy::new(config.max_entries, Duration::from_secs(config.max_age_secs))
}

pub struct Agent<S: CacheStorage> {
  router: Router,
  cache_version: String,
  network_timeout: Duration,
  api_policy: ExpirationPolicy,
  tile_policy: ExpirationPolicy,
  cdn_policy: ExpirationPolicy,
  layer: CacheLayer<S>,
  fetcher: Arc<dyn Fetcher>,
  notifier: Arc<dyn Notifier>,
  clients: Arc<ClientRegistry>,
  state: Mutex<Lifecycle>,
}

impl<S: CacheStorage> Agent<S> {
  pub fn new(
    config: &AgentConfig,
    api_base: &str,
    layer: CacheLayer<S>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    clients: Arc<ClientRegistry>,
  ) -> Result<Self, AgentError> {
    let router = Router::new(config, api_base).map_err(|e| AgentError::Config(e.to_string()))?;

    Ok(Self {
      router,
      cache_version: config.cache_version.clone(),
      network_timeout: Duration::from_secs(config.network_timeout_secs),
      api_policy: policy(&config.api),
      tile_policy: policy(&config.tiles),
      cdn_policy: policy(&config.cdn),
      layer,
      fetcher,
      notifier,
      clients,
      state: Mutex::new(Lifecycle::Parsed),
    })
  }

  fn lock_state(&self) -> MutexGuard<'_, Lifecycle> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn state(&self) -> Lifecycle {
    *self.lock_state()
  }

  fn set_state(&self, next: Lifecycle) {
    *self.lock_state() = next;
  }

  fn transition(&self, expected: Lifecycle, next: Lifecycle) -> Result<(), AgentError> {
    let mut state = self.lock_state();
    if *state != expected {
      return Err(AgentError::InvalidTransition {
        state: *state,
        expected,
      });
    }
    *state = next;
    Ok(())
  }

  /// Name of the precache holding the current asset generation.
  pub fn precache_name(&self) -> String {
    format!("{}{}", PRECACHE_PREFIX, self.cache_version)
  }

  /// Resume a generation installed by an earlier run.
  ///
  /// Returns true when the agent ends up active: either it already was, or
  /// the current precache is populated and it activates immediately. Older
  /// generations are deleted on the way, as in [`Agent::activate`].
  pub fn restore(&self) -> Result<bool, AgentError> {
    match self.state() {
      Lifecycle::Active => return Ok(true),
      Lifecycle::Parsed => {}
      _ => return Ok(false),
    }
    let current = self.precache_name();
    if !self.layer.storage().cache_names()?.contains(&current) {
      return Ok(false);
    }
    self.transition(Lifecycle::Parsed, Lifecycle::Activating)?;
    match self.drop_old_generations() {
      Ok(removed) => {
        self.clients.claim();
        self.set_state(Lifecycle::Active);
        debug!(cache = %current, removed, "restored installed generation");
        Ok(true)
      }
      Err(e) => {
        self.set_state(Lifecycle::Parsed);
        Err(e)
      }
    }
  }

  /// Fetch and store every manifest asset.
  ///
  /// All assets are fetched concurrently and stored in one batch, so a
  /// failure leaves no partial generation behind and the agent redundant.
  pub async fn install(&self) -> Result<(), AgentError> {
    self.transition(Lifecycle::Parsed, Lifecycle::Installing)?;

    match self.precache().await {
      Ok(count) => {
        self.set_state(Lifecycle::Installed);
        info!(cache = %self.precache_name(), assets = count, "agent installed");
        Ok(())
      }
      Err(e) => {
        self.set_state(Lifecycle::Redundant);
        warn!(error = %e, "agent install failed");
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<usize, AgentError> {
    let requests: Vec<FetchRequest> = self
      .router
      .manifest()
      .iter()
      .cloned()
      .map(FetchRequest::get)
      .collect();

    let responses =
      futures::future::join_all(requests.iter().map(|request| self.fetcher.fetch(request))).await;

    let mut entries = Vec::with_capacity(requests.len());
    for (request, result) in requests.iter().zip(responses) {
      let response = result.map_err(|e| AgentError::InstallFailed {
        url: request.url.to_string(),
        reason: e.to_string(),
      })?;
      if !response.is_cacheable() {
        return Err(AgentError::InstallFailed {
          url: request.url.to_string(),
          reason: format!("status {}", response.status),
        });
      }
      entries.push((request_key("GET", request.url.as_str()), response));
    }

    self
      .layer
      .storage()
      .put_all(&self.precache_name(), &entries, self.layer.now())?;
    Ok(entries.len())
  }

  /// Delete older asset generations and take control of open windows.
  /// Returns the number of generations removed.
  pub fn activate(&self) -> Result<usize, AgentError> {
    self.transition(Lifecycle::Installed, Lifecycle::Activating)?;

    match self.drop_old_generations() {
      Ok(removed) => {
        let claimed = self.clients.claim();
        self.set_state(Lifecycle::Active);
        info!(removed, claimed, "agent activated");
        Ok(removed)
      }
      Err(e) => {
        self.set_state(Lifecycle::Installed);
        Err(e)
      }
    }
  }

  fn drop_old_generations(&self) -> Result<usize, AgentError> {
    let current = self.precache_name();
    let mut removed = 0;
    for name in self.layer.storage().cache_names()? {
      if name.starts_with(PRECACHE_PREFIX) && name != current {
        self.layer.storage().delete_cache(&name)?;
        info!(cache = %name, "deleted outdated cache generation");
        removed += 1;
      }
    }
    Ok(removed)
  }

  /// Answer an intercepted request.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<HttpResponse, AgentError> {
    if self.state() != Lifecycle::Active {
      return self.fetch_network(request).await;
    }

    let route = self.router.classify(request);
    debug!(method = %request.method, url = %request.url, ?route, "routing request");

    let key = request_key(&request.method, request.url.as_str());
    let fetch = || self.fetcher.fetch(request);

    let result = match route {
      Route::Precache { asset } => {
        let asset_key = request_key("GET", asset.as_str());
        match self
          .layer
          .lookup(&self.precache_name(), &asset_key, &ExpirationPolicy::default())?
        {
          Some(entry) => CacheResult::from_cache(entry.response, entry.cached_at),
          None => CacheResult::from_network(self.fetch_network(request).await?),
        }
      }
      Route::StoryApi => {
        self
          .layer
          .network_first(API_CACHE, &key, &self.api_policy, self.network_timeout, fetch)
          .await?
      }
      Route::MapTiles => {
        self
          .layer
          .cache_first(TILE_CACHE, &key, &self.tile_policy, fetch)
          .await?
      }
      Route::Cdn => {
        self
          .layer
          .cache_first(CDN_CACHE, &key, &self.cdn_policy, fetch)
          .await?
      }
      Route::Passthrough if request.is_get() => {
        let runtime = ExpirationPolicy {
          max_entries: Some(RUNTIME_CACHE_MAX_ENTRIES),
          max_age: None,
        };
        self
          .layer
          .network_with_fallback(RUNTIME_CACHE, &key, &runtime, fetch)
          .await?
      }
      Route::Passthrough => return self.fetch_network(request).await,
    };

    if result.source == CacheSource::Cache {
      debug!(url = %request.url, cached_at = ?result.cached_at, "served from cache");
    }
    Ok(result.data)
  }

  async fn fetch_network(&self, request: &FetchRequest) -> Result<HttpResponse, AgentError> {
    self
      .fetcher
      .fetch(request)
      .await
      .map_err(|e| AgentError::NetworkFailure(e.0))
  }

  /// Show a notification for a push payload.
  pub fn handle_push(&self, payload: &[u8]) -> Notification {
    let notification = Notification::from_push(payload);
    self.notifier.show(&notification);
    notification
  }

  /// Close the notification and bring its target page to the front.
  pub fn handle_notification_click(&self, notification: &Notification) -> ClickOutcome {
    self.notifier.close(&notification.tag);

    let origin = self.router.app_origin();
    let target: Url = origin
      .join(&notification.data.url)
      .unwrap_or_else(|_| origin.clone());

    let existing = self
      .clients
      .match_all()
      .into_iter()
      .find(|window| window.url == target);

    match existing {
      Some(window) if self.clients.focus(window.id) => {
        debug!(id = window.id, url = %target, "focused existing window");
        ClickOutcome::Focused(window.id)
      }
      _ => {
        let window = self.clients.open_window(target);
        debug!(id = window.id, url = %window.url, "opened window");
        ClickOutcome::Opened(window.id)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::{harness, Harness};
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  async fn active() -> Harness {
    let h = harness();
    h.agent.install().await.unwrap();
    h.agent.activate().unwrap();
    h
  }

  #[tokio::test]
  async fn install_precaches_manifest() {
    let h = harness();
    h.agent.install().await.unwrap();

    assert_eq!(h.agent.state(), Lifecycle::Installed);
    let storage = h.agent.layer.storage();
    for asset in h.agent.router.manifest() {
      let key = request_key("GET", asset.as_str());
      assert!(storage.get("precache-v1", &key).unwrap().is_some(), "{}", asset);
    }
  }

  #[tokio::test]
  async fn install_failure_leaves_agent_redundant() {
    let h = harness();
    h.fetcher.serve("http://localhost:8080/app.css", 404, "missing");

    let err = h.agent.install().await.unwrap_err();
    assert!(matches!(err, AgentError::InstallFailed { ref url, .. } if url.ends_with("/app.css")));
    assert_eq!(h.agent.state(), Lifecycle::Redundant);
    assert!(h.agent.layer.storage().cache_names().unwrap().is_empty());
    assert!(matches!(
      h.agent.activate(),
      Err(AgentError::InvalidTransition { state: Lifecycle::Redundant, .. })
    ));
  }

  #[tokio::test]
  async fn install_fails_offline() {
    let h = harness();
    h.fetcher.set_offline(true);
    assert!(h.agent.install().await.is_err());
    assert_eq!(h.agent.state(), Lifecycle::Redundant);
  }

  #[tokio::test]
  async fn activate_drops_only_old_generations() {
    let h = harness();
    let storage = h.agent.layer.storage();
    let stale = h.fetcher.response("http://localhost:8080/app.css");
    storage.put("precache-v0", "k", &stale, 0).unwrap();
    storage.put(API_CACHE, "k", &stale, 0).unwrap();
    h.clients.register(url("http://localhost:8080/"));

    h.agent.install().await.unwrap();
    assert_eq!(h.agent.activate().unwrap(), 1);

    assert_eq!(h.agent.state(), Lifecycle::Active);
    assert_eq!(
      storage.cache_names().unwrap(),
      vec!["precache-v1".to_string(), API_CACHE.to_string()]
    );
    assert!(h.clients.match_all().iter().all(|w| w.controlled));
  }

  #[tokio::test]
  async fn restore_skips_reinstall() {
    let h = active().await;
    let again = Agent::new(
      &h.config,
      "https://story-api.dicoding.dev/v1",
      h.agent.layer.clone(),
      h.fetcher.clone(),
      h.notifier.clone(),
      h.clients.clone(),
    )
    .unwrap();

    assert!(again.restore().unwrap());
    assert_eq!(again.state(), Lifecycle::Active);
  }

  #[tokio::test]
  async fn restore_finishes_interrupted_activation() {
    let h = harness();
    let storage = h.agent.layer.storage();
    let stale = h.fetcher.response("http://localhost:8080/app.css");
    storage.put("precache-v0", "k", &stale, 0).unwrap();
    h.agent.install().await.unwrap();
    h.clients.register(url("http://localhost:8080/"));

    let restarted = Agent::new(
      &h.config,
      "https://story-api.dicoding.dev/v1",
      h.agent.layer.clone(),
      h.fetcher.clone(),
      h.notifier.clone(),
      h.clients.clone(),
    )
    .unwrap();

    assert!(restarted.restore().unwrap());
    assert_eq!(restarted.state(), Lifecycle::Active);
    assert_eq!(storage.cache_names().unwrap(), vec!["precache-v1".to_string()]);
    assert!(h.clients.match_all().iter().all(|w| w.controlled));
  }

  #[tokio::test]
  async fn inactive_agent_passes_through() {
    let h = harness();
    h.fetcher.set_offline(true);
    let request = FetchRequest::get(url("http://localhost:8080/app.css"));
    assert!(matches!(
      h.agent.handle_fetch(&request).await,
      Err(AgentError::NetworkFailure(_))
    ));
  }

  #[tokio::test]
  async fn offline_navigation_serves_shell() {
    let h = active().await;
    h.fetcher.set_offline(true);

    let request = FetchRequest::navigate(url("http://localhost:8080/stories/42"));
    let response = h.agent.handle_fetch(&request).await.unwrap();
    assert_eq!(response.body, b"asset /index.html");
  }

  #[tokio::test]
  async fn api_is_network_first_with_cached_fallback() {
    let h = active().await;
    let api = "https://story-api.dicoding.dev/v1/stories";
    h.fetcher.serve(api, 200, r#"{"listStory":[]}"#);
    let request = FetchRequest::get(url(api));

    h.agent.handle_fetch(&request).await.unwrap();
    h.fetcher.serve(api, 200, r#"{"listStory":[1]}"#);
    let fresh = h.agent.handle_fetch(&request).await.unwrap();
    assert_eq!(fresh.body, br#"{"listStory":[1]}"#);

    h.fetcher.set_offline(true);
    let cached = h.agent.handle_fetch(&request).await.unwrap();
    assert_eq!(cached.body, br#"{"listStory":[1]}"#);

    h.clock.advance(5 * 60 * 1000 + 1);
    assert!(matches!(
      h.agent.handle_fetch(&request).await,
      Err(AgentError::NetworkFailure(_))
    ));
  }

  #[tokio::test]
  async fn tiles_are_cache_first() {
    let h = active().await;
    let tile = "https://a.tile.openstreetmap.org/3/4/2.png";
    h.fetcher.serve(tile, 200, "png");
    let request = FetchRequest::get(url(tile));

    let before = h.fetcher.calls();
    h.agent.handle_fetch(&request).await.unwrap();
    h.agent.handle_fetch(&request).await.unwrap();
    assert_eq!(h.fetcher.calls() - before, 1);
  }

  #[tokio::test]
  async fn non_get_requests_are_not_cached() {
    let h = active().await;
    let api = "https://story-api.dicoding.dev/v1/stories";
    h.fetcher.serve(api, 200, "created");
    let mut request = FetchRequest::get(url(api));
    request.method = "POST".to_string();

    h.agent.handle_fetch(&request).await.unwrap();
    assert!(!h
      .agent
      .layer
      .storage()
      .cache_names()
      .unwrap()
      .contains(&API_CACHE.to_string()));
  }

  #[test]
  fn push_then_click_opens_target() {
    let h = harness();
    let notification =
      h.agent
        .handle_push(br#"{"title":"Alert","body":"New story","url":"/stories/42"}"#);
    assert_eq!(notification.title, "Alert");
    assert_eq!(h.notifier.displayed().len(), 1);

    let outcome = h.agent.handle_notification_click(&notification);
    assert!(matches!(outcome, ClickOutcome::Opened(_)));
    assert!(h.notifier.displayed().is_empty());

    let windows = h.clients.match_all();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].url.as_str(), "http://localhost:8080/stories/42");
    assert!(windows[0].focused);
  }

  #[test]
  fn click_focuses_matching_window() {
    let h = harness();
    let id = h.clients.register(url("http://localhost:8080/"));

    let notification = h.agent.handle_push(b"Hello");
    assert_eq!(notification.title, "Story Map");
    assert_eq!(notification.body, "Hello");

    assert_eq!(h.agent.handle_notification_click(&notification), ClickOutcome::Focused(id));
    assert_eq!(h.clients.match_all().len(), 1);
  }
}
