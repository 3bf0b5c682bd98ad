//! Cache layer that orchestrates caching strategies with network fetching.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::storage::{CacheStorage, CachedEntry};
use super::traits::{CacheResult, HttpResponse, NetworkError};
use crate::clock::SharedClock;

/// Limits applied to a named cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
  /// Keep at most this many entries; the oldest are evicted first.
  pub max_entries: Option<usize>,
  /// Entries older than this are treated as misses and removed.
  pub max_age: Option<Duration>,
}

impl ExpirationPolicy {
  pub fn new(max_entries: usize, max_age: Duration) -> Self {
    Self {
      max_entries: Some(max_entries),
      max_age: Some(max_age),
    }
  }
}

/// Failure of a caching strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
  /// The network failed and no usable cached copy exists.
  #[error("network failure: {0}")]
  Network(#[from] NetworkError),

  #[error("cache storage error: {0}")]
  Storage(String),
}

impl From<color_eyre::Report> for StrategyError {
  fn from(report: color_eyre::Report) -> Self {
    StrategyError::Storage(report.to_string())
  }
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the agent's request routing and the network,
/// providing transparent caching with offline support.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  clock: SharedClock,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, clock: SharedClock) -> Self {
    Self {
      storage: Arc::new(storage),
      clock,
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn now(&self) -> i64 {
    self.clock.now_millis()
  }

  /// Look up an entry, enforcing the policy's max age.
  pub fn lookup(
    &self,
    cache: &str,
    key: &str,
    policy: &ExpirationPolicy,
  ) -> Result<Option<CachedEntry>, StrategyError> {
    let Some(entry) = self.storage.get(cache, key)? else {
      return Ok(None);
    };

    if let Some(max_age) = policy.max_age {
      let age = self.now().saturating_sub(entry.cached_at);
      if age > millis(max_age) {
        debug!(cache, age, "cache entry past max age");
        self.storage.delete(cache, key)?;
        return Ok(None);
      }
    }

    Ok(Some(entry))
  }

  /// Write a response and enforce the policy's entry limit.
  pub fn store(
    &self,
    cache: &str,
    key: &str,
    response: &HttpResponse,
    policy: &ExpirationPolicy,
  ) -> Result<(), StrategyError> {
    if !response.is_cacheable() {
      return Ok(());
    }

    let now = self.now();
    self.storage.put(cache, key, response, now)?;

    if let Some(max_age) = policy.max_age {
      self
        .storage
        .purge_older_than(cache, now.saturating_sub(millis(max_age)))?;
    }
    if let Some(max_entries) = policy.max_entries {
      self.storage.trim(cache, max_entries)?;
    }
    Ok(())
  }

  /// Write a freshly fetched response. A failed write is logged and the
  /// response is still served.
  fn store_fresh(
    &self,
    cache: &str,
    key: &str,
    response: &HttpResponse,
    policy: &ExpirationPolicy,
  ) {
    if let Err(e) = self.store(cache, key, response, policy) {
      warn!(cache, error = %e, "failed to cache fresh response");
    }
  }

  /// Cache-first strategy.
  ///
  /// 1. Serve a cached entry if present and within max age
  /// 2. Otherwise fetch from network and cache the response
  pub async fn cache_first<F, Fut>(
    &self,
    cache: &str,
    key: &str,
    policy: &ExpirationPolicy,
    fetcher: F,
  ) -> Result<CacheResult<HttpResponse>, StrategyError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<HttpResponse, NetworkError>>,
  {
    if let Some(entry) = self.lookup(cache, key, policy)? {
      return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
    }

    let response = fetcher().await?;
    self.store_fresh(cache, key, &response, policy);
    Ok(CacheResult::from_network(response))
  }

  /// Network-first strategy with a bounded wait.
  ///
  /// 1. Fetch from network, giving up after `timeout`
  /// 2. On success, replace the cached copy and serve the fresh response
  /// 3. On failure or timeout, serve the cached copy if still within max age
  /// 4. With no usable cached copy, propagate the network failure
  pub async fn network_first<F, Fut>(
    &self,
    cache: &str,
    key: &str,
    policy: &ExpirationPolicy,
    timeout: Duration,
    fetcher: F,
  ) -> Result<CacheResult<HttpResponse>, StrategyError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<HttpResponse, NetworkError>>,
  {
    let error = match tokio::time::timeout(timeout, fetcher()).await {
      Ok(Ok(response)) => {
        self.store_fresh(cache, key, &response, policy);
        return Ok(CacheResult::from_network(response));
      }
      Ok(Err(e)) => e,
      Err(_) => NetworkError(format!("no response within {:?}", timeout)),
    };

    match self.lookup(cache, key, policy)? {
      Some(entry) => {
        warn!(cache, error = %error, "network failed, serving cached response");
        Ok(CacheResult::offline(entry.response, entry.cached_at))
      }
      None => Err(StrategyError::Network(error)),
    }
  }

  /// Network with cache fallback.
  ///
  /// Successful responses are cached opportunistically so an identical
  /// request can be replayed while offline.
  pub async fn network_with_fallback<F, Fut>(
    &self,
    cache: &str,
    key: &str,
    policy: &ExpirationPolicy,
    fetcher: F,
  ) -> Result<CacheResult<HttpResponse>, StrategyError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<HttpResponse, NetworkError>>,
  {
    match fetcher().await {
      Ok(response) => {
        self.store_fresh(cache, key, &response, policy);
        Ok(CacheResult::from_network(response))
      }
      Err(error) => match self.lookup(cache, key, policy)? {
        Some(entry) => Ok(CacheResult::offline(entry.response, entry.cached_at)),
        None => Err(StrategyError::Network(error)),
      },
    }
  }
}

fn millis(duration: Duration) -> i64 {
  i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::clock::ManualClock;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn response(body: &str) -> HttpResponse {
    HttpResponse {
      url: "https://story-api.dicoding.dev/v1/stories".to_string(),
      status: 200,
      headers: Vec::new(),
      body: body.as_bytes().to_vec(),
    }
  }

  fn layer(clock: Arc<ManualClock>) -> CacheLayer<SqliteStorage> {
    CacheLayer::new(SqliteStorage::open_in_memory().unwrap(), clock)
  }

  fn api_policy() -> ExpirationPolicy {
    ExpirationPolicy::new(2, Duration::from_secs(300))
  }

  #[tokio::test]
  async fn cache_first_fetches_once() {
    let layer = layer(ManualClock::at(0));
    let calls = AtomicUsize::new(0);
    let policy = ExpirationPolicy::default();

    for _ in 0..3 {
      layer
        .cache_first("tiles", "k", &policy, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(response("tile"))
        })
        .await
        .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn cache_first_refetches_after_max_age() {
    let clock = ManualClock::at(0);
    let layer = layer(clock.clone());
    let policy = ExpirationPolicy::new(10, Duration::from_secs(60));

    layer
      .cache_first("tiles", "k", &policy, || async { Ok(response("v1")) })
      .await
      .unwrap();
    clock.set(61_000);
    let result = layer
      .cache_first("tiles", "k", &policy, || async { Ok(response("v2")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"v2");
  }

  #[tokio::test]
  async fn network_first_replaces_cached_copy() {
    let layer = layer(ManualClock::at(0));
    let policy = api_policy();
    let timeout = Duration::from_secs(10);

    layer
      .network_first("api", "k", &policy, timeout, || async { Ok(response("old")) })
      .await
      .unwrap();
    let fresh = layer
      .network_first("api", "k", &policy, timeout, || async { Ok(response("new")) })
      .await
      .unwrap();
    assert_eq!(fresh.source, CacheSource::Network);

    let fallback = layer
      .network_first("api", "k", &policy, timeout, || async {
        Err(NetworkError("offline".to_string()))
      })
      .await
      .unwrap();
    assert_eq!(fallback.source, CacheSource::Offline);
    assert_eq!(fallback.data.body, b"new");
  }

  #[tokio::test]
  async fn network_first_ignores_copies_past_retention() {
    let clock = ManualClock::at(0);
    let layer = layer(clock.clone());
    let policy = api_policy();
    let timeout = Duration::from_secs(10);

    layer
      .network_first("api", "k", &policy, timeout, || async { Ok(response("old")) })
      .await
      .unwrap();
    clock.set(5 * 60 * 1000 + 1);

    let err = layer
      .network_first("api", "k", &policy, timeout, || async {
        Err(NetworkError("offline".to_string()))
      })
      .await
      .unwrap_err();
    assert!(matches!(err, StrategyError::Network(_)));
  }

  #[tokio::test(start_paused = true)]
  async fn network_first_times_out_to_cache() {
    let layer = layer(ManualClock::at(0));
    let policy = api_policy();
    let timeout = Duration::from_secs(3);

    layer
      .network_first("api", "k", &policy, timeout, || async { Ok(response("cached")) })
      .await
      .unwrap();

    let result = layer
      .network_first("api", "k", &policy, timeout, || async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(response("late"))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.body, b"cached");
  }

  #[tokio::test]
  async fn entry_limit_evicts_oldest() {
    let clock = ManualClock::at(0);
    let layer = layer(clock.clone());
    let policy = api_policy();

    for (i, key) in ["a", "b", "c"].iter().enumerate() {
      clock.set(i as i64 * 10);
      layer
        .network_with_fallback("api", key, &policy, || async { Ok(response(key)) })
        .await
        .unwrap();
    }

    assert!(layer.storage().get("api", "a").unwrap().is_none());
    assert!(layer.storage().get("api", "b").unwrap().is_some());
    assert!(layer.storage().get("api", "c").unwrap().is_some());
  }

  #[tokio::test]
  async fn error_responses_are_not_cached() {
    let layer = layer(ManualClock::at(0));
    let policy = ExpirationPolicy::default();

    let mut failed = response("boom");
    failed.status = 500;
    layer
      .network_with_fallback("runtime", "k", &policy, move || async move { Ok(failed) })
      .await
      .unwrap();

    let err = layer
      .network_with_fallback("runtime", "k", &policy, || async {
        Err(NetworkError("offline".to_string()))
      })
      .await
      .unwrap_err();
    assert!(matches!(err, StrategyError::Network(_)));
  }

  struct ReadOnlyStorage;

  impl CacheStorage for ReadOnlyStorage {
    fn get(&self, _cache: &str, _key: &str) -> color_eyre::Result<Option<CachedEntry>> {
      Ok(None)
    }

    fn put(&self, _: &str, _: &str, _: &HttpResponse, _: i64) -> color_eyre::Result<()> {
      Err(color_eyre::eyre::eyre!("disk full"))
    }

    fn put_all(&self, _: &str, _: &[(String, HttpResponse)], _: i64) -> color_eyre::Result<()> {
      Err(color_eyre::eyre::eyre!("disk full"))
    }

    fn delete(&self, _cache: &str, _key: &str) -> color_eyre::Result<()> {
      Ok(())
    }

    fn cache_names(&self) -> color_eyre::Result<Vec<String>> {
      Ok(Vec::new())
    }

    fn delete_cache(&self, _cache: &str) -> color_eyre::Result<usize> {
      Ok(0)
    }

    fn trim(&self, _cache: &str, _max_entries: usize) -> color_eyre::Result<usize> {
      Ok(0)
    }

    fn purge_older_than(&self, _cache: &str, _cutoff: i64) -> color_eyre::Result<usize> {
      Ok(0)
    }
  }

  #[tokio::test]
  async fn failed_cache_write_still_serves_network_response() {
    let layer = CacheLayer::new(ReadOnlyStorage, ManualClock::at(0));
    let policy = api_policy();

    let result = layer
      .network_first("api", "k", &policy, Duration::from_secs(10), || async {
        Ok(response("fresh"))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"fresh");

    let result = layer
      .cache_first("tiles", "k", &policy, || async { Ok(response("tile")) })
      .await
      .unwrap();
    assert_eq!(result.data.body, b"tile");
  }

  #[tokio::test]
  async fn huge_max_age_never_expires() {
    let clock = ManualClock::at(1_000);
    let layer = layer(clock.clone());
    let policy = ExpirationPolicy::new(10, Duration::from_secs(u64::MAX));

    layer
      .cache_first("tiles", "k", &policy, || async { Ok(response("v1")) })
      .await
      .unwrap();
    clock.set(1_000_000_000);
    let result = layer
      .cache_first("tiles", "k", &policy, || async { Ok(response("v2")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"v1");
  }
}
