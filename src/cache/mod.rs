//! Named response caches backing the background agent.
//!
//! This module provides the storage and strategy half of the agent:
//! - Caches HTTP responses in named caches (one per route or precache generation)
//! - Expires entries by age and by entry count (oldest evicted first)
//! - Implements cache-first, network-first (bounded wait) and
//!   network-with-fallback strategies
//! - Serves stale entries when the network is unavailable (offline mode)

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, ExpirationPolicy, StrategyError};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{request_key, CacheResult, CacheSource, HttpResponse, NetworkError};
