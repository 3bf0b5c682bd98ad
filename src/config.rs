use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::push::Permission;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub push: PushConfig,
  #[serde(default)]
  pub agent: AgentConfig,
  #[serde(default)]
  pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the remote story API
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://story-api.dicoding.dev/v1".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  /// Application server (VAPID) public key, base64url
  pub vapid_public_key: String,
  /// Push service endpoint base for locally created subscriptions
  pub endpoint: String,
  /// Notification permission reported by the local push manager
  pub permission: Permission,
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      vapid_public_key:
        "BCCs2eonMI-6H2ctvFaWg-UYdDv387Vno_bzUzALpB442r2lCnsHmtrx8biyPi_E-1fSGABK_Qs_GlvPoJJqxbk"
          .to_string(),
      endpoint: "https://fcm.googleapis.com/fcm/send".to_string(),
      permission: Permission::Prompt,
    }
  }
}

/// Limits for one runtime cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCacheConfig {
  pub max_entries: usize,
  pub max_age_secs: u64,
  /// Host suffixes routed to this cache (unused for the API cache)
  pub hosts: Vec<String>,
}

impl RuntimeCacheConfig {
  fn api() -> Self {
    Self {
      max_entries: 50,
      max_age_secs: 5 * 60,
      hosts: Vec::new(),
    }
  }

  fn tiles() -> Self {
    Self {
      max_entries: 100,
      max_age_secs: 30 * 24 * 60 * 60,
      hosts: vec!["tile.openstreetmap.org".to_string()],
    }
  }

  fn cdn() -> Self {
    Self {
      max_entries: 20,
      max_age_secs: 7 * 24 * 60 * 60,
      hosts: vec!["unpkg.com".to_string()],
    }
  }
}

/// Fields given for a runtime cache section; the rest keep that section's
/// built-in values.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RuntimeCacheOverride {
  max_entries: Option<usize>,
  max_age_secs: Option<u64>,
  hosts: Option<Vec<String>>,
}

impl RuntimeCacheOverride {
  fn apply(self, base: RuntimeCacheConfig) -> RuntimeCacheConfig {
    RuntimeCacheConfig {
      max_entries: self.max_entries.unwrap_or(base.max_entries),
      max_age_secs: self.max_age_secs.unwrap_or(base.max_age_secs),
      hosts: self.hosts.unwrap_or(base.hosts),
    }
  }
}

fn api_section<'de, D: Deserializer<'de>>(d: D) -> Result<RuntimeCacheConfig, D::Error> {
  Ok(RuntimeCacheOverride::deserialize(d)?.apply(RuntimeCacheConfig::api()))
}

fn tiles_section<'de, D: Deserializer<'de>>(d: D) -> Result<RuntimeCacheConfig, D::Error> {
  Ok(RuntimeCacheOverride::deserialize(d)?.apply(RuntimeCacheConfig::tiles()))
}

fn cdn_section<'de, D: Deserializer<'de>>(d: D) -> Result<RuntimeCacheConfig, D::Error> {
  Ok(RuntimeCacheOverride::deserialize(d)?.apply(RuntimeCacheConfig::cdn()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
  /// Origin the application is served from
  pub app_origin: String,
  /// Version tag of the static asset generation
  pub cache_version: String,
  /// Static assets precached on install, as paths on the app origin
  pub manifest: Vec<String>,
  /// Shell served for navigation requests
  pub navigation_fallback: String,
  /// Bounded wait for API requests before falling back to cache
  pub network_timeout_secs: u64,
  #[serde(deserialize_with = "api_section")]
  pub api: RuntimeCacheConfig,
  #[serde(deserialize_with = "tiles_section")]
  pub tiles: RuntimeCacheConfig,
  #[serde(deserialize_with = "cdn_section")]
  pub cdn: RuntimeCacheConfig,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self {
      app_origin: "http://localhost:8080".to_string(),
      cache_version: "v1".to_string(),
      manifest: ["/", "/index.html", "/app.bundle.js", "/app.css", "/favicon.png", "/manifest.json"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      navigation_fallback: "/index.html".to_string(),
      network_timeout_secs: 10,
      api: RuntimeCacheConfig::api(),
      tiles: RuntimeCacheConfig::tiles(),
      cdn: RuntimeCacheConfig::cdn(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Local store database (default: $XDG_DATA_HOME/storymap/store.db)
  pub path: Option<PathBuf>,
  /// Agent response cache database (default: $XDG_DATA_HOME/storymap/agent-cache.db)
  pub agent_cache_path: Option<PathBuf>,
  /// Login token and push keys (default: $XDG_DATA_HOME/storymap/device.json)
  pub device_state_path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./storymap.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storymap/config.yaml
  ///
  /// Without any file the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storymap.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storymap").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Directory for the store, agent cache and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storymap"))
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store.path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("store.db")),
    }
  }

  pub fn agent_cache_path(&self) -> Result<PathBuf> {
    match &self.store.agent_cache_path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("agent-cache.db")),
    }
  }

  pub fn device_state_path(&self) -> Result<PathBuf> {
    match &self.store.device_state_path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("device.json")),
    }
  }

  /// Get the API token from the environment.
  ///
  /// Checks STORYMAP_TOKEN; callers fall back to the token saved by `login`.
  pub fn get_api_token() -> Option<String> {
    std::env::var("STORYMAP_TOKEN").ok().filter(|t| !t.is_empty())
  }
}
