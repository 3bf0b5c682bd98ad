//! Request classification for the agent.

use url::{Origin, Url};

use super::fetch::FetchRequest;
use crate::config::AgentConfig;

/// Which caching policy applies to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
  /// Static asset or navigation shell, served from the precache
  Precache { asset: Url },
  /// Remote story API, network-first
  StoryApi,
  /// Map tiles, cache-first
  MapTiles,
  /// CDN scripts and images, cache-first
  Cdn,
  /// Everything else
  Passthrough,
}

pub struct Router {
  app_origin: Url,
  manifest: Vec<Url>,
  shell: Url,
  api_origin: Origin,
  tile_hosts: Vec<String>,
  cdn_hosts: Vec<String>,
}

impl Router {
  pub fn new(config: &AgentConfig, api_base: &str) -> Result<Self, url::ParseError> {
    let app_origin = Url::parse(&config.app_origin)?;
    let manifest = config
      .manifest
      .iter()
      .map(|path| app_origin.join(path))
      .collect::<Result<Vec<_>, _>>()?;
    let shell = app_origin.join(&config.navigation_fallback)?;
    let api_origin = Url::parse(api_base)?.origin();

    Ok(Self {
      app_origin,
      manifest,
      shell,
      api_origin,
      tile_hosts: config.tiles.hosts.clone(),
      cdn_hosts: config.cdn.hosts.clone(),
    })
  }

  /// Absolute URLs of the static asset manifest.
  pub fn manifest(&self) -> &[Url] {
    &self.manifest
  }

  pub fn app_origin(&self) -> &Url {
    &self.app_origin
  }

  pub fn classify(&self, request: &FetchRequest) -> Route {
    if !request.is_get() {
      return Route::Passthrough;
    }

    let url = &request.url;
    let origin = url.origin();

    if origin == self.app_origin.origin() {
      let mut bare = url.clone();
      bare.set_fragment(None);
      if let Some(asset) = self.manifest.iter().find(|asset| **asset == bare) {
        return Route::Precache {
          asset: asset.clone(),
        };
      }
      if request.mode == super::fetch::RequestMode::Navigate {
        return Route::Precache {
          asset: self.shell.clone(),
        };
      }
      return Route::Passthrough;
    }

    if origin == self.api_origin {
      return Route::StoryApi;
    }

    let Some(host) = url.host_str() else {
      return Route::Passthrough;
    };
    if self.tile_hosts.iter().any(|suffix| host_matches(host, suffix)) {
      return Route::MapTiles;
    }
    if self.cdn_hosts.iter().any(|suffix| host_matches(host, suffix)) {
      return Route::Cdn;
    }

    Route::Passthrough
  }
}

/// `host` equals `suffix` or is a subdomain of it.
fn host_matches(host: &str, suffix: &str) -> bool {
  host == suffix
    || host
      .strip_suffix(suffix)
      .is_some_and(|rest| rest.ends_with('.'))
}
