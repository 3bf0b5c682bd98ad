//! Outgoing requests and the network seam the agent fetches through.

use futures::future::BoxFuture;
use url::Url;

use crate::cache::{HttpResponse, NetworkError};

/// How the page issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  #[default]
  Other,
}

/// A request intercepted by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
}

impl FetchRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::Other,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

/// Network access used by the agent.
///
/// Returns a boxed future so the agent can hold `Arc<dyn Fetcher>`.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<HttpResponse, NetworkError>>;
}

/// Fetcher backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("storymap/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<HttpResponse, NetworkError>> {
    Box::pin(async move {
      let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| NetworkError(format!("invalid method {}: {}", request.method, e)))?;

      let response = self
        .client
        .request(method, request.url.clone())
        .send()
        .await
        .map_err(|e| NetworkError(e.to_string()))?;

      let status = response.status().as_u16();
      let url = response.url().to_string();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| NetworkError(e.to_string()))?
        .to_vec();

      Ok(HttpResponse {
        url,
        status,
        headers,
        body,
      })
    })
  }
}
