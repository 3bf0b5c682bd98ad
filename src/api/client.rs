use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::types::{ApiEnvelope, ApiLoginResponse, ApiStoriesResponse, ApiStoryResponse, LoginResult};
use crate::config::ApiConfig;
use crate::push::{PushRegistrar, PushSubscription};
use crate::store::{OfflineStory, Story};
use crate::sync::StoryUploader;

/// Remote story API client
#[derive(Clone)]
pub struct StoryApi {
  client: reqwest::Client,
  base_url: String,
  token: Option<String>,
}

impl StoryApi {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("storymap/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create API client: {}", e))?;

    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      token,
    })
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
    let token = self
      .token
      .as_deref()
      .ok_or_else(|| eyre!("Not logged in: run `storymap login` or set STORYMAP_TOKEN"))?;
    Ok(builder.bearer_auth(token))
  }

  async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, action: &str) -> Result<T> {
    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", action, e))?;
    let status = response.status().as_u16();
    let body = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", action, e))?;
    debug!(action, status, "api response");
    parse_response(status, &body, action)
  }

  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
    let request = self
      .client
      .post(self.endpoint("register"))
      .json(&json!({ "name": name, "email": email, "password": password }));
    let _: ApiEnvelope = self.send(request, "register").await?;
    Ok(())
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
    let request = self
      .client
      .post(self.endpoint("login"))
      .json(&json!({ "email": email, "password": password }));
    let response: ApiLoginResponse = self.send(request, "log in").await?;
    response
      .login_result
      .ok_or_else(|| eyre!("Failed to log in: response carried no login result"))
  }

  /// List stories, optionally only those with a location.
  pub async fn stories(&self, with_location: bool) -> Result<Vec<Story>> {
    let request = self
      .authorized(self.client.get(self.endpoint("stories")))?
      .query(&[("location", if with_location { "1" } else { "0" })]);
    let response: ApiStoriesResponse = self.send(request, "fetch stories").await?;
    Ok(response.list_story)
  }

  pub async fn story(&self, id: &str) -> Result<Story> {
    let request = self.authorized(self.client.get(self.endpoint(&format!("stories/{}", id))))?;
    let response: ApiStoryResponse = self.send(request, "fetch story").await?;
    response
      .story
      .ok_or_else(|| eyre!("Failed to fetch story {}: response carried no story", id))
  }

  /// Upload a story with its photo as multipart form data.
  pub async fn add_story(&self, story: &OfflineStory) -> Result<()> {
    let path = Path::new(&story.photo);
    let bytes = tokio::fs::read(path)
      .await
      .map_err(|e| eyre!("Failed to read photo {}: {}", path.display(), e))?;
    let file_name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "photo.jpg".to_string());
    let photo = Part::bytes(bytes)
      .file_name(file_name)
      .mime_str(photo_mime(path))
      .map_err(|e| eyre!("Failed to build upload: {}", e))?;

    let mut form = Form::new()
      .text("description", story.description.clone())
      .part("photo", photo);
    if let Some(lat) = story.lat {
      form = form.text("lat", lat.to_string());
    }
    if let Some(lon) = story.lon {
      form = form.text("lon", lon.to_string());
    }

    let request = self
      .authorized(self.client.post(self.endpoint("stories")))?
      .multipart(form);
    let _: ApiEnvelope = self.send(request, "add story").await?;
    Ok(())
  }

  pub async fn subscribe_push(&self, subscription: &PushSubscription) -> Result<()> {
    let request = self
      .authorized(self.client.post(self.endpoint("notifications/subscribe")))?
      .json(&json!({ "endpoint": subscription.endpoint, "keys": subscription.keys }));
    let _: ApiEnvelope = self.send(request, "subscribe to notifications").await?;
    Ok(())
  }

  pub async fn unsubscribe_push(&self, endpoint: &str) -> Result<()> {
    let request = self
      .authorized(self.client.delete(self.endpoint("notifications/subscribe")))?
      .json(&json!({ "endpoint": endpoint }));
    let _: ApiEnvelope = self.send(request, "unsubscribe from notifications").await?;
    Ok(())
  }
}

/// Decode a response body, mapping the `error`/`message` envelope and
/// non-success statuses to errors.
fn parse_response<T: DeserializeOwned>(status: u16, body: &str, action: &str) -> Result<T> {
  let envelope: ApiEnvelope = serde_json::from_str(body)
    .map_err(|e| eyre!("Failed to {}: unexpected response (HTTP {}): {}", action, status, e))?;

  if envelope.error || !(200..300).contains(&status) {
    let message = if envelope.message.is_empty() {
      "no message".to_string()
    } else {
      envelope.message
    };
    return Err(eyre!("Failed to {}: {} (HTTP {})", action, message, status));
  }

  serde_json::from_str(body).map_err(|e| eyre!("Failed to {}: {}", action, e))
}

fn photo_mime(path: &Path) -> &'static str {
  match path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase())
    .as_deref()
  {
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("png") => "image/png",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    _ => "application/octet-stream",
  }
}

impl PushRegistrar for StoryApi {
  fn register<'a>(&'a self, subscription: &'a PushSubscription) -> BoxFuture<'a, Result<()>> {
    Box::pin(self.subscribe_push(subscription))
  }

  fn unregister<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<()>> {
    Box::pin(self.unsubscribe_push(endpoint))
  }
}

impl StoryUploader for StoryApi {
  fn upload<'a>(&'a self, story: &'a OfflineStory) -> BoxFuture<'a, Result<()>> {
    Box::pin(self.add_story(story))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn api(token: Option<&str>) -> StoryApi {
    StoryApi::new(&ApiConfig::default(), token.map(str::to_string)).unwrap()
  }

  #[test]
  fn endpoints_join_cleanly() {
    let api = api(None);
    assert_eq!(api.endpoint("stories"), "https://story-api.dicoding.dev/v1/stories");
    assert_eq!(
      api.endpoint("/notifications/subscribe"),
      "https://story-api.dicoding.dev/v1/notifications/subscribe"
    );
  }

  #[test]
  fn requests_need_a_token() {
    let anonymous = api(None);
    let err = anonymous
      .authorized(anonymous.client.get(anonymous.endpoint("stories")))
      .unwrap_err();
    assert!(err.to_string().contains("Not logged in"));

    let signed_in = api(Some("abc"));
    let request = signed_in
      .authorized(signed_in.client.get(signed_in.endpoint("stories")))
      .unwrap()
      .build()
      .unwrap();
    assert_eq!(request.headers()["authorization"], "Bearer abc");
  }

  #[test]
  fn error_envelope_becomes_error() {
    let err = parse_response::<ApiStoriesResponse>(
      401,
      r#"{"error":true,"message":"Missing authentication"}"#,
      "fetch stories",
    )
    .unwrap_err();
    assert_eq!(
      err.to_string(),
      "Failed to fetch stories: Missing authentication (HTTP 401)"
    );

    let err =
      parse_response::<ApiEnvelope>(500, r#"{"message":""}"#, "add story").unwrap_err();
    assert!(err.to_string().contains("no message"));
  }

  #[test]
  fn non_json_body_is_reported() {
    let err = parse_response::<ApiEnvelope>(502, "<html>Bad Gateway</html>", "log in").unwrap_err();
    assert!(err.to_string().contains("unexpected response (HTTP 502)"));
  }

  #[test]
  fn success_payload_is_decoded() {
    let stories: ApiStoriesResponse = parse_response(
      200,
      r#"{"error":false,"message":"ok","listStory":[{"id":"story-1"}]}"#,
      "fetch stories",
    )
    .unwrap();
    assert_eq!(stories.list_story[0].id, "story-1");
  }

  #[test]
  fn mime_from_extension() {
    assert_eq!(photo_mime(Path::new("/tmp/a.JPG")), "image/jpeg");
    assert_eq!(photo_mime(Path::new("/tmp/a.png")), "image/png");
    assert_eq!(photo_mime(Path::new("/tmp/a")), "application/octet-stream");
  }
}
