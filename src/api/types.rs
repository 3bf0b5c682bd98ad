//! Serde types matching the remote story API responses.
//!
//! Every response carries an `error`/`message` envelope; payload fields are
//! normalized here so callers only ever see the store's [`Story`] type.

use serde::Deserialize;

use crate::store::Story;

#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
  #[serde(default)]
  pub error: bool,
  #[serde(default)]
  pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiStoriesResponse {
  #[serde(flatten)]
  pub envelope: ApiEnvelope,
  #[serde(rename = "listStory", default)]
  pub list_story: Vec<Story>,
}

#[derive(Debug, Deserialize)]
pub struct ApiStoryResponse {
  #[serde(flatten)]
  pub envelope: ApiEnvelope,
  pub story: Option<Story>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoginResult {
  #[serde(rename = "userId")]
  pub user_id: String,
  pub name: String,
  pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiLoginResponse {
  #[serde(flatten)]
  pub envelope: ApiEnvelope,
  #[serde(rename = "loginResult")]
  pub login_result: Option<LoginResult>,
}
