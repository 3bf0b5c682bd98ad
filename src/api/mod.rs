//! Remote story API.

mod client;
mod types;

pub use client::StoryApi;
pub use types::LoginResult;
