//! Command-line subcommands.

use clap::{Args, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::agent::{
  Agent, AgentHandle, ClickOutcome, ClientRegistry, FetchRequest, HttpFetcher, NotificationCenter,
};
use crate::api::StoryApi;
use crate::cache::{CacheLayer, SqliteStorage};
use crate::clock;
use crate::config::Config;
use crate::device::DeviceStateFile;
use crate::push::{decode_application_server_key, LocalPushManager, SubscriptionManager};
use crate::store::{ExportData, LocalStore, NewStory, Story, DEFAULT_CACHE_TTL};
use crate::sync::sync_offline_stories;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Queue a story for upload
  SaveStory(SaveStory),
  /// List queued stories
  Offline {
    /// Only stories not yet delivered
    #[arg(long)]
    unsynced: bool,
  },
  /// Upload queued stories
  Sync,
  /// Remove a queued story
  DeleteStory { id: String },
  /// List stories from the API, falling back to the last cached list
  Stories {
    /// Only stories with a location
    #[arg(long)]
    location: bool,
  },
  /// Fetch a story and save it for offline viewing
  Favorite { id: String },
  Unfavorite { id: String },
  Favorites,
  #[command(subcommand)]
  Setting(SettingCommand),
  /// Drop expired cached values
  CacheClean {
    /// Also drop this cached value, expired or not
    #[arg(long)]
    key: Option<String>,
  },
  /// Write a backup of all local data
  Export {
    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Restore a backup written by `export`
  Import { file: PathBuf },
  /// Delete all local data
  Clear {
    #[arg(long)]
    yes: bool,
  },
  /// Show store status
  Info,
  Register {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Log in and remember the token
  Login {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  Logout,
  #[command(subcommand)]
  Push(PushCommand),
  #[command(subcommand)]
  Agent(AgentCommand),
}

#[derive(Args, Debug)]
pub struct SaveStory {
  #[arg(short, long)]
  description: String,
  /// Path of the photo to upload
  #[arg(short, long)]
  photo: PathBuf,
  #[arg(long, allow_hyphen_values = true)]
  lat: Option<f64>,
  #[arg(long, allow_hyphen_values = true)]
  lon: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum SettingCommand {
  Get { key: String },
  /// Set a value; JSON is stored as JSON, anything else as a string
  Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
pub enum PushCommand {
  Subscribe,
  Unsubscribe,
  Status,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
  /// Install and activate the current asset generation
  Start,
  /// Request a URL through the agent; the body goes to stdout
  Fetch {
    url: String,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
  },
  /// Deliver a push payload
  Push { payload: String },
  /// Deliver a push payload and click the resulting notification
  Click {
    payload: String,
    /// Windows already open, as URLs
    #[arg(long = "window")]
    windows: Vec<String>,
  },
}

pub async fn run(
  command: Command,
  config: &Config,
  store: &Arc<LocalStore>,
  device: &Arc<DeviceStateFile>,
) -> Result<()> {
  match command {
    Command::SaveStory(story) => {
      let id = store.save_offline_story(NewStory {
        id: None,
        description: story.description,
        photo: story.photo.display().to_string(),
        lat: story.lat,
        lon: story.lon,
      })?;
      println!("{}", id);
    }
    Command::Offline { unsynced } => {
      let stories = if unsynced {
        store.get_unsynced_stories()?
      } else {
        store.get_offline_stories()?
      };
      print_json(&stories)?;
    }
    Command::Sync => {
      let api = story_api(config, device)?;
      let report = sync_offline_stories(store, &api).await?;
      println!(
        "attempted {}, synced {}, failed {}",
        report.attempted, report.synced, report.failed
      );
    }
    Command::DeleteStory { id } => store.delete_offline_story(&id)?,
    Command::Stories { location } => stories(config, store, device, location).await?,
    Command::Favorite { id } => {
      let story = story_api(config, device)?.story(&id).await?;
      let refreshed = store.is_favorite(&story.id)?;
      store.add_to_favorites(&story)?;
      if refreshed {
        println!("Refreshed saved copy of {}", story.id);
      } else {
        println!("Saved {} for offline viewing", story.id);
      }
    }
    Command::Unfavorite { id } => store.remove_from_favorites(&id)?,
    Command::Favorites => print_json(&store.get_favorites()?)?,
    Command::Setting(SettingCommand::Get { key }) => {
      let value: Value = store.get_setting(&key, Value::Null)?;
      print_json(&value)?;
    }
    Command::Setting(SettingCommand::Set { key, value }) => {
      let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
      store.set_setting(&key, &value)?;
    }
    Command::CacheClean { key } => {
      if let Some(key) = key {
        store.delete_cache(&key)?;
      }
      let removed = store.clear_expired_cache()?;
      println!("Removed {} expired entries", removed);
    }
    Command::Export { output } => {
      let text = serde_json::to_string_pretty(&store.export_data()?)?;
      match output {
        Some(path) => std::fs::write(&path, text)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => println!("{}", text),
      }
    }
    Command::Import { file } => {
      let text = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let data: ExportData = serde_json::from_str(&text)
        .map_err(|e| eyre!("Failed to parse backup {}: {}", file.display(), e))?;
      let summary = store.import_data(&data)?;
      println!(
        "Imported {} offline stories, {} favorites, {} settings",
        summary.offline_stories, summary.favorites, summary.settings
      );
      if !summary.is_complete() {
        return Err(eyre!("Import incomplete: {}", summary.failures.join("; ")));
      }
    }
    Command::Clear { yes } => {
      if !yes {
        return Err(eyre!("Refusing to delete all local data without --yes"));
      }
      store.clear_all_data()?;
    }
    Command::Info => {
      println!("store open: {}", store.is_open());
      println!("schema version: {}", store.schema_version()?);
      println!("offline stories: {}", store.get_offline_stories()?.len());
      println!("unsynced: {}", store.get_unsynced_stories()?.len());
      println!("favorites: {}", store.get_favorites()?.len());
      println!("device state: {}", device.path().display());
    }
    Command::Register {
      name,
      email,
      password,
    } => {
      StoryApi::new(&config.api, None)?
        .register(&name, &email, &password)
        .await?;
      println!("Registered {}", email);
    }
    Command::Login { email, password } => {
      let result = StoryApi::new(&config.api, None)?
        .login(&email, &password)
        .await?;
      device.update(|state| state.auth_token = Some(result.token.clone()))?;
      println!("Logged in as {} ({})", result.name, result.user_id);
    }
    Command::Logout => device.update(|state| state.auth_token = None)?,
    Command::Push(command) => push(command, config, device).await?,
    Command::Agent(command) => agent(command, config).await?,
  }
  Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// API client authenticated with STORYMAP_TOKEN or the saved login token.
fn story_api(config: &Config, device: &DeviceStateFile) -> Result<StoryApi> {
  let token = match Config::get_api_token() {
    Some(token) => Some(token),
    None => device.load()?.auth_token,
  };
  StoryApi::new(&config.api, token)
}

async fn stories(
  config: &Config,
  store: &LocalStore,
  device: &DeviceStateFile,
  location: bool,
) -> Result<()> {
  let key = if location { "stories.location" } else { "stories" };

  match story_api(config, device)?.stories(location).await {
    Ok(stories) => {
      store.set_cache(key, &stories, DEFAULT_CACHE_TTL)?;
      print_json(&stories)
    }
    Err(e) => match store.get_cache::<Vec<Story>>(key)? {
      Some(stories) => {
        warn!(error = %e, "serving cached story list");
        eprintln!("Offline: showing cached stories");
        print_json(&stories)
      }
      None => Err(e),
    },
  }
}

async fn push(command: PushCommand, config: &Config, device: &Arc<DeviceStateFile>) -> Result<()> {
  let manager = SubscriptionManager::new(
    LocalPushManager::new(Arc::clone(device), &config.push.endpoint, config.push.permission),
    story_api(config, device)?,
    decode_application_server_key(&config.push.vapid_public_key)?,
  );

  match command {
    PushCommand::Subscribe => print_json(&manager.subscribe().await?)?,
    PushCommand::Unsubscribe => {
      if manager.unsubscribe().await? {
        println!("Unsubscribed");
      } else {
        println!("Not subscribed");
      }
    }
    PushCommand::Status => {
      println!("permission: {:?}", manager.permission()?);
      match manager.subscription()? {
        Some(subscription) => println!("subscribed: {}", subscription.endpoint),
        None => println!("not subscribed"),
      }
    }
  }
  Ok(())
}

fn parse_url(raw: &str) -> Result<Url> {
  Url::parse(raw).map_err(|e| eyre!("Invalid URL {}: {}", raw, e))
}

async fn agent(command: AgentCommand, config: &Config) -> Result<()> {
  let storage = SqliteStorage::open(&config.agent_cache_path()?)?;
  let notifier = Arc::new(NotificationCenter::new());
  let clients = Arc::new(ClientRegistry::new());

  if let AgentCommand::Click { windows, .. } = &command {
    for window in windows {
      clients.register(parse_url(window)?);
    }
  }

  let agent = Agent::new(
    &config.agent,
    &config.api.base_url,
    CacheLayer::new(storage, clock::system()),
    Arc::new(HttpFetcher::new()?),
    notifier.clone(),
    clients.clone(),
  )?;
  let handle = AgentHandle::spawn(agent);

  match command {
    AgentCommand::Start => {
      let state = handle.start().await?;
      println!("{:?}", state);
    }
    AgentCommand::Fetch {
      url,
      navigate,
      method,
    } => {
      if let Err(e) = handle.start().await {
        warn!(error = %e, "agent not active, passing request through");
      }
      let url = parse_url(&url)?;
      let mut request = if navigate {
        FetchRequest::navigate(url)
      } else {
        FetchRequest::get(url)
      };
      request.method = method.to_ascii_uppercase();

      let response = handle.fetch(request).await?;
      eprintln!(
        "HTTP {} {} ({})",
        response.status,
        response.url,
        response.header("content-type").unwrap_or("unknown type")
      );
      std::io::stdout()
        .write_all(&response.body)
        .map_err(|e| eyre!("Failed to write response: {}", e))?;
    }
    AgentCommand::Push { payload } => {
      handle.push(payload.into_bytes()).await?;
      print_json(&notifier.displayed())?;
    }
    AgentCommand::Click { payload, .. } => {
      let notification = handle.push(payload.into_bytes()).await?;
      let (verb, id) = match handle.click(notification).await? {
        ClickOutcome::Focused(id) => ("Focused", id),
        ClickOutcome::Opened(id) => ("Opened", id),
      };
      if let Some(window) = clients.match_all().into_iter().find(|w| w.id == id) {
        let focus = if window.focused { "focused" } else { "background" };
        println!("{} window {} at {} ({})", verb, id, window.url, focus);
      }
    }
  }
  Ok(())
}
