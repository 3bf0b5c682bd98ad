mod agent;
mod api;
mod cache;
mod clock;
mod commands;
mod config;
mod device;
mod logging;
mod push;
mod store;
mod sync;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "storymap")]
#[command(about = "Offline story store and background cache agent for Story Map")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storymap/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let _log_guard = logging::init(&config::Config::data_dir()?.join("logs"), args.verbose)?;

  let store = Arc::new(store::LocalStore::new(config.store_path()?, clock::system()));
  store.open()?;
  let device = Arc::new(device::DeviceStateFile::new(config.device_state_path()?));

  let result = commands::run(args.command, &config, &store, &device).await;
  store.close()?;
  result
}
