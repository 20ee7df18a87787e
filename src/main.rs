mod api;
mod cache;
mod commands;
mod config;
mod listing;
mod logging;
mod render;
mod shell;
mod store;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::api::HttpTransport;
use crate::shell::Session;
use crate::store::PostStore;

#[derive(Parser, Debug)]
#[command(name = "postboard")]
#[command(about = "Browse and edit posts and comments from a REST API")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./postboard.yaml or $XDG_CONFIG_HOME/postboard/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL, overriding the config file and POSTBOARD_BASE_URL
  #[arg(long)]
  base_url: Option<String>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  /// Run a single command and exit; starts the interactive shell when omitted
  #[command(subcommand)]
  command: Option<shell::Command>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init(args.log_stderr)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override base URL if specified on command line
  let config = if let Some(base_url) = args.base_url {
    config::Config {
      api: config::ApiConfig {
        base_url,
        ..config.api
      },
      ..config
    }
  } else {
    config
  };

  let transport = HttpTransport::new(&config.api)?;
  info!(base_url = %transport.base_url(), "Starting postboard");

  let store = PostStore::new(Arc::new(transport));
  let mut session = Session::new(store, config);

  match args.command {
    Some(command) => {
      if let Err(err) = session.execute(command).await {
        if let Some(message) = shell::user_message(&err) {
          eprintln!("{}", message);
        }
        return Err(err);
      }
    }
    None => shell::run_shell(session).await?,
  }

  Ok(())
}
