use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use mage_sync::config::Config;
use mage_sync::sync::{Stage, StageOutcome};
use mage_sync::{logging, SyncService, SyncStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mage-sync")]
#[command(about = "Sync MAGE roles, users, layers and static features into a local database")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mage-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// MAGE server url, overrides server.url
  #[arg(short, long)]
  server: Option<String>,

  /// SQLite database file, overrides database
  #[arg(short, long)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sync roles, then users
  Roles,
  /// Sync layers and the static features of external layers
  Features,
  /// Sync roles and users, then layers and features
  All,
  /// Show what the local database holds
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(server) = args.server {
    config.server.url = server;
  }

  let _guard = logging::init(&config.logging)?;

  let database = match args.database {
    Some(path) => path,
    None => config.database_path()?,
  };
  info!(database = %database.display(), server = %config.server.url, "starting");

  let service = SyncService::open(&config, &database, Config::get_api_token())?;

  let stage: Arc<dyn Stage> = match args.command {
    Command::Roles => Arc::new(service.initialization_chain()),
    Command::Features => Arc::new(service.feature_fetch()),
    Command::All => Arc::new(service.full_sync_chain()),
    Command::Status => {
      let status = service
        .status()
        .map_err(|e| eyre!("Failed to read local status: {}", e))?;
      print_status(&status);
      return Ok(());
    }
  };

  let outcome = run_until_interrupted(stage.as_ref()).await;

  let status = service
    .status()
    .map_err(|e| eyre!("Failed to read local status: {}", e))?;
  print_status(&status);

  match outcome {
    StageOutcome::Succeeded => Ok(()),
    outcome => Err(eyre!("{} sync ended as {:?}", stage.name(), outcome)),
  }
}

/// Run `stage`, canceling it on Ctrl-C and waiting for it to wind down.
async fn run_until_interrupted(stage: &dyn Stage) -> StageOutcome {
  let mut run = stage.run();

  tokio::select! {
    outcome = &mut run => return outcome,
    _ = tokio::signal::ctrl_c() => {
      warn!(stage = stage.name(), "interrupted, finishing current step");
      stage.cancel();
    }
  }

  run.await
}

fn print_status(status: &SyncStatus) {
  println!("roles:     {}", status.roles);
  println!("users:     {}", status.users);
  println!("layers:    {}", status.layers);
  println!("features:  {}", status.features);
  match status.layers_fetched_at {
    Some(at) if status.layers_fetched_once => {
      println!("layers fetched: {}", at.format("%Y-%m-%d %H:%M:%S UTC"))
    }
    _ => println!("layers fetched: never"),
  }
}
