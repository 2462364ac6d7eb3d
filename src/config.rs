use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the MAGE API token
pub const TOKEN_ENV: &str = "MAGE_SYNC_TOKEN";

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "MAGE_SYNC_CONFIG";

const LOCAL_CONFIG: &str = "mage-sync.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  /// SQLite database file (defaults to $XDG_DATA_HOME/mage-sync/mage.db)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub url: String,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is not set, e.g. "info" or "mage_sync=debug"
  pub level: Option<String>,
  /// Write daily rolling log files here in addition to stderr
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. $MAGE_SYNC_CONFIG
  /// 3. ./mage-sync.yaml (current directory)
  /// 4. $XDG_CONFIG_HOME/mage-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let path = resolve_path(explicit_path, from_env.as_deref(), dirs::config_dir())?;
    Self::load_from_path(&path)
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.server.url.trim().is_empty() {
      return Err(eyre!("server.url must not be empty"));
    }
    Ok(config)
  }

  /// Database path, falling back to the per-user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => crate::db::default_path(),
    }
  }

  /// Get the MAGE API token from the environment.
  ///
  /// Servers that allow anonymous reads need no token, so a missing
  /// variable is not an error.
  pub fn get_api_token() -> Option<String> {
    std::env::var(TOKEN_ENV)
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}

/// Pick the config file to read.
///
/// A path named by the flag or the environment must exist. The default
/// locations are tried in order and skipped when absent.
fn resolve_path(
  explicit: Option<&Path>,
  from_env: Option<&Path>,
  config_dir: Option<PathBuf>,
) -> Result<PathBuf> {
  if let Some(path) = explicit.or(from_env) {
    if !path.exists() {
      return Err(eyre!("Config file not found: {}", path.display()));
    }
    return Ok(path.to_path_buf());
  }

  let defaults = [
    Some(PathBuf::from(LOCAL_CONFIG)),
    config_dir.map(|dir| dir.join("mage-sync").join("config.yaml")),
  ];
  defaults
    .into_iter()
    .flatten()
    .find(|path| path.exists())
    .ok_or_else(|| {
      eyre!(
        "No configuration file found. Set {} or create ~/.config/mage-sync/config.yaml\n\
         See config.example.yaml for the format.",
        CONFIG_ENV
      )
    })
}
