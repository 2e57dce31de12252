use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub provider: ProviderConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub mirror: MirrorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
  #[serde(default = "default_url")]
  pub url: String,
  /// Twitch application client id sent as `Client-ID`
  #[serde(default)]
  pub client_id: String,
  /// Cache tables are named `<table_prefix>_<EntityType>`
  #[serde(default = "default_table_prefix")]
  pub table_prefix: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default)]
  pub rate_limit: RateLimitConfig,
}

impl Default for ProviderConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      client_id: String::new(),
      table_prefix: default_table_prefix(),
      timeout_secs: default_timeout_secs(),
      rate_limit: RateLimitConfig::default(),
    }
  }
}

impl ProviderConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// Client-side throttling for one remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  /// Length of the rolling call-count window
  pub window_secs: u64,
  /// Calls allowed per window before avoidance kicks in
  pub threshold: u32,
  /// Delay applied to every call while in avoidance mode
  pub avoidance_wait_ms: u64,
  /// Delay before retrying after an HTTP 429
  pub recovery_wait_ms: u64,
  /// Total attempts per request, the first one included
  pub max_attempts: u32,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      window_secs: 60,
      threshold: 80,
      avoidance_wait_ms: 1500,
      recovery_wait_ms: 10_000,
      max_attempts: 3,
    }
  }
}

impl RateLimitConfig {
  pub fn window(&self) -> Duration {
    Duration::from_secs(self.window_secs)
  }

  pub fn avoidance_wait(&self) -> Duration {
    Duration::from_millis(self.avoidance_wait_ms)
  }

  pub fn recovery_wait(&self) -> Duration {
    Duration::from_millis(self.recovery_wait_ms)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Database file (defaults to <data dir>/gamemeta/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
  /// Resolve from the bulk mirror instead of the cache and the provider
  #[serde(default)]
  pub enabled: bool,
  pub path: Option<PathBuf>,
  /// Schema the mirror database is attached under
  #[serde(default = "default_mirror_schema")]
  pub schema: String,
}

impl Default for MirrorConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      path: None,
      schema: default_mirror_schema(),
    }
  }
}

fn default_url() -> String {
  "https://api.igdb.com/v4".to_string()
}

fn default_table_prefix() -> String {
  "IGDB".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_mirror_schema() -> String {
  "igdb".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./gamemeta.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/gamemeta/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/gamemeta/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("gamemeta.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gamemeta").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the provider access token from environment variables.
  ///
  /// Checks GAMEMETA_IGDB_TOKEN first, then IGDB_ACCESS_TOKEN as fallback.
  pub fn get_access_token() -> Result<String> {
    std::env::var("GAMEMETA_IGDB_TOKEN")
      .or_else(|_| std::env::var("IGDB_ACCESS_TOKEN"))
      .map_err(|_| {
        eyre!(
          "IGDB access token not found. Set GAMEMETA_IGDB_TOKEN or IGDB_ACCESS_TOKEN environment variable."
        )
      })
  }
}
