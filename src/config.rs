use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub display: DisplayConfig,
  /// Extra message catalog merged over the built-in one
  pub messages_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the fleet backend; endpoints live under `{url}/api/`
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// Persist between runs in a SQLite file
  #[default]
  Sqlite,
  /// Keep entries for the lifetime of the process only
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  /// SQLite file (default: $XDG_DATA_HOME/fleetq/cache.db)
  pub path: Option<PathBuf>,
  /// Seconds before a cached result is refetched
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  /// Retries for failed reads; writes are never retried
  #[serde(default = "default_retry")]
  pub retry: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackend::default(),
      path: None,
      stale_time_secs: default_stale_time_secs(),
      retry: default_retry(),
    }
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_time_secs)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      retries: self.retry,
      ..RetryPolicy::default()
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
  #[serde(default = "default_page_size")]
  pub page_size: u32,
}

impl Default for DisplayConfig {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_stale_time_secs() -> u64 {
  60
}

fn default_retry() -> u32 {
  3
}

fn default_page_size() -> u32 {
  crate::api::DEFAULT_PAGE_SIZE
}

impl Config {
  /// Configuration with defaults for everything but the API url.
  pub fn with_url(url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig {
        url: url.into(),
        timeout_secs: default_timeout_secs(),
      },
      cache: CacheConfig::default(),
      display: DisplayConfig::default(),
      messages_file: None,
    }
  }

  /// Load configuration, letting `url_override` (or `FLEETQ_API_URL`) replace
  /// the configured API url. Without a config file, an override alone is enough.
  pub fn resolve(explicit_path: Option<&Path>, url_override: Option<String>) -> Result<Self> {
    let url_override = url_override.or_else(|| std::env::var("FLEETQ_API_URL").ok());

    let mut config = match Self::locate(explicit_path)? {
      Some(path) => Self::load_from_path(&path)?,
      None => match &url_override {
        Some(url) => Self::with_url(url.clone()),
        None => {
          return Err(eyre!(
            "No configuration file found. Create one at ~/.config/fleetq/config.yaml \
             or pass --url."
          ))
        }
      },
    };

    if let Some(url) = url_override {
      config.api.url = url;
    }
    Ok(config)
  }

  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fleetq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fleetq/config.yaml
  fn locate(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = explicit_path {
      if p.exists() {
        return Ok(Some(p.to_path_buf()));
      }
      return Err(eyre!("Config file not found: {}", p.display()));
    }

    let local = PathBuf::from("fleetq.yaml");
    if local.exists() {
      return Ok(Some(local));
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fleetq").join("config.yaml");
      if xdg_path.exists() {
        return Ok(Some(xdg_path));
      }
    }

    Ok(None)
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// API token from `FLEETQ_API_TOKEN`, if set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FLEETQ_API_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
