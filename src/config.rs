use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::intercept::CacheGenerations;
use crate::store::SqliteStorage;

const DEFAULT_OFFLINE_PAGE: &str = "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\n<body><h1>You are offline</h1><p>This page has not been saved for offline use yet. Reconnect and try again.</p></body></html>\n";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Default tracing filter when RUST_LOG is not set
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app: AppConfig::default(),
      api: ApiConfig::default(),
      cache: CacheConfig::default(),
      storage: StorageConfig::default(),
      sync: SyncConfig::default(),
      log_level: default_log_level(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Origin the application is served from
  pub origin: String,
  /// Version of the running application
  pub version: String,
  /// Extra hosts treated as development environments
  #[serde(default)]
  pub dev_hosts: Vec<String>,
  /// App shell paths fetched into the static cache on registration
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// HTML document served for navigations that are offline and not cached
  pub offline_page: Option<PathBuf>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "https://study.example".to_string(),
      version: env!("CARGO_PKG_VERSION").to_string(),
      dev_hosts: Vec::new(),
      precache: default_precache(),
      offline_page: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// API root; relative URLs resolve against the app origin
  #[serde(default = "default_api_base")]
  pub base_url: String,
  /// Path prefix that marks a request as an API call
  #[serde(default = "default_api_prefix")]
  pub prefix: String,
  #[serde(default = "default_connect_timeout")]
  pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_api_base(),
      prefix: default_api_prefix(),
      connect_timeout_secs: default_connect_timeout(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_static_generation")]
  pub static_generation: String,
  #[serde(default = "default_api_generation")]
  pub api_generation: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_generation: default_static_generation(),
      api_generation: default_api_generation(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/studysync/offline.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Seconds between connectivity probes while watching
  #[serde(default = "default_probe_interval")]
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval(),
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_precache() -> Vec<String> {
  vec!["/".to_string(), "/index.html".to_string()]
}

fn default_api_base() -> String {
  "/api/".to_string()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_connect_timeout() -> u64 {
  10
}

fn default_static_generation() -> String {
  "static-v1".to_string()
}

fn default_api_generation() -> String {
  "api-v1".to_string()
}

fn default_probe_interval() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./studysync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/studysync/config.yaml
  ///
  /// Without a config file the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("studysync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("studysync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks STUDYSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("STUDYSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.app.origin)
      .map_err(|e| eyre!("Invalid app origin {}: {}", self.app.origin, e))
  }

  /// API root, always ending in `/` so endpoints join below it.
  pub fn api_base(&self) -> Result<Url> {
    let origin = self.origin_url()?;
    let mut base = origin
      .join(&self.api.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", self.api.base_url, e))?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    Ok(base)
  }

  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;
    self
      .app
      .precache
      .iter()
      .map(|p| {
        origin
          .join(p)
          .map_err(|e| eyre!("Invalid precache entry {}: {}", p, e))
      })
      .collect()
  }

  pub fn generations(&self) -> CacheGenerations {
    CacheGenerations {
      static_assets: self.cache.static_generation.clone(),
      api_responses: self.cache.api_generation.clone(),
    }
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.api.connect_timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.sync.probe_interval_secs.max(1))
  }

  /// Fallback document for offline navigations.
  pub fn offline_page(&self) -> Result<String> {
    match &self.app.offline_page {
      Some(path) => std::fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read offline page {}: {}", path.display(), e)),
      None => Ok(DEFAULT_OFFLINE_PAGE.to_string()),
    }
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    self
      .storage
      .path
      .clone()
      .or_else(SqliteStorage::default_path)
      .ok_or_else(|| eyre!("Could not determine a data directory for the offline store"))
  }
}
