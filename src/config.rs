use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Deployment-time settings: which version is current and what it must hold.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Name of the current cache store; changing it rolls out a new version
  pub cache_name: String,
  /// Base URL that relative manifest entries and requests resolve against
  pub scope: String,
  /// Assets that must be cached for offline operation
  pub manifest: Vec<String>,
  /// URL prefixes that are never intercepted
  pub bypass_prefixes: Vec<String>,
  /// Cache database path (defaults to $XDG_DATA_HOME/offcache/cache.db)
  pub database: Option<PathBuf>,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive, overridden by RUST_LOG
  pub level: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_name: "webxr-vertical-plane-test-v1".to_string(),
      scope: "http://localhost:8080/".to_string(),
      manifest: vec![
        "./index.html".to_string(),
        "https://unpkg.com/three@0.160.0/build/three.module.js".to_string(),
        "https://unpkg.com/three@0.160.0/examples/jsm/controls/ARButton.js".to_string(),
      ],
      bypass_prefixes: vec!["chrome-extension://".to_string()],
      database: None,
      log: LogConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    Self::load_from_dirs(explicit_path, Path::new("."), dirs::config_dir().as_deref())
  }

  /// Like [`Config::load`], searching `local_dir` and `config_dir` instead of the
  /// working directory and the XDG config directory.
  fn load_from_dirs(
    explicit_path: Option<&Path>,
    local_dir: &Path,
    config_dir: Option<&Path>,
  ) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file(local_dir, config_dir)
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file(local_dir: &Path, config_dir: Option<&Path>) -> Option<PathBuf> {
    // Check current directory
    let local = local_dir.join("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = config_dir {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// The scope as a parsed base URL.
  pub fn scope_url(&self) -> Result<Url> {
    Url::parse(&self.scope).map_err(|e| eyre!("Invalid scope '{}': {}", self.scope, e))
  }

  fn validate(&self) -> Result<()> {
    if self.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }

    let scope = self.scope_url()?;
    for entry in &self.manifest {
      scope
        .join(entry)
        .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))?;
    }

    Ok(())
  }
}
