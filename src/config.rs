use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::CacheGeneration;
use crate::worker::{LiveDataRules, Scope};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// The worker's own origin; everything else is cross-origin
  #[serde(deserialize_with = "deserialize_origin")]
  pub origin: Url,
  pub generation: GenerationConfig,
  /// Prepended to every namespace name (e.g. the app name)
  pub cache_prefix: Option<String>,
  /// App shell paths cached at install time, in order
  #[serde(default)]
  pub precache: Vec<String>,
  #[serde(default)]
  pub live_data: LiveDataConfig,
  /// File extensions treated as markup (network-first)
  #[serde(default = "default_markup_extensions")]
  pub markup_extensions: Vec<String>,
  /// Cache database location (defaults to $XDG_DATA_HOME/swcache/cache.db)
  pub store_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationConfig {
  /// Semantic version of the deployed build
  pub version: Option<String>,
  pub build: Option<u64>,
  /// Explicit label, used verbatim instead of version + build
  pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveDataConfig {
  pub path_prefixes: Vec<String>,
  pub host_suffixes: Vec<String>,
}

impl Default for LiveDataConfig {
  fn default() -> Self {
    Self {
      path_prefixes: vec!["/api/".to_string(), "/firebase/".to_string()],
      host_suffixes: vec![
        "firestore.googleapis.com".to_string(),
        "firebase.googleapis.com".to_string(),
      ],
    }
  }
}

fn default_markup_extensions() -> Vec<String> {
  vec!["html".to_string(), "htm".to_string(), "xhtml".to_string()]
}

fn deserialize_origin<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  let url = Url::parse(&raw).map_err(serde::de::Error::custom)?;
  if !url.origin().is_tuple() {
    return Err(serde::de::Error::custom(format!(
      "'{}' has no usable origin",
      raw
    )));
  }
  Ok(url)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/swcache/config.yaml\n\
                 See swcache.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    // Fail on an unusable generation now rather than at first event
    config.generation()?;

    Ok(config)
  }

  /// The current cache generation.
  pub fn generation(&self) -> Result<CacheGeneration> {
    let generation = &self.generation;
    match (&generation.label, &generation.version) {
      (Some(label), _) => CacheGeneration::from_label(label),
      (None, Some(version)) => CacheGeneration::from_release(version, generation.build),
      (None, None) => Err(eyre!(
        "Config must set generation.version or generation.label"
      )),
    }
  }

  /// Override the generation with an explicit label.
  pub fn with_generation_label(mut self, label: &str) -> Result<Self> {
    CacheGeneration::from_label(label)?;
    self.generation.label = Some(label.to_string());
    Ok(self)
  }

  /// Routing rules for the worker's origin.
  pub fn scope(&self) -> Scope {
    Scope::new(
      &self.origin,
      LiveDataRules {
        path_prefixes: self.live_data.path_prefixes.clone(),
        host_suffixes: self.live_data.host_suffixes.clone(),
      },
      self.markup_extensions.clone(),
    )
  }
}
