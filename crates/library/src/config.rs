use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::executor::DEFAULT_QUEUE_DEPTH;

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_TAG_CACHE_CAPACITY: usize = 8;
pub const DEFAULT_TOMBSTONE_RETENTION_SECS: u64 = 60 * 60 * 24 * 30;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub version: u32,
    pub music_root: String,
    pub index_path: String,
    pub tag_cache_capacity: usize,
    pub queue_depth: usize,
    pub tombstone_retention_secs: u64,
    pub skip_hidden: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            music_root: "".to_string(),
            index_path: "library.redb".to_string(),
            tag_cache_capacity: DEFAULT_TAG_CACHE_CAPACITY,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            tombstone_retention_secs: DEFAULT_TOMBSTONE_RETENTION_SECS,
            skip_hidden: true,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("LIBRARY_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from("library.yaml"),
    }
}

/// Reads the config at `path`, or writes the defaults there if it does not
/// exist. The flag is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(LibraryConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: LibraryConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.index_path.trim().is_empty() {
            config.index_path = "library.redb".to_string();
        }
        if config.tag_cache_capacity == 0 {
            config.tag_cache_capacity = DEFAULT_TAG_CACHE_CAPACITY;
        }
        if config.queue_depth == 0 {
            config.queue_depth = DEFAULT_QUEUE_DEPTH;
        }
        return Ok((config, false));
    }

    let config = LibraryConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &LibraryConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_music_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}
