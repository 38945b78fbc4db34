use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::semantic::{DEFAULT_DIMENSION, DEFAULT_MODEL, DEFAULT_TOP_K};

const CONFIG_FILE: &str = "config.yaml";

/// Default store directory, relative to the base path
const DEFAULT_STORE_DIR: &str = "vector_store";

/// Environment variable overriding the base path
pub const BASE_PATH_ENV: &str = "CONVSEARCH_BASE_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't find home dir")]
    NoHomeDir,

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the semantic store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticStoreConfig {
    /// Embedding model name (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Vector length the model produces
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Number of search results when none is requested
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Store directory; relative paths are resolved against the base path
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for SemanticStoreConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            dimension: DEFAULT_DIMENSION,
            default_top_k: DEFAULT_TOP_K,
            store_dir: default_store_dir(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_DIR)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub semantic_store: SemanticStoreConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

/// `$CONVSEARCH_BASE_PATH`, else `~/.local/share/convsearch`.
pub fn base_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(BASE_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .ok()
        .flatten()
        .ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".local/share/convsearch"))
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        let store = &self.semantic_store;

        if store.model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "semantic_store.model must not be empty".to_string(),
            ));
        }

        if store.dimension == 0 {
            return Err(ConfigError::Invalid(
                "semantic_store.dimension must be greater than 0".to_string(),
            ));
        }

        if store.default_top_k == 0 {
            return Err(ConfigError::Invalid(
                "semantic_store.default_top_k must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing the defaults on first run.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(base_path)?;
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            let defaults = Config {
                base_path: base_path.to_path_buf(),
                ..Default::default()
            };
            defaults.save()?;
        }

        let config_str = std::fs::read_to_string(&config_path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;

        let path = self.base_path.join(CONFIG_FILE);
        let temp_path = path.with_extension("yaml.tmp");
        std::fs::write(&temp_path, config_str.as_bytes())?;
        std::fs::rename(&temp_path, &path)?;

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Absolute store directory.
    pub fn store_dir(&self) -> PathBuf {
        self.base_path.join(&self.semantic_store.store_dir)
    }
}
