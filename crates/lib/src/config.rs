//! Engine configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, an optional
//! `buckle.json` in the project root, then `BUCKLE_*` environment variables.
//! Command-line flags are applied on top by the caller.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{CONFIG_FILENAME, DEFAULT_OUT_DIR};

pub const ENV_OUT: &str = "BUCKLE_OUT";
pub const ENV_PARALLELISM: &str = "BUCKLE_PARALLELISM";
pub const ENV_METADATA_STORAGE: &str = "BUCKLE_METADATA_STORAGE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "BUCKLE_BUSY_TIMEOUT_MS";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid value for {name}: '{value}' ({reason})")]
  InvalidValue { name: String, value: String, reason: String },
}

/// Backing for the build metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataStorage {
  #[default]
  Sqlite,
  Filesystem,
}

impl fmt::Display for MetadataStorage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MetadataStorage::Sqlite => write!(f, "sqlite"),
      MetadataStorage::Filesystem => write!(f, "filesystem"),
    }
  }
}

impl FromStr for MetadataStorage {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "sqlite" => Ok(MetadataStorage::Sqlite),
      "filesystem" => Ok(MetadataStorage::Filesystem),
      other => Err(format!("expected 'sqlite' or 'filesystem', got '{}'", other)),
    }
  }
}

/// Fields of `buckle.json`. Everything is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
  out_dir: Option<PathBuf>,
  parallelism: Option<usize>,
  metadata_storage: Option<MetadataStorage>,
  busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
  pub project_root: PathBuf,
  /// Output root, relative to the project root unless absolute.
  pub out_dir: PathBuf,
  pub parallelism: usize,
  pub metadata_storage: MetadataStorage,
  /// How long the metadata store retries on lock contention.
  pub busy_timeout: Duration,
}

impl EngineConfig {
  /// Built-in defaults for `project_root`.
  pub fn defaults(project_root: impl Into<PathBuf>) -> Self {
    Self {
      project_root: project_root.into(),
      out_dir: PathBuf::from(DEFAULT_OUT_DIR),
      parallelism: num_cpus(),
      metadata_storage: MetadataStorage::default(),
      busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
    }
  }

  /// Defaults, overlaid with `buckle.json` if present, then the environment.
  pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
    let project_root = dunce::canonicalize(project_root).unwrap_or_else(|_| project_root.to_path_buf());
    let mut config = Self::defaults(&project_root);

    let path = project_root.join(CONFIG_FILENAME);
    if path.exists() {
      let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
      })?;
      let file: ConfigFile =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
      config.apply_file(file)?;
      debug!(path = %path.display(), "loaded config file");
    }

    config.apply_env()?;
    Ok(config)
  }

  fn apply_file(&mut self, file: ConfigFile) -> Result<(), ConfigError> {
    if let Some(out_dir) = file.out_dir {
      self.out_dir = out_dir;
    }
    if let Some(parallelism) = file.parallelism {
      self.parallelism = check_parallelism("parallelism", parallelism)?;
    }
    if let Some(storage) = file.metadata_storage {
      self.metadata_storage = storage;
    }
    if let Some(ms) = file.busy_timeout_ms {
      self.busy_timeout = Duration::from_millis(ms);
    }
    Ok(())
  }

  fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Some(out) = env_value(ENV_OUT) {
      self.out_dir = PathBuf::from(out);
    }
    if let Some(value) = env_value(ENV_PARALLELISM) {
      let parsed = value
        .parse::<usize>()
        .map_err(|e| invalid(ENV_PARALLELISM, &value, e.to_string()))?;
      self.parallelism = check_parallelism(ENV_PARALLELISM, parsed)?;
    }
    if let Some(value) = env_value(ENV_METADATA_STORAGE) {
      self.metadata_storage = value
        .parse()
        .map_err(|reason| invalid(ENV_METADATA_STORAGE, &value, reason))?;
    }
    if let Some(value) = env_value(ENV_BUSY_TIMEOUT_MS) {
      let ms = value
        .parse::<u64>()
        .map_err(|e| invalid(ENV_BUSY_TIMEOUT_MS, &value, e.to_string()))?;
      self.busy_timeout = Duration::from_millis(ms);
    }
    Ok(())
  }

  /// Absolute output root.
  pub fn out_root(&self) -> PathBuf {
    self.project_root.join(&self.out_dir)
  }
}

fn env_value(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn invalid(name: &str, value: &str, reason: impl Into<String>) -> ConfigError {
  ConfigError::InvalidValue {
    name: name.to_string(),
    value: value.to_string(),
    reason: reason.into(),
  }
}

fn check_parallelism(name: &str, value: usize) -> Result<usize, ConfigError> {
  if value == 0 {
    return Err(invalid(name, "0", "must be at least 1"));
  }
  Ok(value)
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
  use serial_test::serial;
  use tempfile::TempDir;

  use super::*;

  const NO_ENV: [(&str, Option<&str>); 4] = [
    (ENV_OUT, None),
    (ENV_PARALLELISM, None),
    (ENV_METADATA_STORAGE, None),
    (ENV_BUSY_TIMEOUT_MS, None),
  ];

  #[test]
  #[serial]
  fn defaults_without_file_or_env() {
    let temp = TempDir::new().unwrap();
    temp_env::with_vars(NO_ENV, || {
      let config = EngineConfig::load(temp.path()).unwrap();
      assert_eq!(config.out_dir, PathBuf::from("buckle-out"));
      assert_eq!(config.metadata_storage, MetadataStorage::Sqlite);
      assert_eq!(config.busy_timeout, Duration::from_millis(5000));
      assert!(config.parallelism >= 1);
    });
  }

  #[test]
  #[serial]
  fn env_overrides_file() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
      temp.path().join(CONFIG_FILENAME),
      r#"{ "out_dir": "from-file", "parallelism": 2, "metadata_storage": "filesystem" }"#,
    )
    .unwrap();

    temp_env::with_vars(
      [
        (ENV_OUT, Some("from-env")),
        (ENV_PARALLELISM, None),
        (ENV_METADATA_STORAGE, None),
        (ENV_BUSY_TIMEOUT_MS, Some("250")),
      ],
      || {
        let config = EngineConfig::load(temp.path()).unwrap();
        assert_eq!(config.out_dir, PathBuf::from("from-env"));
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.metadata_storage, MetadataStorage::Filesystem);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(config.out_root().ends_with("from-env"));
      },
    );
  }

  #[test]
  #[serial]
  fn invalid_env_value_names_variable() {
    let temp = TempDir::new().unwrap();
    temp_env::with_vars(
      [
        (ENV_OUT, None),
        (ENV_PARALLELISM, None),
        (ENV_METADATA_STORAGE, Some("leveldb")),
        (ENV_BUSY_TIMEOUT_MS, None),
      ],
      || {
        let err = EngineConfig::load(temp.path()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(ENV_METADATA_STORAGE), "{}", message);
        assert!(message.contains("leveldb"), "{}", message);
      },
    );
  }

  #[test]
  #[serial]
  fn zero_parallelism_rejected() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(CONFIG_FILENAME), r#"{ "parallelism": 0 }"#).unwrap();
    temp_env::with_vars(NO_ENV, || {
      let err = EngineConfig::load(temp.path()).unwrap_err();
      assert!(matches!(err, ConfigError::InvalidValue { .. }));
    });
  }

  #[test]
  #[serial]
  fn unknown_config_key_is_a_parse_error() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(CONFIG_FILENAME), r#"{ "jobs": 3 }"#).unwrap();
    temp_env::with_vars(NO_ENV, || {
      assert!(matches!(
        EngineConfig::load(temp.path()).unwrap_err(),
        ConfigError::Parse { .. }
      ));
    });
  }
}
