//! Persistent per-target build metadata.
//!
//! Metadata is a string map keyed by (fully-qualified target, key). It records
//! what was last built for a target so later builds can skip it.

mod filesystem;
mod sqlite;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub use filesystem::FilesystemBuildInfoStore;
pub use sqlite::SqliteBuildInfoStore;

use crate::config::{EngineConfig, MetadataStorage};
use crate::consts::{METADATA_DB_FILENAME, METADATA_DIR};
use crate::target::BuildTarget;

/// Well-known metadata keys.
pub mod keys {
  pub const RULE_KEY: &str = "RULE_KEY";
  pub const TARGET: &str = "TARGET";
  pub const BUILD_ID: &str = "BUILD_ID";
  pub const OUTPUT_SIZE: &str = "OUTPUT_SIZE";
  pub const OUTPUT_HASH: &str = "OUTPUT_HASH";
}

#[derive(Debug, Error)]
pub enum BuildInfoError {
  #[error("metadata database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("metadata I/O error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid metadata key '{key}': {reason}")]
  InvalidKey { key: String, reason: &'static str },
}

pub trait BuildInfoStore: Send + Sync {
  fn read_metadata(&self, target: &BuildTarget, key: &str) -> Result<Option<String>, BuildInfoError>;

  fn read_all_metadata(&self, target: &BuildTarget) -> Result<BTreeMap<String, String>, BuildInfoError>;

  /// Write every entry of `metadata` for `target` as one batch.
  fn update_metadata(&self, target: &BuildTarget, metadata: &BTreeMap<String, String>) -> Result<(), BuildInfoError>;

  /// Remove every key stored for `target`.
  fn delete_metadata(&self, target: &BuildTarget) -> Result<(), BuildInfoError>;
}

/// Open the store `config` selects, under `<out>/metadata`.
pub fn open_build_info_store(config: &EngineConfig) -> Result<Arc<dyn BuildInfoStore>, BuildInfoError> {
  let dir = config.out_root().join(METADATA_DIR);
  debug!(storage = %config.metadata_storage, dir = %dir.display(), "opening build info store");
  Ok(match config.metadata_storage {
    MetadataStorage::Sqlite => Arc::new(SqliteBuildInfoStore::open(
      &dir.join(METADATA_DB_FILENAME),
      config.busy_timeout,
    )?),
    MetadataStorage::Filesystem => Arc::new(FilesystemBuildInfoStore::new(dir)),
  })
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  fn t(s: &str) -> BuildTarget {
    s.parse().unwrap()
  }

  fn exercise(store: &dyn BuildInfoStore) {
    let target = t("//app:bin#macosx-arm64");
    let other = t("//app:other");
    let batch = BTreeMap::from([
      (keys::RULE_KEY.to_string(), "abc".to_string()),
      (keys::TARGET.to_string(), target.to_string()),
    ]);
    store.update_metadata(&target, &batch).unwrap();
    store
      .update_metadata(&other, &BTreeMap::from([(keys::RULE_KEY.to_string(), "zzz".to_string())]))
      .unwrap();

    assert_eq!(store.read_metadata(&target, keys::RULE_KEY).unwrap().as_deref(), Some("abc"));
    assert_eq!(store.read_all_metadata(&target).unwrap(), batch);

    store.delete_metadata(&target).unwrap();
    assert_eq!(store.read_metadata(&target, keys::RULE_KEY).unwrap(), None);
    assert_eq!(store.read_metadata(&target, keys::TARGET).unwrap(), None);
    assert_eq!(store.read_metadata(&other, keys::RULE_KEY).unwrap().as_deref(), Some("zzz"));
  }

  #[test]
  fn both_backends_agree() {
    for storage in [MetadataStorage::Sqlite, MetadataStorage::Filesystem] {
      let temp = TempDir::new().unwrap();
      let mut config = EngineConfig::defaults(temp.path());
      config.metadata_storage = storage;
      let store = open_build_info_store(&config).unwrap();
      exercise(store.as_ref());
    }
  }
}
