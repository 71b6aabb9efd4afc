use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::trace;

use super::{BuildInfoError, BuildInfoStore};
use crate::target::BuildTarget;

/// Metadata as one file per key under `<root>/<target path>/`, where the target path
/// comes from [`BuildTarget::to_relative_path`]. Target directories never nest, so a
/// key file cannot sit where another target's directory belongs.
///
/// Writes go through a temp file in the same directory and are renamed into place.
/// Writers for the same target are serialized by a per-target lock.
pub struct FilesystemBuildInfoStore {
  root: PathBuf,
  locks: DashMap<BuildTarget, Arc<Mutex<()>>>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BuildInfoError + '_ {
  move |source| BuildInfoError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Keys become file names, so they are restricted to a safe charset.
fn validate_key(key: &str) -> Result<(), BuildInfoError> {
  let invalid = |reason| {
    Err(BuildInfoError::InvalidKey {
      key: key.to_string(),
      reason,
    })
  };
  if key.is_empty() {
    return invalid("key is empty");
  }
  if key.starts_with('.') {
    return invalid("key must not start with '.'");
  }
  if !key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
    return invalid("key may only contain letters, digits, '_', '-' and '.'");
  }
  Ok(())
}

impl FilesystemBuildInfoStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      locks: DashMap::new(),
    }
  }

  pub fn target_dir(&self, target: &BuildTarget) -> PathBuf {
    self.root.join(target.to_relative_path())
  }

  fn lock_for(&self, target: &BuildTarget) -> Arc<Mutex<()>> {
    self.locks.entry(target.clone()).or_default().clone()
  }

  fn write_atomic(dir: &Path, key: &str, value: &str) -> Result<(), BuildInfoError> {
    let path = dir.join(key);
    let mut temp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    temp.write_all(value.as_bytes()).map_err(io_error(temp.path()))?;
    temp.persist(&path).map_err(|e| BuildInfoError::Io { path, source: e.error })?;
    Ok(())
  }
}

impl BuildInfoStore for FilesystemBuildInfoStore {
  fn read_metadata(&self, target: &BuildTarget, key: &str) -> Result<Option<String>, BuildInfoError> {
    validate_key(key)?;
    let path = self.target_dir(target).join(key);
    trace!(path = %path.display(), "read metadata");
    match std::fs::read_to_string(&path) {
      Ok(value) => Ok(Some(value)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(io_error(&path)(e)),
    }
  }

  fn read_all_metadata(&self, target: &BuildTarget) -> Result<BTreeMap<String, String>, BuildInfoError> {
    let dir = self.target_dir(target);
    let entries = match std::fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
      Err(e) => return Err(io_error(&dir)(e)),
    };

    let mut metadata = BTreeMap::new();
    for entry in entries {
      let entry = entry.map_err(io_error(&dir))?;
      let Some(key) = entry.file_name().to_str().map(str::to_string) else {
        continue;
      };
      // Skip temp files.
      if validate_key(&key).is_err() || !entry.path().is_file() {
        continue;
      }
      let value = std::fs::read_to_string(entry.path()).map_err(io_error(&entry.path()))?;
      metadata.insert(key, value);
    }
    Ok(metadata)
  }

  fn update_metadata(&self, target: &BuildTarget, metadata: &BTreeMap<String, String>) -> Result<(), BuildInfoError> {
    for key in metadata.keys() {
      validate_key(key)?;
    }
    let dir = self.target_dir(target);
    let lock = self.lock_for(target);
    let _guard = lock.lock();

    std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    for (key, value) in metadata {
      Self::write_atomic(&dir, key, value)?;
    }
    trace!(dir = %dir.display(), entries = metadata.len(), "wrote metadata");
    Ok(())
  }

  fn delete_metadata(&self, target: &BuildTarget) -> Result<(), BuildInfoError> {
    let lock = self.lock_for(target);
    let _guard = lock.lock();

    let keys = self.read_all_metadata(target)?;
    let dir = self.target_dir(target);
    for key in keys.keys() {
      let path = dir.join(key);
      match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_error(&path)(e)),
      }
    }
    trace!(dir = %dir.display(), "deleted metadata");
    Ok(())
  }
}
