use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, trace};

use super::{BuildInfoError, BuildInfoStore};
use crate::target::BuildTarget;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS metadata (
  target TEXT NOT NULL,
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  PRIMARY KEY (target, key)
) WITHOUT ROWID";
const SELECT_ONE: &str = "SELECT value FROM metadata WHERE target = ?1 AND key = ?2";
const SELECT_ALL: &str = "SELECT key, value FROM metadata WHERE target = ?1";
const UPSERT: &str = "INSERT OR REPLACE INTO metadata (target, key, value) VALUES (?1, ?2, ?3)";
const DELETE: &str = "DELETE FROM metadata WHERE target = ?1";

/// Metadata in a single SQLite table.
///
/// The journal runs in WAL mode with `synchronous = OFF`: a crash may lose the
/// latest writes, which only costs a rebuild. Lock contention from other
/// processes is retried by SQLite for up to the busy timeout.
#[derive(Clone)]
pub struct SqliteBuildInfoStore {
  conn: Arc<Mutex<Connection>>,
  path: PathBuf,
}

impl SqliteBuildInfoStore {
  pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, BuildInfoError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| BuildInfoError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "OFF")?;
    conn.execute(CREATE_TABLE, [])?;
    debug!(path = %path.display(), journal_mode = %mode, "opened metadata database");

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      path: path.to_path_buf(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl BuildInfoStore for SqliteBuildInfoStore {
  fn read_metadata(&self, target: &BuildTarget, key: &str) -> Result<Option<String>, BuildInfoError> {
    trace!(sql = SELECT_ONE, target = %target, key, "query");
    let conn = self.conn.lock();
    let mut stmt = conn.prepare_cached(SELECT_ONE)?;
    let value = stmt
      .query_row(params![target.to_string(), key], |row| row.get(0))
      .optional()?;
    Ok(value)
  }

  fn read_all_metadata(&self, target: &BuildTarget) -> Result<BTreeMap<String, String>, BuildInfoError> {
    trace!(sql = SELECT_ALL, target = %target, "query");
    let conn = self.conn.lock();
    let mut stmt = conn.prepare_cached(SELECT_ALL)?;
    let rows = stmt.query_map(params![target.to_string()], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut metadata = BTreeMap::new();
    for row in rows {
      let (key, value) = row?;
      metadata.insert(key, value);
    }
    Ok(metadata)
  }

  fn update_metadata(&self, target: &BuildTarget, metadata: &BTreeMap<String, String>) -> Result<(), BuildInfoError> {
    trace!(sql = UPSERT, target = %target, entries = metadata.len(), "batch");
    let name = target.to_string();
    let mut conn = self.conn.lock();
    let tx = conn.transaction()?;
    {
      let mut stmt = tx.prepare_cached(UPSERT)?;
      for (key, value) in metadata {
        stmt.execute(params![name, key, value])?;
      }
    }
    tx.commit()?;
    Ok(())
  }

  fn delete_metadata(&self, target: &BuildTarget) -> Result<(), BuildInfoError> {
    trace!(sql = DELETE, target = %target, "execute");
    let conn = self.conn.lock();
    conn.prepare_cached(DELETE)?.execute(params![target.to_string()])?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use tempfile::TempDir;

  use super::*;
  use crate::build_info::keys;

  fn open(temp: &TempDir) -> SqliteBuildInfoStore {
    SqliteBuildInfoStore::open(&temp.path().join("metadata").join("metadata.db"), Duration::from_secs(5)).unwrap()
  }

  #[test]
  fn survives_reopen() {
    let temp = TempDir::new().unwrap();
    let target: BuildTarget = "cell//lib:z#shared".parse().unwrap();
    {
      let store = open(&temp);
      store
        .update_metadata(&target, &BTreeMap::from([(keys::RULE_KEY.to_string(), "k1".to_string())]))
        .unwrap();
    }
    let store = open(&temp);
    assert_eq!(store.read_metadata(&target, keys::RULE_KEY).unwrap().as_deref(), Some("k1"));
  }

  #[test]
  fn update_replaces_existing_values() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);
    let target: BuildTarget = "//a:a".parse().unwrap();
    for value in ["first", "second"] {
      store
        .update_metadata(&target, &BTreeMap::from([(keys::RULE_KEY.to_string(), value.to_string())]))
        .unwrap();
    }
    assert_eq!(store.read_all_metadata(&target).unwrap().len(), 1);
    assert_eq!(store.read_metadata(&target, keys::RULE_KEY).unwrap().as_deref(), Some("second"));
  }

  #[test]
  fn concurrent_writers_on_distinct_keys() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);
    let target: BuildTarget = "//a:a".parse().unwrap();

    let handles: Vec<_> = (0..8)
      .map(|i| {
        let store = store.clone();
        let target = target.clone();
        thread::spawn(move || {
          store
            .update_metadata(&target, &BTreeMap::from([(format!("key{}", i), i.to_string())]))
            .unwrap();
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(store.read_all_metadata(&target).unwrap().len(), 8);
  }
}
