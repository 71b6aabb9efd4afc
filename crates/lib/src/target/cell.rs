use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of a repository cell, as written before `//` in a target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellName(String);

impl CellName {
  pub fn new(name: impl Into<String>) -> Result<Self, String> {
    let name = name.into();
    if name.is_empty() {
      return Err("cell name must not be empty".to_string());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
      return Err(format!("invalid cell name '{}'", name));
    }
    if name == "." || name == ".." {
      return Err(format!("invalid cell name '{}'", name));
    }
    Ok(Self(name))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CellName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Maps cell names to their root directories.
pub trait CellPathResolver: Send + Sync + fmt::Debug {
  /// Root directory of the named cell; `None` names the root cell.
  fn cell_path(&self, cell: Option<&CellName>) -> Option<PathBuf>;

  /// The cell whose root is `path`, if any. The root cell maps to `None`.
  fn canonical_cell_name(&self, path: &Path) -> Option<Option<CellName>>;
}

/// A resolver backed by a fixed map of named cells around a root cell.
#[derive(Debug, Clone)]
pub struct DefaultCellPathResolver {
  root: PathBuf,
  cells: BTreeMap<CellName, PathBuf>,
}

impl DefaultCellPathResolver {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      cells: BTreeMap::new(),
    }
  }

  pub fn with_cell(mut self, name: CellName, path: impl Into<PathBuf>) -> Self {
    self.cells.insert(name, path.into());
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

impl CellPathResolver for DefaultCellPathResolver {
  fn cell_path(&self, cell: Option<&CellName>) -> Option<PathBuf> {
    match cell {
      None => Some(self.root.clone()),
      Some(name) => self.cells.get(name).cloned(),
    }
  }

  fn canonical_cell_name(&self, path: &Path) -> Option<Option<CellName>> {
    if path == self.root {
      return Some(None);
    }
    self
      .cells
      .iter()
      .find(|(_, cell_path)| cell_path.as_path() == path)
      .map(|(name, _)| Some(name.clone()))
  }
}
