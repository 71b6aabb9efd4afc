//! SHA-256 helpers for rule keys and output fingerprints.
//!
//! - `Fingerprint`: a full 64-character lowercase hex digest
//! - `Hashable`: fingerprint any serializable value through its JSON form
//! - `hash_file()` / `hash_bytes()`: content fingerprints

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub type HashError = serde_json::Error;

pub trait Hashable: Serialize {
  /// Fingerprint of the value's JSON serialization.
  fn fingerprint(&self) -> Result<Fingerprint, HashError> {
    let serialized = serde_json::to_vec(self)?;
    Ok(hash_bytes(&serialized))
  }
}

/// Fingerprint of a file's contents, read in chunks.
pub fn hash_file(path: &Path) -> std::io::Result<Fingerprint> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(Fingerprint(hex::encode(hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> Fingerprint {
  Fingerprint(hex::encode(Sha256::digest(data)))
}
