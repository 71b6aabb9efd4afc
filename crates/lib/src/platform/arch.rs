use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// CPU architectures a platform slice can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
  Armv7,
  Arm64,
  I386,
  X86_64,
}

impl Arch {
  /// Returns the identifier used in platform flavors and by `lipo -arch`.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Armv7 => "armv7",
      Self::Arm64 => "arm64",
      Self::I386 => "i386",
      Self::X86_64 => "x86_64",
    }
  }

  pub fn all() -> [Arch; 4] {
    [Self::Armv7, Self::Arm64, Self::I386, Self::X86_64]
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Arch {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::all()
      .into_iter()
      .find(|arch| arch.as_str() == s)
      .ok_or_else(|| format!("unknown architecture '{}'", s))
  }
}
