//! Target identity: flavors, build targets, and cells.

mod build_target;
mod cell;
pub mod flavor;

pub use build_target::{BuildTarget, BuildTargetError, BuildTargetParser, UnflavoredBuildTarget};
pub use cell::{CellName, CellPathResolver, DefaultCellPathResolver};
pub use flavor::{Flavor, FlavorError};
