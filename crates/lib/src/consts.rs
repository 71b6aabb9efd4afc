/// Default output directory, relative to the project root.
pub const DEFAULT_OUT_DIR: &str = "buckle-out";

/// Subdirectory of the output directory holding generated rule outputs.
pub const GEN_DIR: &str = "gen";

/// Subdirectory of the output directory holding build metadata.
pub const METADATA_DIR: &str = "metadata";

/// Optional project configuration file name.
pub const CONFIG_FILENAME: &str = "buckle.json";

/// SQLite metadata database file, inside the metadata directory.
pub const METADATA_DB_FILENAME: &str = "metadata.db";
