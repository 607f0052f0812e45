//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the panel engine, providing a single source of truth for constant values.

/// Persisted wire format constants
pub mod wire {
    /// Schema version written by `to_json`
    pub const SCHEMA_VERSION: u64 = 1;

    /// Separator between display names in a tree path
    pub const PATH_SEPARATOR: char = '|';

    /// Node type tag used for user-created groups
    pub const GROUP_TYPE: &str = "group";

    /// Top-level document keys
    pub const VERSION_KEY: &str = "version";
    pub const NODES_KEY: &str = "nodes";
}

/// Rig-specific defaults
pub mod rig {
    /// Node kinds that anchor a rig and are matched by type during reconcile
    pub const DEFAULT_ANCHOR_TYPES: &[&str] = &["zSolverTransform", "zSolver"];
}

/// Naming constants for user-created items
pub mod naming {
    /// Base name used when grouping without an explicit name
    pub const DEFAULT_GROUP_NAME: &str = "group";
}

/// Config file location constants
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "rig-scene-panel";

    /// Config file name
    pub const FILENAME: &str = "config.json";
}

/// Logging constants
pub mod logging {
    /// Environment variable read by the binary for the max log level
    pub const LEVEL_ENV: &str = "LOG_LEVEL";

    /// Accepted log level names
    pub const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

    pub const DEFAULT_LEVEL: &str = "info";
}
