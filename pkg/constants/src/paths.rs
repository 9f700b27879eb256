//! Filesystem path constants.

/// Default config file path for the cleaner.
pub const DEFAULT_CONFIG: &str = "/etc/token-cleaner/config.yaml";

/// Default data directory for the state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/token-cleaner-data";
