use std::path::PathBuf;

/// Resolved configuration for a storage root.
///
/// Mirrors the env-var driven configuration used throughout the examples
/// this crate is built from: sensible defaults, overridable per-process via
/// environment variables, never touched implicitly at runtime after
/// construction.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub storage_dir: PathBuf,
    pub enable_wal_mode: bool,
}

const ENV_STORAGE_DIR: &str = "APIFY_LOCAL_STORAGE_DIR";
const ENV_ENABLE_WAL_MODE: &str = "APIFY_LOCAL_STORAGE_ENABLE_WAL_MODE";

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./apify_storage"),
            enable_wal_mode: true,
        }
    }
}

impl StorageConfig {
    /// Build a configuration from the process environment, falling back to
    /// [`StorageConfig::default`] for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let storage_dir = std::env::var(ENV_STORAGE_DIR)
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_dir);

        let enable_wal_mode = std::env::var(ENV_ENABLE_WAL_MODE)
            .map(|v| !matches!(v.as_str(), "false" | "0"))
            .unwrap_or(defaults.enable_wal_mode);

        Self {
            storage_dir,
            enable_wal_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_relative_storage_dir() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.storage_dir, PathBuf::from("./apify_storage"));
        assert!(cfg.enable_wal_mode);
    }

    #[test]
    fn from_env_without_vars_matches_default() {
        std::env::remove_var(ENV_STORAGE_DIR);
        std::env::remove_var(ENV_ENABLE_WAL_MODE);
        let cfg = StorageConfig::from_env();
        assert_eq!(cfg.storage_dir, PathBuf::from("./apify_storage"));
        assert!(cfg.enable_wal_mode);
    }
}
