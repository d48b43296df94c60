//! Store configuration.
//!
//! Aggregates storage, index and key codec settings into a single Config
//! struct that can be loaded from YAML files or environment variables.

mod storage;

use serde::Deserialize;

pub use crate::codec::KeyCodecConfig;
pub use storage::{PostgresConfig, SqliteConfig, StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "kvdex.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "KVDEX_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "KVDEX";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "KVDEX_LOG";

/// Secondary index settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Prefix of every index table and index object name.
    pub table_prefix: String,
    /// Row bound of a unique-index lookup.
    pub unique_lookup_limit: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            unique_lookup_limit: 10,
        }
    }
}

impl IndexConfig {
    /// Reject limits the SQL drivers cannot bind.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.unique_lookup_limit == 0 || self.unique_lookup_limit > i64::MAX as u64 {
            return Err(::config::ConfigError::Message(format!(
                "index.unique_lookup_limit must be between 1 and {}, got {}",
                i64::MAX,
                self.unique_lookup_limit
            ))
            .into());
        }
        Ok(())
    }
}

/// Main store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Secondary index configuration.
    pub index: IndexConfig,
    /// Opaque key codec configuration.
    pub key_codec: KeyCodecConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `kvdex.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> crate::error::Result<Self> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.index.validate()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.storage_type, StorageType::Sqlite);
        assert_eq!(config.index.table_prefix, "");
        assert_eq!(config.index.unique_lookup_limit, 10);
        assert_eq!(config.key_codec.password, "changeme");
        assert_eq!(config.key_codec.salt, "asalt");
        assert_eq!(config.key_codec.iv, "0123456789ABCDEF");
        assert_eq!(config.key_codec.iterations, 1024);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "storage:\n  type: postgres\n  postgres:\n    uri: postgres://db/kv\nindex:\n  table_prefix: app\nkey_codec:\n  iterations: 16"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.storage.storage_type, StorageType::Postgres);
        assert_eq!(config.storage.postgres.uri, "postgres://db/kv");
        assert_eq!(config.index.table_prefix, "app");
        assert_eq!(config.index.unique_lookup_limit, 10);
        assert_eq!(config.key_codec.iterations, 16);
        assert_eq!(config.key_codec.password, "changeme");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        std::env::set_var("KVDEX__INDEX__UNIQUE_LOOKUP_LIMIT", "3");
        std::env::set_var("KVDEX__KEY_CODEC__PASSWORD", "s3cret");

        let config = Config::load(None);

        std::env::remove_var("KVDEX__INDEX__UNIQUE_LOOKUP_LIMIT");
        std::env::remove_var("KVDEX__KEY_CODEC__PASSWORD");

        let config = config.unwrap();
        assert_eq!(config.index.unique_lookup_limit, 3);
        assert_eq!(config.key_codec.password, "s3cret");
    }

    #[test]
    #[serial]
    fn test_unbindable_lookup_limit_rejected() {
        for limit in ["0", "18446744073709551615"] {
            std::env::set_var("KVDEX__INDEX__UNIQUE_LOOKUP_LIMIT", limit);
            let config = Config::load(None);
            std::env::remove_var("KVDEX__INDEX__UNIQUE_LOOKUP_LIMIT");

            let err = config.unwrap_err();
            assert!(matches!(err, crate::error::StoreError::Config(_)), "{err}");
        }

        let widest = IndexConfig {
            unique_lookup_limit: i64::MAX as u64,
            ..IndexConfig::default()
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_fails() {
        let err = Config::load(Some("/nonexistent/kvdex.yaml")).unwrap_err();
        assert!(matches!(err, crate::error::StoreError::Config(_)));
    }
}
