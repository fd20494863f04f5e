use super::{
    types::{Config, StorageBackend},
    ConfigError,
};

/// Validate configuration
/// Currently validates:
/// - The selected backend has its settings (postgres needs a url)
/// - File and SQLite paths are not empty
/// - Pool size is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::File => {
            if storage.file.path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "storage.file.path cannot be empty".to_string(),
                ));
            }
        }
        StorageBackend::Sqlite => {
            if storage.sqlite.path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "storage.sqlite.path cannot be empty".to_string(),
                ));
            }
        }
        StorageBackend::Postgres => {
            let postgres = storage.postgres.as_ref().ok_or_else(|| {
                ConfigError::ValidationError(
                    "storage.postgres section is required when backend = \"postgres\"".to_string(),
                )
            })?;
            if postgres.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "storage.postgres.url cannot be empty".to_string(),
                ));
            }
            if postgres.max_connections == 0 {
                return Err(ConfigError::ValidationError(
                    "storage.postgres.max_connections cannot be 0".to_string(),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresConfig;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_empty_sqlite_path_fails() {
        let mut config = Config::default();
        config.storage.sqlite.path = PathBuf::new();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_postgres_requires_section() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(validate_config(&config).is_err());

        config.storage.postgres = Some(PostgresConfig {
            url: "postgres://localhost/podstore".to_string(),
            max_connections: 0,
            connect_timeout_secs: 30,
        });
        assert!(validate_config(&config).is_err());

        if let Some(postgres) = config.storage.postgres.as_mut() {
            postgres.max_connections = 2;
        }
        assert!(validate_config(&config).is_ok());
    }
}
