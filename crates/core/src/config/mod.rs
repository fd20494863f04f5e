mod loader;
mod types;
mod validate;

pub use loader::{load_config, load_config_from_str};
pub use types::*;
pub use validate::validate_config;

use thiserror::Error;
use tracing::info;

use crate::file::JsonFileRepository;
use crate::postgres::{PoolSettings, PostgresRepository};
use crate::repository::{Repository, RepositoryError};
use crate::sqlite::SqliteRepository;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Open the backend selected by `config.storage.backend`, creating or
/// migrating its schema as needed.
pub fn open_repository(config: &Config) -> Result<Box<dyn Repository>, RepositoryError> {
    let storage = &config.storage;
    let repo: Box<dyn Repository> = match storage.backend {
        StorageBackend::File => Box::new(JsonFileRepository::new(&storage.file.path)),
        StorageBackend::Sqlite => Box::new(SqliteRepository::with_busy_timeout(
            &storage.sqlite.path,
            storage.sqlite.busy_timeout(),
        )?),
        StorageBackend::Postgres => {
            let postgres = storage.postgres.as_ref().ok_or_else(|| {
                RepositoryError::Database("storage.postgres is not configured".to_string())
            })?;
            let settings = PoolSettings {
                max_size: postgres.max_connections,
                connection_timeout: postgres.connect_timeout(),
            };
            Box::new(PostgresRepository::new(&postgres.url, settings)?)
        }
    };
    info!(backend = repo.backend_name(), "Repository opened");
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::PodcastRepository;
    use tempfile::TempDir;

    #[test]
    fn test_open_repository_file_backend() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.backend = StorageBackend::File;
        config.storage.file.path = temp_dir.path().join("podcasts.json");

        let repo = open_repository(&config).unwrap();
        assert_eq!(repo.backend_name(), "file");
        assert!(repo.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_open_repository_sqlite_backend() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.sqlite.path = temp_dir.path().join("podstore.db");

        let repo = open_repository(&config).unwrap();
        assert_eq!(repo.backend_name(), "sqlite");
        assert!(config.storage.sqlite.path.exists());
    }

    #[test]
    fn test_open_repository_postgres_without_section_fails() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(open_repository(&config).is_err());
    }
}
