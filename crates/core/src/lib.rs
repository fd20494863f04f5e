pub mod batch;
pub mod config;
pub mod file;
pub mod metrics;
pub mod migrate;
pub mod model;
pub mod postgres;
pub mod repository;
pub mod sqlite;
pub mod testing;

pub use batch::Batch;
pub use config::{
    load_config, load_config_from_str, open_repository, validate_config, Config, ConfigError,
    SanitizedConfig, StorageBackend,
};
pub use file::JsonFileRepository;
pub use migrate::{migrate_repository, MigrationReport};
pub use model::{
    ArtifactKind, Episode, EpisodeUpdate, Failure, FailureKind, Podcast, Stage, TranscriptLink,
    User,
};
pub use postgres::{PoolSettings, PostgresRepository};
pub use repository::{
    EpisodePage, EpisodeQuery, EpisodeRepository, EpisodeSort, EpisodeWithPodcast,
    PodcastRepository, Repository, RepositoryError, SortOrder, StateCounts,
};
pub use sqlite::SqliteRepository;
