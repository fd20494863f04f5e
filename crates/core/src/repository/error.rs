use thiserror::Error;

/// Error type for repository operations.
///
/// Lookups never fail with "not found"; they return `None` or an empty list.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// An episode was handed to a write without its owning podcast id.
    /// Raised before any I/O happens.
    #[error("episode '{external_id}' has no podcast id")]
    MissingPodcastId { external_id: String },

    /// A write targeted a podcast that does not exist.
    #[error("podcast not found: {0}")]
    PodcastNotFound(String),

    /// A uniqueness or foreign key constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Engine-level failure: lock contention, pool exhaustion, bad SQL, corrupt rows.
    #[error("database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(e: serde_json::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
