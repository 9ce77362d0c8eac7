use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the job stores, the lockers and backend selection.
///
/// Losing a lock race or a lease is not an error: those come back as
/// `Ok(false)` from the locker.
#[derive(Debug, Error)]
pub enum Error {
    /// Unusable database configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The backend could not complete an I/O call. Callers own the retry policy.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("job '{0}' already exists")]
    JobAlreadyExists(String),

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("job payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StorageUnavailable(Box::new(err))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::StorageUnavailable(Box::new(err))
    }
}
