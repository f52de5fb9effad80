use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Inconsistent cache entry: {0}")]
    Inconsistent(String),
}

impl Error {
    /// Conflicts and validation failures are the caller's to report; everything
    /// else is an internal failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_) | Error::Conflict(_) | Error::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
