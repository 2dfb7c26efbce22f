//! Error types for token cache operations

/// Errors from token acquisition and cache persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] device_auth::Error),

    #[error("token cache I/O error: {0}")]
    Io(String),

    #[error("token cache parse error: {0}")]
    Parse(String),
}

/// Result alias for token cache operations.
pub type Result<T> = std::result::Result<T, Error>;
