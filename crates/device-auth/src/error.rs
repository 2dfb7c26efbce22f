//! Error types for device authorization and token operations

/// Errors from configuration, discovery, device flow and refresh.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The provider refused the grant. `error` and `error_description` are
    /// carried verbatim from the token endpoint response.
    #[error(
        "authorization failed at {endpoint} ({status}): error: {error}, description: {}",
        .description.as_deref().unwrap_or("none")
    )]
    Denied {
        endpoint: String,
        status: u16,
        error: String,
        description: Option<String>,
    },

    #[error("device authentication expired after {seconds}s without approval")]
    Expired { seconds: u64 },

    #[error("invalid token format: {0}")]
    TokenFormat(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("device code presentation failed: {0}")]
    Presenter(String),
}

/// Result alias for device-auth operations.
pub type Result<T> = std::result::Result<T, Error>;
