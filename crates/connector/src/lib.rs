//! Connection-factory boundary
//!
//! Sits between a host's connect call and whatever opens the physical
//! database connection. When a connection's options carry an issuer and a
//! client id, `OAuthConnector` obtains a token through the shared
//! `TokenService` and hands the inner factory an option set whose user is
//! `jwt:<token>` and whose password is empty. Everything else passes through
//! untouched.

pub mod passthrough;

pub use passthrough::{Passthrough, ResolvedConnection};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use device_auth::{Configuration, ConnectOptions, Token};
use token_cache::TokenService;
use tracing::debug;

/// Prefix marking the user name as a bearer token
pub const JWT_USER_PREFIX: &str = "jwt:";

/// URL schemes this connector serves, with or without a `jdbc:` prefix.
const SCHEMES: &[&str] = &["postgres://", "postgresql://", "yb://"];

/// Errors from connecting through the OAuth boundary.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("authentication failed: {0}")]
    Auth(#[from] token_cache::Error),

    #[error("failed to obtain OAuth2 token")]
    NoToken,

    #[error("connection failed: {0}")]
    Connect(String),
}

/// Result alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectError>;

/// Opens a connection for a target and option set.
///
/// Uses `Pin<Box<dyn Future>>` return types so factories can be boxed.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Send;

    fn connect<'a>(
        &'a self,
        target: &'a str,
        options: &'a ConnectOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Connection>> + Send + 'a>>;
}

/// Whether `target` names a server this connector can authorize for.
pub fn accepts_target(target: &str) -> bool {
    let lower = target.trim().to_ascii_lowercase();
    let url = lower.strip_prefix("jdbc:").unwrap_or(&lower);
    SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

/// Copy of `options` carrying `token` as the credential.
pub fn authorized_options(token: &Token, options: &ConnectOptions) -> ConnectOptions {
    let mut authorized = options.clone();
    authorized.insert("user", format!("{JWT_USER_PREFIX}{}", token.auth_token()));
    authorized.insert("password", "");
    authorized
}

/// Resolve the option set to connect with: unchanged when OAuth2 is not
/// configured, otherwise with a token substituted for the credentials.
pub async fn prepare_options(
    tokens: &TokenService,
    target: &str,
    options: &ConnectOptions,
) -> Result<ConnectOptions> {
    if !Configuration::is_oauth_enabled(options) {
        debug!("no OAuth2 issuer configured, passing options through");
        return Ok(options.clone());
    }

    let config = Configuration::from_options(options).map_err(token_cache::Error::from)?;
    let token = tokens
        .get_token(&config, target, options)
        .await?
        .ok_or(ConnectError::NoToken)?;
    debug!(expires_at = token.expires_at(), "substituting bearer token credentials");
    Ok(authorized_options(&token, options))
}

/// Factory decorator that authorizes connections before delegating.
pub struct OAuthConnector<F> {
    inner: F,
    tokens: Arc<TokenService>,
}

impl<F: ConnectionFactory> OAuthConnector<F> {
    pub fn new(inner: F, tokens: Arc<TokenService>) -> Self {
        Self { inner, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }
}

impl<F: ConnectionFactory> ConnectionFactory for OAuthConnector<F> {
    type Connection = F::Connection;

    fn connect<'a>(
        &'a self,
        target: &'a str,
        options: &'a ConnectOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Connection>> + Send + 'a>> {
        Box::pin(async move {
            let options = prepare_options(&self.tokens, target, options).await?;
            self.inner.connect(target, &options).await
        })
    }
}
