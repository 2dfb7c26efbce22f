//! Token model
//!
//! A `Token` is the result of one successful device flow or refresh: the
//! bearer credential presented to the database, the refresh material, the
//! expiry taken from the bearer token's own `exp` claim, and the connection
//! identity and option snapshot it was issued for.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::config::TokenCacheMode;
use crate::error::{Error, Result};
use crate::options::ConnectOptions;

/// Immutable bearer token record.
///
/// Serializes to the JSON record stored in the durable token cache. The
/// option snapshot never contains secret keys.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    auth_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    /// Unix timestamp in seconds
    expires_at: u64,
    connection: String,
    options: ConnectOptions,
}

impl Token {
    /// Build a token, stripping secret keys from the option snapshot.
    pub fn new(
        auth_token: String,
        refresh_token: Option<String>,
        expires_at: u64,
        connection: String,
        options: &ConnectOptions,
    ) -> Self {
        Self {
            auth_token,
            refresh_token,
            expires_at,
            connection,
            options: options.without_secrets(),
        }
    }

    /// Build a token from a bearer JWT, reading the expiry from its `exp` claim.
    pub fn from_bearer(
        auth_token: String,
        refresh_token: Option<String>,
        connection: String,
        options: &ConnectOptions,
    ) -> Result<Self> {
        let expires_at = jwt_expiry(&auth_token)?;
        Ok(Self::new(
            auth_token,
            refresh_token,
            expires_at,
            connection,
            options,
        ))
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Normalized connection identity (see `target::connection_identity`)
    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Option snapshot, secrets excluded
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        self.expires_at <= now_secs
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_secs())
    }

    /// Cache mode recorded in the snapshot. An unreadable value counts as
    /// memory so the token is never written to disk by accident.
    pub fn cache_mode(&self) -> TokenCacheMode {
        TokenCacheMode::from_options(&self.options).unwrap_or_default()
    }

    /// Whether this token was issued for `connection` and an option set with
    /// the same identity view.
    pub fn matches(&self, connection: &str, options: &ConnectOptions) -> bool {
        self.connection == connection && self.options.identity_view() == options.identity_view()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("auth_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("connection", &self.connection)
            .field("options", &self.options)
            .finish()
    }
}

/// Read the `exp` claim (epoch seconds) from a JWT without verifying it.
///
/// The signature is the database's concern; here the claim only drives
/// cache expiry.
pub fn jwt_expiry(jwt: &str) -> Result<u64> {
    let segments: Vec<&str> = jwt.split('.').collect();
    if segments.len() < 3 {
        return Err(Error::TokenFormat(format!(
            "expected 3 dot-separated segments, found {}",
            segments.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| Error::TokenFormat(format!("payload is not base64url: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&payload)
        .map_err(|e| Error::TokenFormat(format!("payload is not JSON: {e}")))?;

    let exp = claims
        .get("exp")
        .ok_or_else(|| Error::TokenFormat("payload has no exp claim".into()))?;
    exp.as_u64()
        .or_else(|| exp.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .ok_or_else(|| Error::TokenFormat(format!("exp claim is not a timestamp: {exp}")))
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
