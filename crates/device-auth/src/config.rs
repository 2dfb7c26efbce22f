//! Per-attempt OAuth2 configuration
//!
//! Built from a connection's option set every time a token is requested.
//! Enum-valued options are validated here so a typo fails before any network
//! call; required values (issuer, client id) are checked by the authorizer.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use common::Secret;
use tracing::warn;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::options::ConnectOptions;

/// Which bearer token from the token response is presented to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenType {
    #[default]
    IdToken,
    AccessToken,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::IdToken => "id-token",
            TokenType::AccessToken => "access-token",
        }
    }

    /// Field name in the token endpoint response
    pub fn response_field(&self) -> &'static str {
        match self {
            TokenType::IdToken => "id_token",
            TokenType::AccessToken => "access_token",
        }
    }
}

impl FromStr for TokenType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("id-token") {
            Ok(TokenType::IdToken)
        } else if s.eq_ignore_ascii_case("access-token") {
            Ok(TokenType::AccessToken)
        } else {
            Err(Error::Config(format!(
                "invalid {OPT_TOKEN_TYPE}: {s} (expected id-token or access-token)"
            )))
        }
    }
}

/// Where tokens are cached between connection attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenCacheMode {
    #[default]
    Memory,
    File,
    Disabled,
}

impl TokenCacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenCacheMode::Memory => "memory",
            TokenCacheMode::File => "file",
            TokenCacheMode::Disabled => "disabled",
        }
    }

    /// Resolve the mode recorded in an option set, defaulting to memory.
    pub fn from_options(options: &ConnectOptions) -> Result<Self> {
        options
            .get(OPT_TOKEN_CACHE)
            .map(str::parse)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

impl FromStr for TokenCacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(TokenCacheMode::Memory),
            "file" => Ok(TokenCacheMode::File),
            "disabled" => Ok(TokenCacheMode::Disabled),
            _ => Err(Error::Config(format!(
                "invalid {OPT_TOKEN_CACHE}: {s} (expected memory, file or disabled)"
            ))),
        }
    }
}

/// TLS trust applied to every request made to the issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustPolicy {
    #[default]
    System,
    /// Trust only the CA certificate in this PEM file
    CustomCa(PathBuf),
    /// Accept any certificate. Diagnostic use only.
    TrustAll,
}

impl TrustPolicy {
    /// Disable-trust takes precedence over a CA path when both are set.
    fn resolve(cacert_path: Option<&str>, disable_trust: bool) -> Self {
        match (cacert_path, disable_trust) {
            (Some(path), true) => {
                warn!(
                    cacert_path = path,
                    "both {OPT_CACERT_PATH} and {OPT_DISABLE_TRUST} set, trust is disabled"
                );
                TrustPolicy::TrustAll
            }
            (None, true) => TrustPolicy::TrustAll,
            (Some(path), false) => TrustPolicy::CustomCa(PathBuf::from(path)),
            (None, false) => TrustPolicy::System,
        }
    }

    /// Build an HTTP client honouring this policy.
    pub fn build_client(&self, timeout: Duration) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        match self {
            TrustPolicy::System => {}
            TrustPolicy::CustomCa(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    Error::Config(format!("reading CA certificate {}: {e}", path.display()))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    Error::Config(format!("parsing CA certificate {}: {e}", path.display()))
                })?;
                // The file is the only trust anchor, built-in roots are off
                builder = builder.tls_certs_only([cert]);
            }
            TrustPolicy::TrustAll => {
                warn!("TLS certificate verification disabled for issuer requests");
                builder = builder.tls_danger_accept_invalid_certs(true);
            }
        }
        builder
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))
    }
}

/// Resolved OAuth2 parameters for one token attempt.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
    pub login_hint: Option<String>,
    pub scopes: String,
    pub token_type: TokenType,
    pub token_cache: TokenCacheMode,
    pub no_browser: bool,
    pub quiet: bool,
    pub trust: TrustPolicy,
    pub discovery_timeout: Duration,
    pub request_timeout: Duration,
    pub poll_buffer: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            issuer: None,
            client_id: None,
            client_secret: None,
            login_hint: None,
            scopes: DEFAULT_SCOPES.to_string(),
            token_type: TokenType::default(),
            token_cache: TokenCacheMode::default(),
            no_browser: false,
            quiet: false,
            trust: TrustPolicy::default(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_buffer: DEFAULT_POLL_BUFFER,
        }
    }
}

impl Configuration {
    /// Resolve the configuration carried by a connection's option set.
    pub fn from_options(options: &ConnectOptions) -> Result<Self> {
        let token_type = options
            .get(OPT_TOKEN_TYPE)
            .map(TokenType::from_str)
            .transpose()?
            .unwrap_or_default();
        let token_cache = TokenCacheMode::from_options(options)?;

        Ok(Self {
            issuer: options
                .get_non_empty(OPT_ISSUER)
                .map(|s| s.trim_end_matches('/').to_string()),
            client_id: options.get_non_empty(OPT_CLIENT_ID).map(String::from),
            client_secret: options
                .get(OPT_CLIENT_SECRET)
                .map(|s| Secret::new(s.to_string())),
            login_hint: options.get_non_empty(OPT_LOGIN_HINT).map(String::from),
            scopes: options
                .get_non_empty(OPT_SCOPES)
                .unwrap_or(DEFAULT_SCOPES)
                .to_string(),
            token_type,
            token_cache,
            no_browser: parse_bool(options.get(OPT_NO_BROWSER)),
            quiet: parse_bool(options.get(OPT_QUIET)),
            trust: TrustPolicy::resolve(
                options.get_non_empty(OPT_CACERT_PATH),
                parse_bool(options.get(OPT_DISABLE_TRUST)),
            ),
            ..Self::default()
        })
    }

    /// Whether the option set carries the two parameters that switch a
    /// connection over to OAuth2.
    pub fn is_oauth_enabled(options: &ConnectOptions) -> bool {
        options.get_non_empty(OPT_ISSUER).is_some()
            && options.get_non_empty(OPT_CLIENT_ID).is_some()
    }
}

/// `true` in any letter case is true, everything else is false.
fn parse_bool(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}
