//! Option keys, protocol constants and defaults
//!
//! The option keys are the names under which OAuth2 parameters travel inside a
//! connection's option set, next to ordinary driver options like `user` or
//! `sslmode`.

use std::time::Duration;

/// Issuer URL used for OIDC discovery (required)
pub const OPT_ISSUER: &str = "oauth2_issuer";

/// OAuth client id registered with the issuer (required)
pub const OPT_CLIENT_ID: &str = "oauth2_client_id";

/// Client secret for confidential clients
pub const OPT_CLIENT_SECRET: &str = "oauth2_client_secret";

/// `login_hint` forwarded to the device authorization endpoint
pub const OPT_LOGIN_HINT: &str = "oauth2_login_hint";

/// Space-separated scopes to request
pub const OPT_SCOPES: &str = "oauth2_scopes";

/// Which bearer token to present to the database: `id-token` or `access-token`
pub const OPT_TOKEN_TYPE: &str = "oauth2_token_type";

/// Token cache mode: `memory`, `file` or `disabled`
pub const OPT_TOKEN_CACHE: &str = "oauth2_token_cache";

/// Print the code on the console instead of opening a local browser page
pub const OPT_NO_BROWSER: &str = "oauth2_no_browser";

/// With `oauth2_no_browser`, print nothing at all (automation and tests)
pub const OPT_QUIET: &str = "oauth2_quiet";

/// PEM file holding a custom CA for the issuer's TLS certificate
pub const OPT_CACERT_PATH: &str = "oauth2_cacert_path";

/// Trust every issuer certificate. Diagnostic use only.
pub const OPT_DISABLE_TRUST: &str = "oauth2_ssl_disable_trust";

/// Scopes requested when `oauth2_scopes` is not set. `offline_access` asks
/// for a refresh token.
pub const DEFAULT_SCOPES: &str = "openid email profile offline_access";

/// Option keys that hold secrets. Matched case-insensitively; never hashed,
/// logged or persisted.
pub const SECRET_KEYS: &[&str] = &["password", OPT_CLIENT_SECRET];

/// Option keys naming the database. A session is per user and issuer, so
/// these never take part in the cache identity.
pub const DATABASE_KEYS: &[&str] = &["database", "databasename", "dbname"];

/// OIDC discovery document path, appended to the issuer URL
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// RFC 8628 grant type for device code polling
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Timeout for the discovery request
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for every other request (device code, each poll, refresh)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Added to the provider's polling interval so polls never arrive early
pub const DEFAULT_POLL_BUFFER: Duration = Duration::from_millis(100);

/// Interval increase demanded by a `slow_down` response (RFC 8628 §3.5)
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);
