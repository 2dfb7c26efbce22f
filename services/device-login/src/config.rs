//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from OAUTH2_CLIENT_SECRET or
//! client_secret_file, never stored in the TOML directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::Secret;
use device_auth::ConnectOptions;
use device_auth::constants::*;
use serde::Deserialize;

/// Environment variable holding the client secret
pub const CLIENT_SECRET_ENV: &str = "OAUTH2_CLIENT_SECRET";
/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "DEVICE_LOGIN_CONFIG";
/// Config file used when neither flag nor env var is set
pub const DEFAULT_CONFIG_FILE: &str = "device-login.toml";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: OAuthConfig,
    /// Free-form connect options (`user`, `sslmode`, ...)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// OAuth2 settings, mapped onto the `oauth2_*` connect options
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub issuer: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to the env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub login_hint: Option<String>,
    #[serde(default)]
    pub scopes: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub token_cache: Option<String>,
    /// Token file location for file caching; defaults to the home directory
    #[serde(default)]
    pub token_cache_path: Option<PathBuf>,
    #[serde(default)]
    pub no_browser: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub cacert_path: Option<PathBuf>,
    #[serde(default)]
    pub ssl_disable_trust: bool,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. OAUTH2_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.oauth.issuer.starts_with("http://")
            && !config.oauth.issuer.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "issuer must start with http:// or https://, got: {}",
                config.oauth.issuer
            )));
        }

        if config.oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        // Enum values fail here rather than after the browser opens
        if let Some(token_type) = &config.oauth.token_type {
            token_type
                .parse::<device_auth::TokenType>()
                .map_err(|e| common::Error::Config(e.to_string()))?;
        }
        if let Some(mode) = &config.oauth.token_cache {
            mode.parse::<device_auth::TokenCacheMode>()
                .map_err(|e| common::Error::Config(e.to_string()))?;
        }

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            config.oauth.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.oauth.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.oauth.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or DEVICE_LOGIN_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Connect options for this configuration: the `[options]` table plus the
    /// OAuth2 settings under their option keys.
    pub fn connect_options(&self) -> ConnectOptions {
        let mut options: ConnectOptions = self.options.clone().into_iter().collect();
        let oauth = &self.oauth;

        options.insert(OPT_ISSUER, oauth.issuer.as_str());
        options.insert(OPT_CLIENT_ID, oauth.client_id.as_str());
        if let Some(secret) = &oauth.client_secret {
            options.insert(OPT_CLIENT_SECRET, secret.expose().as_str());
        }
        let optional = [
            (OPT_LOGIN_HINT, oauth.login_hint.clone()),
            (OPT_SCOPES, oauth.scopes.clone()),
            (OPT_TOKEN_TYPE, oauth.token_type.clone()),
            (OPT_TOKEN_CACHE, oauth.token_cache.clone()),
            (
                OPT_CACERT_PATH,
                oauth.cacert_path.as_ref().map(|p| p.display().to_string()),
            ),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                options.insert(key, value);
            }
        }
        if oauth.no_browser {
            options.insert(OPT_NO_BROWSER, "true");
        }
        if oauth.quiet {
            options.insert(OPT_QUIET, "true");
        }
        if oauth.ssl_disable_trust {
            options.insert(OPT_DISABLE_TRUST, "true");
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[oauth]
issuer = "https://idp.example.com/realms/db"
client_id = "device-login"
token_cache = "file"
no_browser = true

[options]
user = "alice"
sslmode = "require"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("device-login.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { remove_env(CLIENT_SECRET_ENV) };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.oauth.issuer, "https://idp.example.com/realms/db");
        assert_eq!(config.oauth.client_id, "device-login");
        assert!(config.oauth.no_browser);
        assert!(!config.oauth.quiet);
        assert!(config.oauth.client_secret.is_none());
        assert_eq!(config.options.get("user").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_connect_options_mapping() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { remove_env(CLIENT_SECRET_ENV) };

        let options = Config::load(&path).unwrap().connect_options();
        assert_eq!(options.get(OPT_ISSUER), Some("https://idp.example.com/realms/db"));
        assert_eq!(options.get(OPT_CLIENT_ID), Some("device-login"));
        assert_eq!(options.get(OPT_TOKEN_CACHE), Some("file"));
        assert_eq!(options.get(OPT_NO_BROWSER), Some("true"));
        assert_eq!(options.get("sslmode"), Some("require"));
        assert!(!options.contains(OPT_QUIET));
        assert!(!options.contains(OPT_CLIENT_SECRET));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/device-login.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_non_http_issuer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[oauth]\nissuer = \"idp.example.com\"\nclient_id = \"x\"\n",
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("issuer"), "got: {err}");
    }

    #[test]
    fn test_invalid_token_cache_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[oauth]\nissuer = \"https://idp\"\nclient_id = \"x\"\ntoken_cache = \"redis\"\n",
        );
        assert!(matches!(Config::load(&path), Err(common::Error::Config(_))));
    }

    #[test]
    fn test_client_secret_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env(CLIENT_SECRET_ENV, "env-secret") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(CLIENT_SECRET_ENV) };

        assert_eq!(
            config.oauth.client_secret.as_ref().unwrap().expose(),
            "env-secret"
        );
        assert_eq!(
            config.connect_options().get(OPT_CLIENT_SECRET),
            Some("env-secret")
        );
    }

    #[test]
    fn test_client_secret_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "file-secret\n").unwrap();
        let path = write_config(
            &dir,
            &format!(
                "[oauth]\nissuer = \"https://idp\"\nclient_id = \"x\"\nclient_secret_file = \"{}\"\n",
                secret_path.display()
            ),
        );

        unsafe { remove_env(CLIENT_SECRET_ENV) };
        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.oauth.client_secret.as_ref().unwrap().expose(),
            "file-secret"
        );
    }

    #[test]
    fn test_env_secret_wins_over_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "file-secret").unwrap();
        let path = write_config(
            &dir,
            &format!(
                "[oauth]\nissuer = \"https://idp\"\nclient_id = \"x\"\nclient_secret_file = \"{}\"\n",
                secret_path.display()
            ),
        );

        unsafe { set_env(CLIENT_SECRET_ENV, "env-secret") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(CLIENT_SECRET_ENV) };

        assert_eq!(
            config.oauth.client_secret.as_ref().unwrap().expose(),
            "env-secret"
        );
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { set_env(CONFIG_PATH_ENV, "/etc/device-login/env.toml") };
        assert_eq!(
            Config::resolve_path(Some("/tmp/cli.toml")),
            PathBuf::from("/tmp/cli.toml")
        );
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("/etc/device-login/env.toml")
        );

        unsafe { remove_env(CONFIG_PATH_ENV) };
        assert_eq!(Config::resolve_path(None), PathBuf::from(DEFAULT_CONFIG_FILE));
    }
}
