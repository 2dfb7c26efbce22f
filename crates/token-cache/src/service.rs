//! Token service
//!
//! Process-wide map from cache key to `Token`, shared by every connection
//! attempt in a host (hold it in an `Arc`). A lookup returns a live token
//! without network traffic, refreshes an expired one when it can, and falls
//! back to the full device flow otherwise.
//!
//! In file mode the durable store is loaded once, lazily, before the first
//! lookup. Entries inserted in memory before that load completes win over
//! loaded ones.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use device_auth::{
    ConnectOptions, Configuration, DeviceAuthorizer, DeviceCodePresenter, Token, TokenCacheMode,
    connection_identity,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fingerprint::cache_key;
use crate::metrics;
use crate::store::TokenStore;

pub struct TokenService {
    entries: RwLock<HashMap<String, Token>>,
    store: TokenStore,
    /// Fast path for the one-shot load
    loaded: AtomicBool,
    /// Held while loading; `true` once loaded
    load_lock: Mutex<bool>,
    /// Serializes writes of the durable file
    writer: Mutex<()>,
    presenter: Option<Arc<dyn DeviceCodePresenter>>,
}

impl Default for TokenService {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenService {
    /// Service persisting to the default token file.
    pub fn new() -> Self {
        Self::with_store_path(TokenStore::default_path())
    }

    pub fn with_store_path(path: PathBuf) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store: TokenStore::new(path),
            loaded: AtomicBool::new(false),
            load_lock: Mutex::new(false),
            writer: Mutex::new(()),
            presenter: None,
        }
    }

    /// Present device codes through `presenter` instead of the one the
    /// configuration selects.
    pub fn with_presenter(mut self, presenter: Arc<dyn DeviceCodePresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    /// Token for `target` and `options`, from cache, refresh or device flow.
    ///
    /// `Ok(None)` means the provider has the device flow disabled.
    pub async fn get_token(
        &self,
        config: &Configuration,
        target: &str,
        options: &ConnectOptions,
    ) -> Result<Option<Token>> {
        let connection = connection_identity(target)?;

        if config.token_cache == TokenCacheMode::Disabled {
            metrics::record_lookup("disabled");
            let authorizer = self.authorizer(config)?;
            return self.device_flow(&authorizer, &connection, options).await;
        }

        if config.token_cache == TokenCacheMode::File {
            self.ensure_loaded().await?;
        }

        let key = cache_key(&connection, options);
        let cached = self.entries.read().await.get(&key).cloned();

        let cached = match cached {
            Some(token) if !token.matches(&connection, options) => {
                // Same hash, different identity: leave the other entry alone
                debug!(connection = %connection, "cache key collision, ignoring entry");
                metrics::record_lookup("collision");
                None
            }
            Some(token) if !token.is_expired() => {
                debug!(connection = %connection, expires_at = token.expires_at(), "token cache hit");
                metrics::record_lookup("hit");
                return Ok(Some(token));
            }
            Some(token) => {
                metrics::record_lookup("expired");
                Some(token)
            }
            None => {
                metrics::record_lookup("miss");
                None
            }
        };

        let authorizer = self.authorizer(config)?;

        if let Some(expired) = cached {
            if expired.refresh_token().is_some() {
                match authorizer.refresh(&expired).await {
                    Ok(refreshed) => {
                        metrics::record_refresh("success");
                        info!(
                            connection = %connection,
                            expires_at = refreshed.expires_at(),
                            "token refreshed"
                        );
                        self.insert(key, refreshed.clone()).await?;
                        return Ok(Some(refreshed));
                    }
                    Err(e) => {
                        metrics::record_refresh("failure");
                        warn!(
                            connection = %connection,
                            error = %e,
                            "token refresh failed, falling back to device authorization"
                        );
                    }
                }
            } else {
                debug!(connection = %connection, "token expired without refresh token");
            }
            self.evict(&key).await?;
        }

        let token = self.device_flow(&authorizer, &connection, options).await?;
        if let Some(token) = &token {
            self.insert(key, token.clone()).await?;
        }
        Ok(token)
    }

    /// Drop every in-memory entry. The durable file is untouched.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        debug!(count, "cleared token cache");
    }

    /// Drop every in-memory entry and delete the durable file. The next file
    /// mode lookup loads again.
    pub async fn purge(&self) -> Result<()> {
        let mut loaded = self.load_lock.lock().await;
        let _writer = self.writer.lock().await;
        self.entries.write().await.clear();
        self.store.delete().await?;
        *loaded = false;
        self.loaded.store(false, Ordering::Release);
        info!(path = %self.store.path().display(), "purged token cache");
        Ok(())
    }

    /// Number of cached tokens.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn authorizer(&self, config: &Configuration) -> Result<DeviceAuthorizer> {
        let authorizer = DeviceAuthorizer::new(config.clone())?;
        Ok(match &self.presenter {
            Some(presenter) => authorizer.with_presenter(presenter.clone()),
            None => authorizer,
        })
    }

    async fn device_flow(
        &self,
        authorizer: &DeviceAuthorizer,
        connection: &str,
        options: &ConnectOptions,
    ) -> Result<Option<Token>> {
        match authorizer.authorize(connection, options).await {
            Ok(Some(token)) => {
                metrics::record_device_flow("success");
                Ok(Some(token))
            }
            Ok(None) => {
                metrics::record_device_flow("disabled");
                Ok(None)
            }
            Err(e) => {
                metrics::record_device_flow("failure");
                Err(e.into())
            }
        }
    }

    /// Load the durable file once. On failure nothing is marked loaded, so
    /// the file is never rewritten from a partial view and the next file mode
    /// lookup tries again.
    async fn ensure_loaded(&self) -> Result<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut loaded = self.load_lock.lock().await;
        if *loaded {
            return Ok(());
        }

        let tokens = self.store.load().await.inspect_err(|e| {
            warn!(
                path = %self.store.path().display(),
                error = %e,
                "could not load token cache"
            );
        })?;
        let count = tokens.len();
        let mut entries = self.entries.write().await;
        for token in tokens {
            let key = cache_key(token.connection(), token.options());
            entries.entry(key).or_insert(token);
        }
        info!(path = %self.store.path().display(), count, "loaded token cache");

        *loaded = true;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    async fn insert(&self, key: String, token: Token) -> Result<()> {
        let persist = token.cache_mode() == TokenCacheMode::File;
        self.entries.write().await.insert(key, token);
        if persist {
            self.persist().await?;
        }
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        let removed = self.entries.write().await.remove(key);
        if removed.is_some_and(|t| t.cache_mode() == TokenCacheMode::File) {
            self.persist().await?;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let snapshot: Vec<Token> = self.entries.read().await.values().cloned().collect();
        self.store.save(&snapshot).await?;
        Ok(())
    }
}
