//! Durable token file
//!
//! A pretty-printed JSON array of token records. Writes go to a uniquely
//! named temp file in the same directory which is then renamed over the
//! target, so a reader never sees a half-written file. The file holds bearer
//! and refresh tokens and is kept owner-only (0600) on unix.

use std::path::{Path, PathBuf};

use device_auth::{Token, TokenCacheMode};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Directory under the home directory holding the token file
pub const CACHE_DIR: &str = ".device-auth";
/// Token file name
pub const CACHE_FILE: &str = "token-cache.json";

/// Location of the durable token file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<home>/.device-auth/token-cache.json`, falling back to the working
    /// directory when no home directory is known.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CACHE_DIR)
            .join(CACHE_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored token. A missing file is an empty store.
    pub async fn load(&self) -> Result<Vec<Token>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "token file not found");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&contents)
            .map_err(|e| Error::Parse(format!("parsing {}: {e}", self.path.display())))
    }

    /// Replace the file with `tokens`, keeping only those whose snapshot
    /// selects file caching.
    ///
    /// Callers serialize concurrent saves.
    pub async fn save<'a, I>(&self, tokens: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Token>,
    {
        let persistable: Vec<&Token> = tokens
            .into_iter()
            .filter(|t| t.cache_mode() == TokenCacheMode::File)
            .collect();
        write_atomic(&self.path, &persistable).await?;
        Ok(persistable.len())
    }

    /// Delete the file if it exists.
    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "deleted token file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!(
                "deleting {}: {e}",
                self.path.display()
            ))),
        }
    }
}

async fn write_atomic(path: &Path, tokens: &[&Token]) -> Result<()> {
    let json = serde_json::to_string_pretty(tokens)
        .map_err(|e| Error::Parse(format!("serializing tokens: {e}")))?;

    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating {}: {e}", dir.display())))?;

    let tmp_path = dir.join(format!(".{CACHE_FILE}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = write_new_file(&tmp_path, json.as_bytes()).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Io(format!("writing temp token file: {e}")));
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Io(format!("renaming temp token file: {e}")));
    }

    debug!(path = %path.display(), tokens = tokens.len(), "persisted tokens");
    Ok(())
}

/// Create `path`, which must not exist, owner-only on unix, and fill it.
async fn write_new_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = create_owner_only(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

async fn create_owner_only(path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    #[cfg(not(unix))]
    debug!("owner-only permissions not supported on this platform");
    options.open(path).await
}
