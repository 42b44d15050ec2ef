//! Durable storage for the refresh token.
//!
//! Only the refresh token survives a restart; the access token never leaves
//! memory. The file store keeps a single JSON key, `refresh_token`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use tracing::warn;

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, refresh_token: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    refresh_token: String,
}

/// Refresh token persisted as a small JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        match serde_json::from_slice::<StoredSession>(&raw) {
            Ok(stored) if !stored.refresh_token.trim().is_empty() => Ok(Some(stored.refresh_token)),
            Ok(_) => Ok(None),
            Err(err) => {
                warn!("Ignoring unreadable session file {}: {err}", self.path.display());
                Ok(None)
            }
        }
    }

    async fn save(&self, refresh_token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let payload = serde_json::to_vec(&StoredSession {
            refresh_token: refresh_token.to_string(),
        })?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, payload)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to restrict {}", temp.display()))?;
        }

        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to remove {}", self.path.display()))
            }
        }
    }
}

/// Volatile store, used by tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(refresh_token: &str) -> Self {
        Self {
            token: Mutex::new(Some(refresh_token.to_string())),
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.current())
    }

    async fn save(&self, refresh_token: &str) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(refresh_token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
