//! Persisted identity mirror shared between processes.
//!
//! A small file holding the current user id. One process writes it when its
//! identity becomes known; every other process watching the file reconnects
//! with the new identity. Writes go through a temp file and rename so
//! watchers never observe a half-written id.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::identity::{IdentityPublisher, UserId};

#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

/// Keeps the filesystem watch alive; dropping it stops propagation.
pub struct StoreWatcher {
    _watcher: RecommendedWatcher,
}

impl FileIdentityStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored identity. A missing or blank file is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Store`] for IO failures and
    /// [`ChannelError::Identity`] for invalid stored ids.
    pub fn load(&self) -> Result<Option<UserId>, ChannelError> {
        read_identity(&self.path)
    }

    /// Persist the identity, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Store`] if the file cannot be written.
    pub fn store(&self, user: &UserId) -> Result<(), ChannelError> {
        let dir = self.directory();
        fs::create_dir_all(&dir).map_err(|e| store_error(&dir, &e))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, user.as_str()).map_err(|e| store_error(&tmp, &e))?;
        fs::rename(&tmp, &self.path).map_err(|e| store_error(&self.path, &e))?;
        debug!(path = %self.path.display(), %user, "identity: stored");
        Ok(())
    }

    /// Republish the stored identity every time the file changes.
    ///
    /// Only non-empty values propagate; deleting or blanking the file leaves
    /// the current identity in place.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Store`] if the watch cannot be installed.
    pub fn watch(&self, publisher: IdentityPublisher) -> Result<StoreWatcher, ChannelError> {
        let dir = self.directory();
        fs::create_dir_all(&dir).map_err(|e| store_error(&dir, &e))?;

        let path = self.path.clone();
        let file_name = self.path.file_name().map(ToOwned::to_owned);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "identity: watch error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            if !event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
                return;
            }
            match read_identity(&path) {
                Ok(Some(user)) => {
                    if publisher.publish(user.clone()) {
                        info!(%user, "identity: changed by another process");
                    }
                }
                Ok(None) => debug!(path = %path.display(), "identity: store cleared, keeping current"),
                Err(e) => warn!(error = %e, "identity: unreadable store"),
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = %self.path.display(), "identity: watching store");
        Ok(StoreWatcher { _watcher: watcher })
    }

    fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

fn read_identity(path: &Path) -> Result<Option<UserId>, ChannelError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(store_error(path, &e)),
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    UserId::new(trimmed).map(Some)
}

fn store_error(path: &Path, error: &std::io::Error) -> ChannelError {
    ChannelError::Store(format!("{}: {error}", path.display()))
}

#[cfg(test)]
#[path = "identity_store_test.rs"]
mod tests;
