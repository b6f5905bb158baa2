//! Current-user identity and the ready signal that replaces polling.
//!
//! DESIGN
//! ======
//! The host publishes the identity once it is known; the notifier awaits it.
//! Backed by a `tokio::sync::watch` channel holding `Option<UserId>`:
//! - `IdentityPublisher` is the host side and is cheap to clone.
//! - `IdentityWatch` is the consumer side; `ready()` resolves as soon as a
//!   value exists, `changed()` yields each subsequent distinct identity.
//!
//! Publishing the identity already held is not a change.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::ChannelError;

/// Opaque, non-empty identifier of the current user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// # Errors
    ///
    /// Returns [`ChannelError::Identity`] for blank ids or ids containing
    /// control characters (they would break STOMP header lines).
    pub fn new(raw: impl Into<String>) -> Result<Self, ChannelError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ChannelError::Identity("user id must not be empty".into()));
        }
        if raw.chars().any(char::is_control) {
            return Err(ChannelError::Identity(format!("user id contains control characters: {raw:?}")));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = ChannelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::new(raw)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Create a linked publisher/watch pair, optionally already holding an identity.
#[must_use]
pub fn identity_channel(initial: Option<UserId>) -> (IdentityPublisher, IdentityWatch) {
    let (tx, rx) = watch::channel(initial);
    (IdentityPublisher { tx: Arc::new(tx) }, IdentityWatch { rx })
}

/// Host-side handle used to announce the current user.
#[derive(Clone, Debug)]
pub struct IdentityPublisher {
    tx: Arc<watch::Sender<Option<UserId>>>,
}

impl IdentityPublisher {
    /// Set the current identity. Returns `true` if it differs from the held one.
    pub fn publish(&self, user: UserId) -> bool {
        self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(&user) {
                false
            } else {
                *current = Some(user);
                true
            }
        })
    }

    /// Forget the current identity. Watchers keep their connection.
    pub fn clear(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    #[must_use]
    pub fn current(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    /// Another consumer of the same identity.
    #[must_use]
    pub fn subscribe(&self) -> IdentityWatch {
        IdentityWatch { rx: self.tx.subscribe() }
    }
}

/// Consumer-side view of the current identity.
#[derive(Debug)]
pub struct IdentityWatch {
    rx: watch::Receiver<Option<UserId>>,
}

impl IdentityWatch {
    #[must_use]
    pub fn current(&self) -> Option<UserId> {
        self.rx.borrow().clone()
    }

    /// Resolve once an identity is available, marking it as seen.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Identity`] if every publisher was dropped
    /// before an identity appeared.
    pub async fn ready(&mut self) -> Result<UserId, ChannelError> {
        let guard = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ChannelError::Identity("identity source closed before ready".into()))?;
        let user = (*guard).clone();
        drop(guard);
        user.ok_or_else(|| ChannelError::Identity("identity vanished while ready".into()))
    }

    /// Wait for the next identity that has not been seen yet.
    ///
    /// Clears are skipped. Returns `None` once every publisher is dropped.
    pub async fn changed(&mut self) -> Option<UserId> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(user) = self.rx.borrow_and_update().clone() {
                return Some(user);
            }
        }
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
