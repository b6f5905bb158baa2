//! Host-facing bootstrap: the channel owned by one task.
//!
//! The notifier task is the only owner of the [`NotificationChannel`]. It
//! connects as soon as the identity is ready, reconnects whenever the
//! identity changes, and serves explicit requests from [`NotifierHandle`]s.
//! Host code never touches the channel directly.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::NotificationChannel;
use crate::identity::{IdentityWatch, UserId};
use crate::identity_store::FileIdentityStore;

enum Request {
    Connect(UserId),
    Disconnect,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle for host code. Requests after shutdown are ignored.
#[derive(Clone, Debug)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl NotifierHandle {
    /// Reconnect as `user`, replacing the current connection.
    pub fn connect(&self, user: UserId) {
        self.request(Request::Connect(user));
    }

    pub fn disconnect(&self) {
        self.request(Request::Disconnect);
    }

    fn request(&self, request: Request) {
        if self.tx.send(request).is_err() {
            debug!("notifier: stopped, request ignored");
        }
    }
}

pub struct Notifier {
    handle: NotifierHandle,
    task: JoinHandle<()>,
}

impl Notifier {
    /// Move `channel` into a background task driven by `identity`.
    ///
    /// With a `store`, every identity the notifier adopts is mirrored into
    /// it so other processes watching the same file follow along.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn spawn(channel: NotificationChannel, identity: IdentityWatch, store: Option<FileIdentityStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor { channel, store };
        let task = tokio::spawn(actor.run(identity, rx));
        Self { handle: NotifierHandle { tx }, task }
    }

    #[must_use]
    pub fn handle(&self) -> NotifierHandle {
        self.handle.clone()
    }

    /// Disconnect and wait for the task to finish.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.handle.tx.send(Request::Shutdown(ack)).is_err() || done.await.is_err() {
            debug!("notifier: task already exited");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "notifier: task ended abnormally");
        }
    }
}

struct Actor {
    channel: NotificationChannel,
    store: Option<FileIdentityStore>,
}

impl Actor {
    async fn run(mut self, mut identity: IdentityWatch, mut rx: mpsc::UnboundedReceiver<Request>) {
        let mut awaiting_ready = true;
        let mut identity_open = true;

        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(Request::Connect(user)) => self.adopt(user),
                    Some(Request::Disconnect) => self.channel.disconnect(),
                    Some(Request::Shutdown(ack)) => {
                        self.channel.disconnect();
                        if ack.send(()).is_err() {
                            debug!("notifier: shutdown requester went away");
                        }
                        break;
                    }
                    None => {
                        self.channel.disconnect();
                        break;
                    }
                },
                next = next_identity(&mut identity, awaiting_ready), if identity_open => match next {
                    Some(user) => {
                        awaiting_ready = false;
                        if self.channel.user() == Some(&user) {
                            debug!(%user, "notifier: identity unchanged");
                        } else {
                            info!(%user, "notifier: identity ready");
                            self.adopt(user);
                        }
                    }
                    None => {
                        debug!("notifier: identity source closed");
                        identity_open = false;
                    }
                },
            }
        }
        debug!("notifier: stopped");
    }

    fn adopt(&mut self, user: UserId) {
        if let Some(store) = &self.store {
            if let Err(e) = store.store(&user) {
                warn!(%user, error = %e, "notifier: could not mirror identity");
            }
        }
        self.channel.connect(user);
    }
}

async fn next_identity(identity: &mut IdentityWatch, first: bool) -> Option<UserId> {
    if !first {
        return identity.changed().await;
    }
    match identity.ready().await {
        Ok(user) => Some(user),
        Err(e) => {
            debug!(error = %e, "notifier: no identity");
            None
        }
    }
}

#[cfg(test)]
#[path = "notifier_test.rs"]
mod tests;
