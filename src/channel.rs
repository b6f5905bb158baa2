//! The notification channel: one live subscription per user.
//!
//! CONNECTION TASK
//! ===============
//! `connect` spawns a task that owns the socket and the STOMP session:
//! 1. open the socket (`?userId=` on the URL), CONNECT with the user header
//! 2. SUBSCRIBE to the user's topic, SEND the registration if configured
//! 3. forward every MESSAGE on that subscription to the renderer
//! 4. on any failure, log it, wait `reconnect_delay`, start over
//!
//! The task stops when its shutdown signal fires. Each connection carries an
//! `active` flag that is cleared before shutdown is signalled, so a connection
//! being torn down never forwards another message even if frames were
//! already buffered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::identity::UserId;
use crate::render::Renderer;
use crate::session::{Delivery, Session, SessionEvent, SessionSettings};
use crate::transport::{Connector, WebSocketConnector};

/// How long a deactivated connection may spend on DISCONNECT before it is aborted.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for the DISCONNECT receipt.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct NotificationChannel {
    config: Arc<ChannelConfig>,
    connector: Arc<dyn Connector>,
    renderer: Arc<dyn Renderer>,
    connection: Option<Connection>,
}

impl NotificationChannel {
    #[must_use]
    pub fn new(config: ChannelConfig, connector: Arc<dyn Connector>, renderer: Arc<dyn Renderer>) -> Self {
        Self { config: Arc::new(config), connector, renderer, connection: None }
    }

    /// Channel over real WebSockets.
    #[must_use]
    pub fn websocket(config: ChannelConfig, renderer: Arc<dyn Renderer>) -> Self {
        Self::new(config, Arc::new(WebSocketConnector), renderer)
    }

    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Start delivering notifications for `user`, replacing any prior connection.
    ///
    /// Returns immediately; the socket is opened by a background task that
    /// keeps reconnecting until [`Self::disconnect`]. Must be called from
    /// within a tokio runtime.
    pub fn connect(&mut self, user: UserId) {
        self.disconnect();

        let Ok(runtime) = Handle::try_current() else {
            error!(%user, "notify: connect called outside a tokio runtime");
            return;
        };

        let active = Arc::new(AtomicBool::new(true));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let worker = Worker {
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            renderer: Arc::clone(&self.renderer),
            user: user.clone(),
            active: Arc::clone(&active),
        };
        let task = runtime.spawn(worker.run(shutdown_rx));

        info!(%user, endpoint = %self.config.endpoint, "notify: connecting");
        self.connection = Some(Connection { user, active, shutdown, task });
    }

    /// Tear down the current connection, if any. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            info!(user = %connection.user, "notify: disconnecting");
            connection.deactivate();
        }
    }

    /// Whether a connection is held. It may be between reconnect attempts.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// User of the current connection.
    #[must_use]
    pub fn user(&self) -> Option<&UserId> {
        self.connection.as_ref().map(|c| &c.user)
    }

    /// Hand a payload to the display callback unchanged.
    pub fn on_message(&self, payload: &str) {
        self.renderer.show(payload);
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

struct Connection {
    user: UserId,
    active: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Connection {
    fn deactivate(self) {
        self.active.store(false, Ordering::SeqCst);
        if self.shutdown.send(()).is_err() {
            debug!(user = %self.user, "notify: connection task already finished");
        }

        let task = self.task;
        let abort = task.abort_handle();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if tokio::time::timeout(TEARDOWN_GRACE, task).await.is_err() {
                        debug!("notify: teardown overran, aborting connection task");
                        abort.abort();
                    }
                });
            }
            Err(_) => abort.abort(),
        }
    }
}

struct Worker {
    config: Arc<ChannelConfig>,
    connector: Arc<dyn Connector>,
    renderer: Arc<dyn Renderer>,
    user: UserId,
    active: Arc<AtomicBool>,
}

impl Worker {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let delay = self.config.reconnect_delay;
        loop {
            match self.run_session(&mut shutdown).await {
                Ok(()) => break,
                Err(e) if e.is_transport() => {
                    warn!(user = %self.user, error = %e, retry_in = ?delay, "notify: connection lost");
                }
                Err(e) => {
                    error!(user = %self.user, error = %e, retry_in = ?delay, "notify: session failed");
                }
            }

            tokio::select! {
                _ = &mut shutdown => break,
                () = tokio::time::sleep(delay) => {}
            }
            debug!(user = %self.user, "notify: reconnecting");
        }
        debug!(user = %self.user, "notify: connection task stopped");
    }

    /// One session from socket open to failure. `Ok` means shutdown was requested.
    async fn run_session(&self, shutdown: &mut oneshot::Receiver<()>) -> Result<(), ChannelError> {
        let (mut session, subscription) = tokio::select! {
            _ = &mut *shutdown => return Ok(()),
            established = self.establish() => established?,
        };
        info!(user = %self.user, %subscription, version = ?session.version(), "notify: subscribed");

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    session.disconnect(RECEIPT_TIMEOUT).await;
                    return Ok(());
                }
                event = session.next_event() => match event? {
                    SessionEvent::Message(delivery) => self.forward(&subscription, delivery),
                    SessionEvent::Receipt(id) => debug!(receipt = %id, "notify: receipt"),
                    SessionEvent::Closed => return Err(ChannelError::Closed),
                },
            }
        }
    }

    async fn establish(&self) -> Result<(Session, String), ChannelError> {
        let url = self.config.endpoint_for(&self.user);
        let socket = self.connector.open(&url).await?;

        let connect_headers = self
            .config
            .user_header
            .iter()
            .map(|name| (name.clone(), self.user.to_string()))
            .collect();
        let settings = SessionSettings {
            host: self.config.host(),
            heart_beat: self.config.heart_beat,
            handshake_timeout: self.config.handshake_timeout,
            connect_headers,
        };
        let (mut session, _connected) = Session::handshake(socket, &settings).await?;

        let subscription = session.subscribe(&self.config.topic_for(&self.user)).await?;
        if let Some(destination) = &self.config.register_destination {
            session.send(destination, self.user.as_str()).await?;
            debug!(user = %self.user, %destination, "notify: registered");
        }
        Ok((session, subscription))
    }

    fn forward(&self, subscription: &str, delivery: Delivery) {
        if !self.active.load(Ordering::SeqCst) {
            debug!(user = %self.user, "notify: dropping message for inactive connection");
            return;
        }
        if delivery.subscription != subscription {
            debug!(subscription = %delivery.subscription, "notify: message for unknown subscription");
            return;
        }
        self.renderer.show(&delivery.body);
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
