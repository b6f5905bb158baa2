//! Per-user push notifications over STOMP.
//!
//! A [`NotificationChannel`] holds at most one live connection: a WebSocket
//! carrying a STOMP session subscribed to the current user's topic. Every
//! MESSAGE on that subscription goes to a [`Renderer`], which by default
//! shows it as a short-lived [`Toast`]. The [`Notifier`] owns the channel in
//! a task and drives it from the identity signal, so host code only ever
//! holds a [`NotifierHandle`].

pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod identity_store;
pub mod notifier;
pub mod render;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use channel::NotificationChannel;
pub use config::{ChannelConfig, ToastConfig, ToastPosition};
pub use error::ChannelError;
pub use identity::{IdentityPublisher, IdentityWatch, UserId, identity_channel};
pub use identity_store::{FileIdentityStore, StoreWatcher};
pub use notifier::{Notifier, NotifierHandle};
pub use render::{MemoryPage, Page, Renderer, Toast, ToastRenderer, ToastStyle};
pub use session::{Delivery, Session, SessionEvent, SessionSettings};
pub use transport::{Connector, Socket, WebSocketConnector};
