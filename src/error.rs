//! Error taxonomy for the notification channel.
//!
//! ERROR HANDLING
//! ==============
//! None of these reach host code through `connect`/`disconnect`: the
//! connection task logs them and schedules a reconnect. They are returned
//! only from construction-time validation (`ChannelConfig`, `UserId`,
//! identity store) and from the lower layers to the connection task.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Socket could not be opened, or failed while open.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("frame codec error: {0}")]
    Codec(#[from] frames::CodecError),
    /// The server sent an ERROR frame.
    #[error("server error: {message}")]
    Protocol { message: String, details: String },
    #[error("unexpected {command} frame")]
    UnexpectedFrame { command: frames::Command },
    #[error("no CONNECTED frame within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("no data from server within {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("connection closed by server")]
    Closed,
    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("invalid user id: {0}")]
    Identity(String),
    #[error("identity store error: {0}")]
    Store(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChannelError {
    /// Transport-establishment failures are expected while the server is
    /// down and are logged at a lower level than protocol failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed | Self::HeartbeatTimeout(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<notify::Error> for ChannelError {
    fn from(error: notify::Error) -> Self {
        Self::Store(error.to_string())
    }
}
