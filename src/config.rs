//! Channel and toast configuration parsed from environment variables.
//!
//! Every knob has a default matching the deployed front end, so an empty
//! environment yields a working client against `ws://localhost:8080/ws`.

use std::time::Duration;

use frames::HeartBeat;
use serde::Serialize;
use url::Url;

use crate::error::ChannelError;
use crate::identity::UserId;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";
pub const DEFAULT_TOPIC_TEMPLATE: &str = "/user/{user}/notifications";
pub const DEFAULT_REGISTER_DESTINATION: &str = "/app/register";
pub const DEFAULT_USER_PARAM: &str = "userId";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HEARTBEAT_MS: u64 = 10_000;

pub const DEFAULT_TOAST_DURATION_MS: u64 = 10_000;
pub const DEFAULT_TOAST_GRACE_MS: u64 = 500;
pub const DEFAULT_TOAST_BACKGROUND: &str = "#ff9800";
pub const DEFAULT_TOAST_COLOR: &str = "white";

/// Placeholder in the topic template replaced by the user id.
pub const USER_PLACEHOLDER: &str = "{user}";

// =============================================================================
// CHANNEL CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub endpoint: Url,
    /// Destination to subscribe to; `{user}` is substituted.
    pub topic_template: String,
    /// Destination for the one-shot registration SEND, if any.
    pub register_destination: Option<String>,
    /// Query parameter carrying the user id on the endpoint URL, if any.
    pub user_query_param: Option<String>,
    /// CONNECT header carrying the user id, if any.
    pub user_header: Option<String>,
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
    pub heart_beat: HeartBeat,
}

impl ChannelConfig {
    /// Defaults for everything except the endpoint.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            topic_template: DEFAULT_TOPIC_TEMPLATE.to_owned(),
            register_destination: Some(DEFAULT_REGISTER_DESTINATION.to_owned()),
            user_query_param: Some(DEFAULT_USER_PARAM.to_owned()),
            user_header: Some(DEFAULT_USER_PARAM.to_owned()),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            heart_beat: HeartBeat::new(DEFAULT_HEARTBEAT_MS, DEFAULT_HEARTBEAT_MS),
        }
    }

    /// Build config from process environment variables.
    ///
    /// Optional:
    /// - `NOTIFY_ENDPOINT`: default `ws://localhost:8080/ws` (`http(s)://` is mapped to `ws(s)://`)
    /// - `NOTIFY_TOPIC`: default `/user/{user}/notifications`
    /// - `NOTIFY_REGISTER_DESTINATION`: default `/app/register`, empty disables
    /// - `NOTIFY_USER_QUERY_PARAM`: default `userId`, empty disables
    /// - `NOTIFY_USER_HEADER`: default `userId`, empty disables
    /// - `NOTIFY_RECONNECT_DELAY_MS`: default 5000
    /// - `NOTIFY_HANDSHAKE_TIMEOUT_MS`: default 10000
    /// - `NOTIFY_HEARTBEAT_OUT_MS` / `NOTIFY_HEARTBEAT_IN_MS`: default 10000, 0 disables
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidEndpoint`] or [`ChannelError::Config`].
    pub fn from_env() -> Result<Self, ChannelError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidEndpoint`] or [`ChannelError::Config`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChannelError> {
        let endpoint = parse_endpoint(&lookup("NOTIFY_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned()))?;
        let mut config = Self::new(endpoint);

        if let Some(topic) = lookup("NOTIFY_TOPIC") {
            config.topic_template = topic;
        }
        if let Some(raw) = lookup("NOTIFY_REGISTER_DESTINATION") {
            config.register_destination = non_empty(raw);
        }
        if let Some(raw) = lookup("NOTIFY_USER_QUERY_PARAM") {
            config.user_query_param = non_empty(raw);
        }
        if let Some(raw) = lookup("NOTIFY_USER_HEADER") {
            config.user_header = non_empty(raw);
        }

        config.reconnect_delay =
            Duration::from_millis(parse_or(&lookup, "NOTIFY_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS));
        config.handshake_timeout =
            Duration::from_millis(parse_or(&lookup, "NOTIFY_HANDSHAKE_TIMEOUT_MS", DEFAULT_HANDSHAKE_TIMEOUT_MS));
        config.heart_beat = HeartBeat::new(
            parse_or(&lookup, "NOTIFY_HEARTBEAT_OUT_MS", DEFAULT_HEARTBEAT_MS),
            parse_or(&lookup, "NOTIFY_HEARTBEAT_IN_MS", DEFAULT_HEARTBEAT_MS),
        );

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that `from_lookup` cannot express through types.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Config`] for an unusable topic or delay.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if !self.topic_template.starts_with('/') {
            return Err(ChannelError::Config(format!(
                "topic template must start with '/': {}",
                self.topic_template
            )));
        }
        if self.reconnect_delay.is_zero() {
            return Err(ChannelError::Config("reconnect delay must be greater than zero".into()));
        }
        Ok(())
    }

    /// Endpoint URL for one user, with the user id query parameter applied.
    #[must_use]
    pub fn endpoint_for(&self, user: &UserId) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(param) = &self.user_query_param {
            url.query_pairs_mut().append_pair(param, user.as_str());
        }
        url
    }

    /// Subscription destination for one user.
    #[must_use]
    pub fn topic_for(&self, user: &UserId) -> String {
        self.topic_template.replace(USER_PLACEHOLDER, user.as_str())
    }

    /// Value for the STOMP `host` header.
    #[must_use]
    pub fn host(&self) -> String {
        self.endpoint.host_str().unwrap_or("localhost").to_owned()
    }
}

/// Parse a WebSocket endpoint, accepting `http(s)://` as `ws(s)://`.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidEndpoint`] for unparsable URLs or other schemes.
pub fn parse_endpoint(raw: &str) -> Result<Url, ChannelError> {
    let invalid = |reason: String| ChannelError::InvalidEndpoint { url: raw.to_owned(), reason };

    let mapped = if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        raw.to_owned()
    };

    let url = Url::parse(&mapped).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(invalid(format!("unsupported scheme `{other}`"))),
    }
}

// =============================================================================
// TOAST CONFIG
// =============================================================================

/// Where toasts are anchored on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToastPosition {
    TopStretch,
    TopStart,
    TopCenter,
    TopEnd,
    Middle,
    BottomStart,
    BottomCenter,
    BottomEnd,
    BottomStretch,
}

impl ToastPosition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopStretch => "top-stretch",
            Self::TopStart => "top-start",
            Self::TopCenter => "top-center",
            Self::TopEnd => "top-end",
            Self::Middle => "middle",
            Self::BottomStart => "bottom-start",
            Self::BottomCenter => "bottom-center",
            Self::BottomEnd => "bottom-end",
            Self::BottomStretch => "bottom-stretch",
        }
    }
}

impl std::str::FromStr for ToastPosition {
    type Err = ChannelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let position = match raw {
            "top-stretch" => Self::TopStretch,
            "top-start" => Self::TopStart,
            "top-center" => Self::TopCenter,
            "top-end" => Self::TopEnd,
            "middle" => Self::Middle,
            "bottom-start" => Self::BottomStart,
            "bottom-center" => Self::BottomCenter,
            "bottom-end" => Self::BottomEnd,
            "bottom-stretch" => Self::BottomStretch,
            other => return Err(ChannelError::Config(format!("unknown toast position: {other}"))),
        };
        Ok(position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastConfig {
    pub position: ToastPosition,
    /// How long the toast is visible.
    pub duration: Duration,
    /// Extra time before the element is removed from the page.
    pub grace: Duration,
    pub background: String,
    pub color: String,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            position: ToastPosition::TopStretch,
            duration: Duration::from_millis(DEFAULT_TOAST_DURATION_MS),
            grace: Duration::from_millis(DEFAULT_TOAST_GRACE_MS),
            background: DEFAULT_TOAST_BACKGROUND.to_owned(),
            color: DEFAULT_TOAST_COLOR.to_owned(),
        }
    }
}

impl ToastConfig {
    /// Build toast settings from process environment variables.
    ///
    /// Optional: `NOTIFY_TOAST_POSITION`, `NOTIFY_TOAST_DURATION_MS`,
    /// `NOTIFY_TOAST_GRACE_MS`, `NOTIFY_TOAST_BACKGROUND`, `NOTIFY_TOAST_COLOR`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Config`] for an unknown position.
    pub fn from_env() -> Result<Self, ChannelError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Config`] for an unknown position.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChannelError> {
        let defaults = Self::default();
        let position = match lookup("NOTIFY_TOAST_POSITION") {
            Some(raw) => raw.parse()?,
            None => defaults.position,
        };
        Ok(Self {
            position,
            duration: Duration::from_millis(parse_or(&lookup, "NOTIFY_TOAST_DURATION_MS", DEFAULT_TOAST_DURATION_MS)),
            grace: Duration::from_millis(parse_or(&lookup, "NOTIFY_TOAST_GRACE_MS", DEFAULT_TOAST_GRACE_MS)),
            background: lookup("NOTIFY_TOAST_BACKGROUND").unwrap_or(defaults.background),
            color: lookup("NOTIFY_TOAST_COLOR").unwrap_or(defaults.color),
        })
    }

    /// Delay after which an inserted toast is removed from the page.
    #[must_use]
    pub fn removal_delay(&self) -> Duration {
        self.duration + self.grace
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key).and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

fn non_empty(raw: String) -> Option<String> {
    if raw.trim().is_empty() { None } else { Some(raw) }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
