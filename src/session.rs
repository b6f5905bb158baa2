//! One STOMP session over one socket.
//!
//! LIFECYCLE
//! =========
//! 1. `handshake` sends CONNECT and waits for CONNECTED (or ERROR)
//! 2. `subscribe` / `send` issue client frames
//! 3. `next_event` yields MESSAGE and RECEIPT frames, sending and checking
//!    heart-beats while it waits
//! 4. `disconnect` sends DISCONNECT, waits briefly for the receipt, closes
//!
//! `next_event` is cancel-safe: all decoding state lives on the session, so
//! dropping the future between messages loses nothing.

use std::time::Duration;

use frames::{Command, Decoder, Frame, HEARTBEAT_EOL, HeartBeat, Item, encode_frame};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::transport::Socket;

/// Missing this many incoming heart-beat periods marks the server dead.
const HEARTBEAT_TOLERANCE: u32 = 2;

/// Client-side parameters for the CONNECT frame.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub host: String,
    pub heart_beat: HeartBeat,
    pub handshake_timeout: Duration,
    /// Extra CONNECT headers, e.g. the user id.
    pub connect_headers: Vec<(String, String)>,
}

/// A MESSAGE frame delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subscription: String,
    pub destination: Option<String>,
    pub message_id: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Message(Delivery),
    Receipt(String),
    /// The peer closed the socket.
    Closed,
}

pub struct Session {
    socket: Box<dyn Socket>,
    decoder: Decoder,
    heart_beat: HeartBeat,
    send_tick: Option<Interval>,
    last_inbound: Instant,
    next_id: u64,
    version: Option<String>,
}

impl Session {
    /// Negotiate a session over a freshly opened socket.
    ///
    /// Returns the session and the server's CONNECTED frame.
    ///
    /// # Errors
    ///
    /// [`ChannelError::HandshakeTimeout`] if nothing arrives in time,
    /// [`ChannelError::Protocol`] if the server answers with ERROR, and
    /// transport/codec errors from the socket.
    pub async fn handshake(
        mut socket: Box<dyn Socket>,
        settings: &SessionSettings,
    ) -> Result<(Self, Frame), ChannelError> {
        let mut connect = Frame::connect(&settings.host, settings.heart_beat);
        for (name, value) in &settings.connect_headers {
            connect = connect.with_header(name.as_str(), value.as_str());
        }
        socket.send(encode_frame(&connect)).await?;

        let mut decoder = Decoder::new();
        let connected = tokio::time::timeout(settings.handshake_timeout, read_frame(socket.as_mut(), &mut decoder))
            .await
            .map_err(|_| ChannelError::HandshakeTimeout(settings.handshake_timeout))??;

        match connected.command {
            Command::Connected => {}
            Command::Error => return Err(protocol_error(&connected)),
            command => return Err(ChannelError::UnexpectedFrame { command }),
        }

        let server_beat = connected
            .header("heart-beat")
            .map(HeartBeat::parse)
            .transpose()?
            .unwrap_or_default();
        let heart_beat = settings.heart_beat.negotiate(server_beat);
        let version = connected.header("version").map(ToOwned::to_owned);
        debug!(?version, ?heart_beat, "stomp: connected");

        let session = Self {
            socket,
            decoder,
            heart_beat,
            send_tick: send_interval(heart_beat.outgoing_ms),
            last_inbound: Instant::now(),
            next_id: 0,
            version,
        };
        Ok((session, connected))
    }

    /// Negotiated heart-beat intervals.
    #[must_use]
    pub fn heart_beat(&self) -> HeartBeat {
        self.heart_beat
    }

    /// Protocol version announced by the server, if any.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Subscribe to a destination and return the subscription id.
    ///
    /// # Errors
    ///
    /// Returns transport errors from the socket.
    pub async fn subscribe(&mut self, destination: &str) -> Result<String, ChannelError> {
        let id = format!("sub-{}", self.allocate_id());
        self.write(&Frame::subscribe(&id, destination)).await?;
        debug!(%id, %destination, "stomp: subscribed");
        Ok(id)
    }

    /// Send a text body to a destination.
    ///
    /// # Errors
    ///
    /// Returns transport errors from the socket.
    pub async fn send(&mut self, destination: &str, body: &str) -> Result<(), ChannelError> {
        self.write(&Frame::send(destination, body)).await
    }

    /// Wait for the next MESSAGE, RECEIPT, or close.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Protocol`] for an ERROR frame,
    /// [`ChannelError::HeartbeatTimeout`] when the server goes silent, and
    /// transport/codec errors.
    pub async fn next_event(&mut self) -> Result<SessionEvent, ChannelError> {
        loop {
            while let Some(item) = self.decoder.next_item()? {
                let Item::Frame(frame) = item else { continue };
                if let Some(event) = classify(frame)? {
                    return Ok(event);
                }
            }

            let deadline = self.read_deadline();
            tokio::select! {
                inbound = self.socket.recv() => match inbound {
                    Some(Ok(text)) => {
                        self.last_inbound = Instant::now();
                        self.decoder.push(&text);
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(SessionEvent::Closed),
                },
                () = tick(&mut self.send_tick) => {
                    self.socket.send(HEARTBEAT_EOL.to_owned()).await?;
                }
                () = sleep_until(deadline) => {
                    return Err(ChannelError::HeartbeatTimeout(self.silence_limit()));
                }
            }
        }
    }

    /// Best-effort DISCONNECT: wait up to `timeout` for the receipt, then close.
    pub async fn disconnect(mut self, timeout: Duration) {
        let receipt = format!("disconnect-{}", self.allocate_id());
        if let Err(e) = self.write(&Frame::disconnect(&receipt)).await {
            debug!(error = %e, "stomp: DISCONNECT not sent");
        } else {
            let wait = async {
                loop {
                    match self.next_event().await {
                        Ok(SessionEvent::Receipt(id)) if id == receipt => return,
                        Ok(SessionEvent::Closed) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            };
            if tokio::time::timeout(timeout, wait).await.is_err() {
                debug!(%receipt, "stomp: no DISCONNECT receipt");
            }
        }
        self.socket.close().await;
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        self.socket.send(encode_frame(frame)).await
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn silence_limit(&self) -> Duration {
        Duration::from_millis(self.heart_beat.incoming_ms) * HEARTBEAT_TOLERANCE
    }

    fn read_deadline(&self) -> Option<Instant> {
        (self.heart_beat.incoming_ms > 0).then(|| self.last_inbound + self.silence_limit())
    }
}

/// Read frames until one that is not a heart-beat arrives.
async fn read_frame(socket: &mut dyn Socket, decoder: &mut Decoder) -> Result<Frame, ChannelError> {
    loop {
        while let Some(item) = decoder.next_item()? {
            if let Item::Frame(frame) = item {
                return Ok(frame);
            }
        }
        match socket.recv().await {
            Some(Ok(text)) => decoder.push(&text),
            Some(Err(e)) => return Err(e),
            None => return Err(ChannelError::Closed),
        }
    }
}

fn classify(frame: Frame) -> Result<Option<SessionEvent>, ChannelError> {
    match frame.command {
        Command::Message => {
            let delivery = Delivery {
                subscription: frame.header("subscription").unwrap_or_default().to_owned(),
                destination: frame.header("destination").map(ToOwned::to_owned),
                message_id: frame.header("message-id").map(ToOwned::to_owned),
                body: frame.body,
            };
            Ok(Some(SessionEvent::Message(delivery)))
        }
        Command::Receipt => Ok(Some(SessionEvent::Receipt(
            frame.header("receipt-id").unwrap_or_default().to_owned(),
        ))),
        Command::Error => Err(protocol_error(&frame)),
        command => {
            warn!(%command, "stomp: ignoring unexpected server frame");
            Ok(None)
        }
    }
}

fn protocol_error(frame: &Frame) -> ChannelError {
    ChannelError::Protocol {
        message: frame.header("message").unwrap_or("ERROR frame").to_owned(),
        details: frame.body.clone(),
    }
}

fn send_interval(period_ms: u64) -> Option<Interval> {
    if period_ms == 0 {
        return None;
    }
    let period = Duration::from_millis(period_ms);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
