//! STOMP frame model and text codec for the notification transport.
//!
//! This crate owns the wire representation spoken over the WebSocket: a
//! command line, `name:value` header lines, a blank line, the body, and a
//! terminating NUL. Frames are text; bodies are opaque strings.
//!
//! DESIGN
//! ======
//! - `encode_frame` is infallible and always emits `content-length` for
//!   non-empty bodies so receivers never have to scan for NUL.
//! - `Decoder` is a streaming decoder: the transport may split one frame over
//!   several messages or pack several frames into one, so callers `push`
//!   chunks and drain `next_item` until it returns `None`.
//! - A frame larger than the decoder's limit is an error, whether announced by
//!   `content-length` or simply never terminated.
//! - Bare EOLs between frames are heart-beats and surface as
//!   [`Item::Heartbeat`] so the session can track liveness.

use std::fmt;

/// Line sent on an idle connection to keep it alive.
pub const HEARTBEAT_EOL: &str = "\n";

/// Error returned by [`Decoder::next_item`] and [`HeartBeat::parse`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The command line is not a STOMP command.
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),
    /// A header line has no `:` separator.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    /// A header contains a backslash escape STOMP 1.2 does not define.
    #[error("invalid header escape: \\{0}")]
    InvalidEscape(char),
    /// The `content-length` header is not a byte count.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    /// The byte after a `content-length` body is not NUL.
    #[error("frame body is not terminated by NUL")]
    MissingNul,
    /// A frame grew past the decoder's size limit without completing.
    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),
    /// The `heart-beat` header is not two comma-separated integers.
    #[error("invalid heart-beat header: {0}")]
    InvalidHeartBeat(String),
}

/// STOMP command carried on the first line of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    // Client commands.
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // Server commands.
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Wire spelling of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Result<Self, CodecError> {
        let command = match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(CodecError::UnknownCommand(other.to_owned())),
        };
        Ok(command)
    }

    /// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first one wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    /// CONNECT frame advertising STOMP 1.0–1.2 and the given heart-beat.
    #[must_use]
    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", "1.2,1.1,1.0")
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.header_value())
    }

    /// SUBSCRIBE frame with automatic acknowledgment.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    #[must_use]
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "text/plain;charset=UTF-8")
            .with_body(body)
    }

    #[must_use]
    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).with_header("receipt", receipt)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header named `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Encode a frame into its wire text, including the terminating NUL.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    let escape = frame.command.escapes_headers();
    let mut out = String::with_capacity(frame.body.len() + 64);

    out.push_str(frame.command.as_str());
    out.push('\n');
    for (name, value) in &frame.headers {
        push_header_part(&mut out, name, escape);
        out.push(':');
        push_header_part(&mut out, value, escape);
        out.push('\n');
    }
    if !frame.body.is_empty() && frame.header("content-length").is_none() {
        out.push_str("content-length:");
        out.push_str(&frame.body.len().to_string());
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&frame.body);
    out.push('\0');
    out
}

fn push_header_part(out: &mut String, raw: &str, escape: bool) {
    if !escape {
        out.push_str(raw);
        return;
    }
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape_header_part(raw: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(CodecError::InvalidEscape(other)),
            None => return Err(CodecError::InvalidEscape(' ')),
        }
    }
    Ok(out)
}

// =============================================================================
// DECODER
// =============================================================================

/// One unit produced by the decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Frame(Frame),
    /// A bare EOL between frames.
    Heartbeat,
}

/// Largest frame, NUL included, that [`Decoder::new`] will buffer.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Streaming frame decoder over text chunks.
#[derive(Debug)]
pub struct Decoder {
    buf: String,
    max_frame: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }
}

impl Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that fails once a single frame would exceed `max_frame` bytes.
    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { buf: String::new(), max_frame }
    }

    /// Append a chunk received from the transport.
    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
    }

    /// Bytes buffered but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete item, or `None` if more input is needed.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for malformed input. The buffer is cleared on
    /// error; the stream cannot be resynchronised.
    pub fn next_item(&mut self) -> Result<Option<Item>, CodecError> {
        let result = match self.decode() {
            Ok(None) if self.buf.len() > self.max_frame => Err(CodecError::FrameTooLarge(self.max_frame)),
            other => other,
        };
        if result.is_err() {
            self.buf.clear();
        }
        result
    }

    fn decode(&mut self) -> Result<Option<Item>, CodecError> {
        if self.buf.starts_with("\r\n") {
            self.buf.drain(..2);
            return Ok(Some(Item::Heartbeat));
        }
        if self.buf.starts_with('\n') {
            self.buf.drain(..1);
            return Ok(Some(Item::Heartbeat));
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        let Some((command_line, mut pos)) = next_line(&self.buf, 0) else {
            return Ok(None);
        };
        let command = Command::parse(command_line)?;

        let mut headers = Vec::new();
        loop {
            let Some((line, next)) = next_line(&self.buf, pos) else {
                return Ok(None);
            };
            pos = next;
            if line.is_empty() {
                break;
            }
            headers.push(parse_header(line, command.escapes_headers())?);
        }

        let body_start = pos;
        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| {
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| CodecError::InvalidContentLength(value.clone()))
            })
            .transpose()?;

        let body_end = if let Some(len) = content_length {
            let end = body_start
                .checked_add(len)
                .ok_or_else(|| CodecError::InvalidContentLength(len.to_string()))?;
            if end >= self.max_frame {
                return Err(CodecError::FrameTooLarge(self.max_frame));
            }
            if self.buf.len() <= end {
                return Ok(None);
            }
            if self.buf.as_bytes()[end] != 0 {
                return Err(CodecError::MissingNul);
            }
            end
        } else {
            match self.buf[body_start..].find('\0') {
                Some(offset) => body_start + offset,
                None => return Ok(None),
            }
        };

        let body = self.buf[body_start..body_end].to_owned();
        self.buf.drain(..=body_end);

        Ok(Some(Item::Frame(Frame { command, headers, body })))
    }
}

/// Return the line starting at `from` (without EOL) and the offset after it.
fn next_line(buf: &str, from: usize) -> Option<(&str, usize)> {
    let offset = buf[from..].find('\n')?;
    let line = &buf[from..from + offset];
    Some((line.strip_suffix('\r').unwrap_or(line), from + offset + 1))
}

fn parse_header(line: &str, escaped: bool) -> Result<(String, String), CodecError> {
    let Some((name, value)) = line.split_once(':') else {
        return Err(CodecError::MalformedHeader(line.to_owned()));
    };
    if escaped {
        Ok((unescape_header_part(name)?, unescape_header_part(value)?))
    } else {
        Ok((name.to_owned(), value.to_owned()))
    }
}

// =============================================================================
// HEART-BEAT
// =============================================================================

/// Heart-beat intervals in milliseconds; zero disables a direction.
///
/// From the sender's point of view: `outgoing_ms` is how often it can send,
/// `incoming_ms` how often it wants to receive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    #[must_use]
    pub const fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self { outgoing_ms, incoming_ms }
    }

    /// Parse a `heart-beat` header value such as `10000,10000`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidHeartBeat`] for anything but two integers.
    pub fn parse(value: &str) -> Result<Self, CodecError> {
        let invalid = || CodecError::InvalidHeartBeat(value.to_owned());
        let (out, inc) = value.split_once(',').ok_or_else(invalid)?;
        let outgoing_ms = out.trim().parse::<u64>().map_err(|_| invalid())?;
        let incoming_ms = inc.trim().parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { outgoing_ms, incoming_ms })
    }

    #[must_use]
    pub fn header_value(self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }

    /// Effective intervals for this side given the peer's advertised values.
    #[must_use]
    pub fn negotiate(self, peer: Self) -> Self {
        let outgoing_ms = if self.outgoing_ms == 0 || peer.incoming_ms == 0 {
            0
        } else {
            self.outgoing_ms.max(peer.incoming_ms)
        };
        let incoming_ms = if self.incoming_ms == 0 || peer.outgoing_ms == 0 {
            0
        } else {
            self.incoming_ms.max(peer.outgoing_ms)
        };
        Self { outgoing_ms, incoming_ms }
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
