//! In-memory transport and recording renderer shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use frames::{Command, Decoder, Frame, Item, encode_frame};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, timeout};
use url::Url;

use crate::error::ChannelError;
use crate::render::Renderer;
use crate::transport::{Connector, Socket};

const WAIT: Duration = Duration::from_secs(30);

// =============================================================================
// SOCKETS
// =============================================================================

pub(crate) struct MockSocket {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    closed: bool,
}

/// The server's end of a [`MockSocket`].
pub(crate) struct ServerEnd {
    pub url: Option<Url>,
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
    decoder: Decoder,
    frames: VecDeque<Frame>,
    pub heartbeats: usize,
}

pub(crate) fn socket_pair() -> (MockSocket, ServerEnd) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let socket = MockSocket { inbound, outbound, closed: false };
    let server = ServerEnd {
        url: None,
        to_client: Some(to_client),
        from_client,
        decoder: Decoder::new(),
        frames: VecDeque::new(),
        heartbeats: 0,
    };
    (socket, server)
}

#[async_trait]
impl Socket for MockSocket {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Transport("socket closed".into()));
        }
        self.outbound
            .send(text)
            .map_err(|_| ChannelError::Transport("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.inbound.close();
    }
}

impl ServerEnd {
    /// Push raw text to the client. Returns `false` if the client is gone.
    pub fn push_raw(&self, text: &str) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(text.to_owned()).is_ok())
    }

    pub fn push(&self, frame: &Frame) -> bool {
        self.push_raw(&encode_frame(frame))
    }

    pub fn push_connected(&self) {
        assert!(self.push(
            &Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "0,0"),
        ));
    }

    pub fn push_message(&self, subscription: &str, body: &str) -> bool {
        self.push(
            &Frame::new(Command::Message)
                .with_header("subscription", subscription)
                .with_header("destination", "/user/test/notifications")
                .with_header("message-id", "m-1")
                .with_body(body),
        )
    }

    /// Close the server side, as if the network dropped.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Next frame from the client, skipping heart-beats. `None` once closed.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                return Some(frame);
            }
            let text = timeout(WAIT, self.from_client.recv()).await.expect("client frame in time")?;
            self.decoder.push(&text);
            while let Some(item) = self.decoder.next_item().expect("client frame decodes") {
                match item {
                    Item::Frame(frame) => self.frames.push_back(frame),
                    Item::Heartbeat => self.heartbeats += 1,
                }
            }
        }
    }

    /// Decode whatever the client has sent so far without waiting.
    pub fn drain_pending(&mut self) {
        while let Ok(text) = self.from_client.try_recv() {
            self.decoder.push(&text);
        }
        while let Some(item) = self.decoder.next_item().expect("client frame decodes") {
            match item {
                Item::Frame(frame) => self.frames.push_back(frame),
                Item::Heartbeat => self.heartbeats += 1,
            }
        }
    }

    pub async fn expect_frame(&mut self, command: Command) -> Frame {
        let frame = self.next_frame().await.expect("client still connected");
        assert_eq!(frame.command, command, "unexpected client frame: {frame:?}");
        frame
    }

    /// Wait until the client drops its socket, collecting remaining frames.
    pub async fn closed(&mut self) -> Vec<Frame> {
        let mut rest = Vec::new();
        while let Some(frame) = self.next_frame().await {
            rest.push(frame);
        }
        rest
    }
}

// =============================================================================
// CONNECTOR
// =============================================================================

/// Hands each opened socket's server end to the test through a channel.
pub(crate) struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refuse: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

impl MockConnector {
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self { accepted, refuse: AtomicBool::new(false), attempts: Mutex::new(Vec::new()) };
        (std::sync::Arc::new(connector), rx)
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().expect("attempts lock").clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn Socket>, ChannelError> {
        self.attempts.lock().expect("attempts lock").push(Instant::now());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Transport("connection refused".into()));
        }
        let (socket, mut server) = socket_pair();
        server.url = Some(url.clone());
        self.accepted
            .send(server)
            .map_err(|_| ChannelError::Transport("test dropped acceptor".into()))?;
        Ok(Box::new(socket))
    }
}

/// Next accepted connection with CONNECT answered by CONNECTED.
pub(crate) async fn accept_session(accepted: &mut mpsc::UnboundedReceiver<ServerEnd>) -> (ServerEnd, Frame) {
    let mut server = timeout(WAIT, accepted.recv())
        .await
        .expect("connection in time")
        .expect("connector alive");
    let connect = server.expect_frame(Command::Connect).await;
    server.push_connected();
    (server, connect)
}

// =============================================================================
// RENDERER
// =============================================================================

pub(crate) struct RecordingRenderer {
    shown: Mutex<Vec<String>>,
    tx: mpsc::UnboundedSender<String>,
}

impl RecordingRenderer {
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (std::sync::Arc::new(Self { shown: Mutex::new(Vec::new()), tx }), rx)
    }

    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().expect("shown lock").clone()
    }
}

impl Renderer for RecordingRenderer {
    fn show(&self, payload: &str) {
        self.shown.lock().expect("shown lock").push(payload.to_owned());
        // Receiver may be dropped by tests that only inspect `shown()`.
        let _ = self.tx.send(payload.to_owned());
    }
}

pub(crate) async fn next_shown(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(WAIT, rx.recv())
        .await
        .expect("notification shown in time")
        .expect("renderer alive")
}
