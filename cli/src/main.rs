use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use notify_channel::config::parse_endpoint;
use notify_channel::{
    ChannelConfig, ChannelError, Connector, Delivery, FileIdentityStore, NotificationChannel, Notifier, Page, Session,
    SessionEvent, SessionSettings, Toast, ToastConfig, ToastRenderer, UserId, WebSocketConnector, identity_channel,
};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("no notification within {0:?}")]
    Timeout(Duration),
    #[error("failed to wait for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "notify-cli", about = "Per-user STOMP notification listener")]
struct Cli {
    /// WebSocket endpoint; overrides NOTIFY_ENDPOINT from the environment config.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[arg(long, value_enum, default_value_t = Output::Text, global = true)]
    output: Output,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and render notifications until ctrl-c.
    Listen(ListenArgs),
    /// Publish to the ping destination and wait for the echoed notification.
    Ping(PingArgs),
}

#[derive(Args, Debug)]
struct ListenArgs {
    #[arg(long, env = "NOTIFY_USER_ID", required_unless_present = "identity_file")]
    user_id: Option<String>,

    /// File holding the current user id; changes made by other processes reconnect.
    #[arg(long, env = "NOTIFY_IDENTITY_FILE")]
    identity_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PingArgs {
    #[arg(long, env = "NOTIFY_USER_ID")]
    user_id: String,

    #[arg(long, default_value = "/app/ping")]
    destination: String,

    #[arg(long, default_value = "ping")]
    message: String,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Output {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ChannelConfig::from_env()?;
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = parse_endpoint(endpoint)?;
    }

    match cli.command {
        Command::Listen(args) => run_listen(config, cli.output, args).await,
        Command::Ping(args) => run_ping(config, cli.output, args).await,
    }
}

async fn run_listen(config: ChannelConfig, output: Output, args: ListenArgs) -> Result<(), CliError> {
    let page = Arc::new(TerminalPage { output });
    let renderer = Arc::new(ToastRenderer::new(page, ToastConfig::from_env()?));
    let channel = NotificationChannel::websocket(config, renderer);

    let store = args.identity_file.map(FileIdentityStore::new);
    let initial = match args.user_id {
        Some(raw) => Some(UserId::new(raw)?),
        None => match &store {
            Some(store) => store.load()?,
            None => None,
        },
    };

    let (publisher, watch) = identity_channel(initial);
    let _watcher = match &store {
        Some(store) => Some(store.watch(publisher.clone())?),
        None => None,
    };
    if publisher.current().is_none() {
        info!("waiting for a user id in the identity file");
    }

    let notifier = Notifier::spawn(channel, watch, store);
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    notifier.shutdown().await;
    Ok(())
}

async fn run_ping(config: ChannelConfig, output: Output, args: PingArgs) -> Result<(), CliError> {
    let user = UserId::new(args.user_id)?;
    let socket = WebSocketConnector.open(&config.endpoint_for(&user)).await?;
    let settings = SessionSettings {
        host: config.host(),
        heart_beat: config.heart_beat,
        handshake_timeout: config.handshake_timeout,
        connect_headers: config.user_header.iter().map(|name| (name.clone(), user.to_string())).collect(),
    };
    let (mut session, _connected) = Session::handshake(socket, &settings).await?;

    let subscription = session.subscribe(&config.topic_for(&user)).await?;
    if let Some(destination) = &config.register_destination {
        session.send(destination, user.as_str()).await?;
    }

    let started = Instant::now();
    session.send(&args.destination, &args.message).await?;
    let limit = Duration::from_secs(args.timeout_secs);
    let delivery = tokio::time::timeout(limit, next_delivery(&mut session, &subscription))
        .await
        .map_err(|_| CliError::Timeout(limit))??;
    let elapsed = started.elapsed();
    session.disconnect(Duration::from_secs(1)).await;

    match output {
        Output::Text => println!("{} ({} ms)", delivery.body, elapsed.as_millis()),
        Output::Json => print_json(&json!({
            "user": user,
            "body": delivery.body,
            "message_id": delivery.message_id,
            "elapsed_ms": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }))?,
    }
    Ok(())
}

async fn next_delivery(session: &mut Session, subscription: &str) -> Result<Delivery, ChannelError> {
    loop {
        match session.next_event().await? {
            SessionEvent::Message(delivery) if delivery.subscription == subscription => return Ok(delivery),
            SessionEvent::Closed => return Err(ChannelError::Closed),
            SessionEvent::Message(_) | SessionEvent::Receipt(_) => {}
        }
    }
}

/// Prints toasts as they appear and disappear.
struct TerminalPage {
    output: Output,
}

impl Page for TerminalPage {
    fn insert(&self, toast: &Toast) {
        match self.output {
            Output::Text => println!("[{}] {}", toast.position.as_str(), toast.text),
            Output::Json => {
                if let Err(e) = print_json(&json!({ "event": "show", "toast": toast })) {
                    warn!(error = %e, "toast not printed");
                }
            }
        }
    }

    fn remove(&self, id: Uuid) {
        if self.output == Output::Json {
            if let Err(e) = print_json(&json!({ "event": "remove", "id": id })) {
                warn!(error = %e, "toast removal not printed");
            }
        }
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
