use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Sender};
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::ParseError, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wsproto_core::{Engine, EngineConfig, Message as WsMessage, Opcode, TcpTransport, TlsTransport, Transport, Update};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {source}")]
    Connect { addr: String, source: std::io::Error },
    #[error("the TLS handshake with {addr} failed: {source}")]
    Tls { addr: String, source: native_tls::Error },
    #[error("the connection was denied by the server")]
    Denied,
    #[error("the handshake failed or the server is not speaking WebSocket")]
    HandshakeFailed,
}

fn configure_logging(level: &str) -> Result<(), ParseError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_new(level)?)
        .init();
    Ok(())
}

/// Connects once, exchanges text frames read line-by-line from stdin, and
/// prints inbound messages to stdout until the connection closes.
#[derive(Parser, Debug)]
#[command(version = VERSION)]
pub struct Args {
    /// The verbosity of the application, options are TRACE, DEBUG, INFO, WARN and ERROR.
    #[arg(long, default_value = "INFO")]
    pub log_level: String,
    /// Server hostname or IP.
    #[arg(short, long)]
    pub server: String,
    /// Port number.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,
    /// Request path for the HTTP upgrade.
    #[arg(long, default_value = "/")]
    pub path: String,
    /// Speak TLS to the server.
    #[arg(long, default_value_t = false)]
    pub use_tls: bool,
    /// Accept a self-signed server certificate. Only meaningful with `--use-tls`.
    #[arg(long, default_value_t = false)]
    pub allow_self_signed: bool,
    /// Path to a PEM root certificate to trust in addition to the system store.
    #[arg(long)]
    pub tls_ca_cert: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    configure_logging(&args.log_level).expect("failed to configure logging to stdout");
    info! {VERSION};

    let config = EngineConfig::default();

    let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
    tokio::spawn(read_stdin(stdin_tx));

    if args.use_tls {
        let engine = connect_tls(&args, config).await?;
        run(engine, &mut stdin_rx).await
    } else {
        let engine = connect_plain(&args, config).await?;
        run(engine, &mut stdin_rx).await
    }
}

async fn connect_plain(args: &Args, config: EngineConfig) -> Result<Engine<TcpTransport>> {
    let addr = format!("{}:{}", args.server, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ClientError::Connect { addr: addr.clone(), source })?;
    debug!(%addr, "TCP connected, sending handshake");
    Ok(Engine::connect_client(0, TcpTransport::new(stream), config, &args.server, args.port, &args.path))
}

async fn connect_tls(args: &Args, config: EngineConfig) -> Result<Engine<TlsTransport>> {
    let addr = format!("{}:{}", args.server, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ClientError::Connect { addr: addr.clone(), source })?;

    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(args.allow_self_signed);
    if let Some(ca_path) = &args.tls_ca_cert {
        let pem = std::fs::read(ca_path).map_err(|source| ClientError::Connect { addr: addr.clone(), source })?;
        let cert = native_tls::Certificate::from_pem(&pem)
            .map_err(|source| ClientError::Tls { addr: addr.clone(), source })?;
        builder.add_root_certificate(cert);
    }
    let connector = builder
        .build()
        .map_err(|source| ClientError::Tls { addr: addr.clone(), source })?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let tls_stream = connector
        .connect(&args.server, stream)
        .await
        .map_err(|source| ClientError::Tls { addr: addr.clone(), source })?;
    debug!(%addr, "TLS established, sending handshake");
    Ok(Engine::connect_client(0, TlsTransport::new(tls_stream), config, &args.server, args.port, &args.path))
}

/// Pumps a single engine: writes lines from stdin as Text frames, prints
/// inbound `Read` messages to stdout, and exits once the connection
/// terminates. Mirrors the teacher's stdin-forwarding loop
/// (`client/src/client.rs::spawn`) but driven through the engine directly
/// rather than a `Driver`, since there is exactly one connection to pump.
///
/// `Engine::connect_client` enqueues the handshake request into the
/// control queue but never sends it — flush it here before the first
/// `handle_read`, same write-before-read ordering `Driver::run_cycle`
/// uses, or this engine blocks on a reply to a request it never wrote.
async fn run<T: Transport>(mut engine: Engine<T>, stdin_rx: &mut mpsc::Receiver<String>) -> Result<()> {
    if engine.has_pending_write() {
        if let Some(error) = engine.handle_write().await {
            if handle_update(error).await? {
                return Ok(());
            }
        }
    }

    let mut stdin_open = true;
    loop {
        // `true` once an update says the event stream is over. Flushing any
        // frame that update queued (e.g. the echoed Close `handle_close_frame`
        // enqueues for `ReadDisconnect`) happens below before we act on it —
        // returning straight out of the match would drop that frame unsent.
        let mut terminal = false;

        tokio::select! {
            line = stdin_rx.recv(), if stdin_open => {
                match line {
                    Some(text) => engine.write(text.as_bytes(), Opcode::Text, true),
                    None => {
                        stdin_open = false;
                        engine.send_close(1000, "client shutting down");
                        engine.latch_close_after_write();
                    }
                }
            }
            updates = engine.handle_read() => {
                for update in updates {
                    if handle_update(update).await? {
                        terminal = true;
                    }
                }
            }
        }

        if engine.has_pending_write() {
            if let Some(error) = engine.handle_write().await {
                if handle_update(error).await? {
                    terminal = true;
                }
            }
        }

        if terminal || engine.is_closed() {
            return Ok(());
        }
    }
}

/// Returns `true` if the connection's event stream is over.
async fn handle_update(update: Update) -> Result<bool> {
    match update {
        Update::ConnectionAccepted(id) => {
            info!(id, "connected");
            Ok(false)
        }
        Update::ConnectionDenied(id) => {
            warn!(id, "server denied the connection");
            Err(ClientError::Denied.into())
        }
        Update::HandshakeFailure(id) => {
            warn!(id, "handshake failed");
            Err(ClientError::HandshakeFailed.into())
        }
        Update::Read(id, WsMessage::Text(text)) => {
            debug!(id, "message received");
            println!("{text}");
            Ok(false)
        }
        Update::Read(id, WsMessage::Binary(bytes)) => {
            debug!(id, len = bytes.len(), "binary message received");
            tokio::io::stdout().write_all(&bytes).await.ok();
            Ok(false)
        }
        Update::Ping(id, _) => {
            debug!(id, "ping received");
            Ok(false)
        }
        Update::SockDisconnect(id) | Update::ReadUnexpectedDisconnect(id) | Update::ReadDisconnect(id) => {
            info!(id, "connection closed");
            Ok(true)
        }
        Update::AcceptTimeoutPassed(id) => {
            warn!(id, "accept timeout passed");
            Ok(true)
        }
        other => {
            debug!(?other, "update");
            Ok(false)
        }
    }
}

async fn read_stdin(tx: Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
}
