use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::ParseError, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wsproto_core::{serve, EngineConfig, TcpTransport, TlsTransport, Update};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind the TCP listener on {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("the accept loop exited: {0}")]
    Accept(#[from] io::Error),
    #[error("failed to load the TLS identity from {path}: {source}")]
    TlsIdentity { path: PathBuf, source: native_tls::Error },
    #[error("failed to build the TLS acceptor: {0}")]
    TlsAcceptor(native_tls::Error),
}

fn configure_logging(level: &str) -> Result<(), ParseError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_new(level)?)
        .init();
    Ok(())
}

/// Tunables from the engine's configuration surface, exposed as flags.
#[derive(Parser, Debug)]
#[command(version = VERSION)]
pub struct Args {
    /// The verbosity of the application, options are TRACE, DEBUG, INFO, WARN and ERROR.
    #[arg(long, default_value = "INFO")]
    pub log_level: String,
    /// Address to bind the listener on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_address: String,
    /// Port to bind the listener on.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,
    /// Path to a PKCS#12 identity file. When set, the server speaks TLS
    /// instead of plain TCP.
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,
    /// Password for the PKCS#12 identity file.
    #[arg(long, default_value = "")]
    pub tls_password: String,
    /// Bytes read from a connection per driver cycle.
    #[arg(long, default_value_t = 16384)]
    pub read_rate: usize,
    /// Bytes written to a connection per driver cycle.
    #[arg(long, default_value_t = 16384)]
    pub write_rate: usize,
    /// Maximum size, in bytes, of the HTTP handshake request line and headers.
    #[arg(long, default_value_t = 8192)]
    pub max_handshake_length: usize,
    #[arg(long, default_value_t = false)]
    pub allow_rsv1: bool,
    #[arg(long, default_value_t = false)]
    pub allow_rsv2: bool,
    #[arg(long, default_value_t = false)]
    pub allow_rsv3: bool,
    /// Seconds a handshake may sit unaccepted before it is denied with 408.
    #[arg(long, default_value_t = 1.0)]
    pub socket_accept_timeout: f64,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let args = Args::parse();
    configure_logging(&args.log_level).expect("failed to configure logging to stdout");
    info!(version = VERSION, "starting wsproto-server");

    let config = EngineConfig {
        read_rate: args.read_rate,
        write_rate: args.write_rate,
        max_handshake_length: args.max_handshake_length,
        allow_rsv1: args.allow_rsv1,
        allow_rsv2: args.allow_rsv2,
        allow_rsv3: args.allow_rsv3,
        server_id: format!("wsproto/{VERSION}"),
    };
    let accept_timeout = Duration::from_secs_f64(args.socket_accept_timeout);

    let bind_addr = format!("{}:{}", args.bind_address, args.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|source| ServerError::Bind { addr: bind_addr.clone(), source })?;
    info!(addr = %bind_addr, "listening");

    let (tx, mut rx) = mpsc::unbounded_channel();

    let driver_task = match args.tls_cert {
        Some(cert_path) => {
            let identity_bytes = std::fs::read(&cert_path).map_err(ServerError::Accept)?;
            let identity = native_tls::Identity::from_pkcs12(&identity_bytes, &args.tls_password)
                .map_err(|source| ServerError::TlsIdentity { path: cert_path, source })?;
            let acceptor = tokio_native_tls::TlsAcceptor::from(
                native_tls::TlsAcceptor::new(identity).map_err(ServerError::TlsAcceptor)?,
            );
            tokio::spawn(serve(listener, config, accept_timeout, tx, move |stream, addr| {
                let acceptor = acceptor.clone();
                async move {
                    let tls_stream = acceptor.accept(stream).await.map_err(|error| {
                        io::Error::new(io::ErrorKind::Other, format!("TLS handshake with {addr} failed: {error}"))
                    })?;
                    Ok(TlsTransport::new(tls_stream))
                }
            }))
        }
        None => tokio::spawn(serve(listener, config, accept_timeout, tx, |stream, _addr| async move {
            Ok(TcpTransport::new(stream))
        })),
    };

    while let Some(update) = rx.recv().await {
        log_update(update);
    }

    match driver_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(ServerError::Accept(error)),
        Err(join_error) => {
            error!(%join_error, "accept loop task panicked");
            Ok(())
        }
    }
}

fn log_update(update: Update) {
    use wsproto_core::Update::*;
    match &update {
        NewConnection(id) => info!(id, "handshake accepted"),
        ConnectionAccepted(id) => info!(id, "connection open"),
        ConnectionDenied(id) => warn!(id, "connection denied"),
        HandshakeFailure(id) => warn!(id, "handshake failed"),
        HandshakeTooLarge(id) => warn!(id, "handshake exceeded the size limit"),
        AcceptTimeoutPassed(id) => warn!(id, "accept timeout passed, connection denied"),
        ReadProtocolError(id) | ReadRsvBitSet(id) | ReadInvalidPayload(id) | ReadInvalidHeaders(id) => {
            warn!(id, ?update, "protocol violation, connection is closing")
        }
        SockDisconnect(id) | ReadDisconnect(id) | ReadUnexpectedDisconnect(id) => {
            info!(id, "connection closed")
        }
        ReadError(id, reason) => error!(id, reason, "read error"),
        WriteError(id, reason) => error!(id, reason, "write error"),
        SelectError(reason) => error!(reason, "driver select error"),
        Read(id, _) => info!(id, "message received"),
        Ping(id, _) => info!(id, "ping received"),
        ReadEmpty(id) => info!(id, "read buffer empty"),
        ReadUnhandled(id, opcode) => warn!(id, ?opcode, "unhandled opcode"),
    }
}
