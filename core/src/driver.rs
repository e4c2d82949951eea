//! The event driver: §4.D. Multiplexes every live engine concurrently,
//! forwards their `Update` events, runs the server accept loop, and sweeps
//! handshakes that overstay `ACCEPT_TIMEOUT`.
//!
//! §5 describes the source's scheduling model as "single-threaded
//! cooperative": one loop calls a readiness primitive, then pumps engines
//! serially. The idiomatic Rust analogue of that readiness primitive is not
//! a raw `select(2)`/`mio` call — it's awaiting each engine's own
//! [`crate::transport::Transport::read_chunk`]/`write_chunk` futures
//! concurrently; the runtime wakes this task exactly when a transport is
//! ready, which is the readiness primitive's contract restated in terms of
//! `Future::poll`. [`Driver::run_cycle`] drives one such pass.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::engine::{Engine, EngineConfig};
use crate::event::{ConnectionId, Update};
use crate::transport::{TcpTransport, Transport};

/// `ACCEPT_TIMEOUT` per §6: how long a server-side connection may sit in
/// `Handshaking` before the sweep denies and drops it.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// How often `run_cycle` falls through to the accept-timeout sweep even if
/// no connection produced I/O — the readiness primitive's timeout per
/// §4.D ("given... a timeout, it blocks until at least one is ready or the
/// timeout elapses"). Sampled well under `ACCEPT_TIMEOUT`'s one-second
/// granularity so the sweep stays responsive.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Owns the authoritative collection of engines, keyed by connection index
/// (§5: "the driver holds the authoritative collection keyed by connection
/// index"; §9: "the driver is the sole owner").
pub struct Driver<T: Transport> {
    connections: HashMap<ConnectionId, Engine<T>>,
    next_id: ConnectionId,
    accept_timeout: Duration,
}

impl<T: Transport> Default for Driver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Driver<T> {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 0,
            accept_timeout: ACCEPT_TIMEOUT,
        }
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// The next monotonically increasing connection index, per §9's
    /// ownership note.
    pub fn next_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Take ownership of `engine`, keyed by its own id.
    pub fn insert(&mut self, engine: Engine<T>) -> ConnectionId {
        let id = engine.id();
        self.connections.insert(id, engine);
        id
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// One pass over every live connection. Each connection gets a single
    /// future that flushes its pending write (if any) and then awaits its
    /// next read — write-before-read so a connection's own just-enqueued
    /// bytes (e.g. a freshly constructed client's handshake request) go out
    /// before this same connection blocks waiting on a reply to them.
    /// Different connections' futures still race freely in one
    /// `FuturesUnordered`, which is this implementation's readiness
    /// primitive: the cycle blocks for the first one to resolve, then
    /// drains any others that are *also already* resolved without
    /// further waiting, mirroring select()'s "many fds ready at once"
    /// semantics (§4.D steps 2/4/5). Finishes with the accept-timeout
    /// sweep (step 6) and drops anything that closed this cycle.
    pub async fn run_cycle(&mut self) -> Vec<Update> {
        let mut set: FuturesUnordered<_> = self
            .connections
            .values_mut()
            .map(|engine| async move {
                if engine.has_pending_write() {
                    if let Some(write_error) = engine.handle_write().await {
                        let mut events = engine.handle_read().await;
                        events.insert(0, write_error);
                        return events;
                    }
                }
                engine.handle_read().await
            })
            .collect();

        let mut updates = Vec::new();
        tokio::select! {
            first = set.next() => {
                if let Some(first) = first {
                    updates.extend(first);
                    while let Some(Some(more)) = set.next().now_or_never() {
                        updates.extend(more);
                    }
                }
            }
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
        }
        drop(set);

        updates.extend(self.sweep_accept_timeouts().await);
        self.connections.retain(|_, engine| !engine.is_closed());

        updates
    }

    /// §4.D step 6. Source ambiguity resolved here (see DESIGN.md): "has an
    /// HTTP-valid handshake but is not yet accepted" is read as "still in
    /// the `Handshaking` phase", since a validated request moves straight
    /// to `Open` within the same read cycle in this implementation — there
    /// is no separate "validated but unaccepted" state to distinguish.
    ///
    /// `deny()` only enqueues the 408 response; it has to be flushed with
    /// `handle_write()` before the engine (and its transport) is dropped,
    /// or the peer never sees the response and just observes a bare close.
    async fn sweep_accept_timeouts(&mut self) -> Vec<Update> {
        let overdue: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, engine)| {
                engine.is_handshake_pending() && engine.opened_at().elapsed() >= self.accept_timeout
            })
            .map(|(id, _)| *id)
            .collect();

        let mut updates = Vec::with_capacity(overdue.len());
        for id in overdue {
            if let Some(engine) = self.connections.get_mut(&id) {
                warn!(id, "accept timeout passed without a completed handshake");
                engine.deny(408);
                while engine.has_pending_write() && !engine.is_closed() {
                    if engine.handle_write().await.is_some() {
                        break;
                    }
                }
                updates.push(Update::AcceptTimeoutPassed(id));
            }
            self.connections.remove(&id);
        }
        updates
    }
}

/// Bind `addr` and run the server accept loop, forwarding every `Update`
/// from every connection to `tx` until the channel's receiver is dropped.
/// `wrap` turns a freshly accepted `TcpStream` into the transport type `T`
/// (an instant `Ok` for plain TCP, an async TLS handshake for
/// `TlsTransport`), matching §1's treatment of TLS as an external
/// transport wrapper. A connection whose `wrap` fails (e.g. a failed TLS
/// handshake) is logged and dropped rather than taking down the server.
pub async fn serve<T, F, Fut>(
    listener: TcpListener,
    config: EngineConfig,
    accept_timeout: Duration,
    tx: UnboundedSender<Update>,
    mut wrap: F,
) -> std::io::Result<()>
where
    T: Transport,
    F: FnMut(TcpStream, SocketAddr) -> Fut,
    Fut: std::future::Future<Output = std::io::Result<T>>,
{
    let mut driver = Driver::new().with_accept_timeout(accept_timeout);

    loop {
        if driver.is_empty() {
            let (stream, addr) = listener.accept().await?;
            accept_one(&mut driver, &config, &mut wrap, stream, addr).await;
            continue;
        }

        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                accept_one(&mut driver, &config, &mut wrap, stream, addr).await;
            }
            updates = driver.run_cycle() => {
                for update in updates {
                    if tx.send(update).is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn accept_one<T, F, Fut>(
    driver: &mut Driver<T>,
    config: &EngineConfig,
    wrap: &mut F,
    stream: TcpStream,
    addr: SocketAddr,
) where
    T: Transport,
    F: FnMut(TcpStream, SocketAddr) -> Fut,
    Fut: std::future::Future<Output = std::io::Result<T>>,
{
    let id = driver.next_id();
    match wrap(stream, addr).await {
        Ok(transport) => {
            info!(id, %addr, "accepted connection");
            driver.insert(Engine::accept_server(id, transport, config.clone()));
        }
        Err(error) => {
            warn!(%addr, %error, "transport setup failed for accepted connection");
        }
    }
}

/// Connect a plain-TCP client engine and return it ready for insertion into
/// a `Driver<TcpTransport>`. TLS clients construct a `TlsTransport`
/// themselves and call `Engine::connect_client` directly — TLS negotiation
/// is an external collaborator per §1, not core's concern.
pub async fn connect_plain(
    addr: impl tokio::net::ToSocketAddrs,
    host: &str,
    port: u16,
    path: &str,
    config: EngineConfig,
) -> std::io::Result<Engine<TcpTransport>> {
    let stream = TcpStream::connect(addr).await?;
    let transport = TcpTransport::new(stream);
    Ok(Engine::connect_client(0, transport, config, host, port, path))
}
