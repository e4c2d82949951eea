//! The per-connection protocol engine: §4.C. A buffered state machine that
//! consumes byte chunks from a [`Transport`], reassembles fragmented
//! messages, enforces protocol conformance, and serializes outgoing frames
//! with correct write-side priority (control before data).

use std::collections::VecDeque;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::EngineError;
use crate::event::{ConnectionId, Message, Update};
use crate::frame::{
    decode_header, decode_payload, encode_frame, generate_mask_key, is_receivable_close_code,
    is_sendable_close_code, DecodeOutcome, Opcode,
};
pub use crate::frame::Role;
use crate::handshake::{
    self, client_request, error_response, find_terminator, generate_sec_key, server_accept_response,
    validate_request, validate_response, HANDSHAKE_MAXLENGTH,
};
use crate::transport::Transport;

/// Connection lifecycle phase, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshaking,
    Open,
    Closing,
    Closed,
}

/// Tunable per-engine configuration, per §6.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub read_rate: usize,
    pub write_rate: usize,
    pub max_handshake_length: usize,
    pub allow_rsv1: bool,
    pub allow_rsv2: bool,
    pub allow_rsv3: bool,
    pub server_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_rate: 16384,
            write_rate: 16384,
            max_handshake_length: HANDSHAKE_MAXLENGTH,
            allow_rsv1: false,
            allow_rsv2: false,
            allow_rsv3: false,
            server_id: format!("wsproto/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Maps an [`crate::error::HandshakeError`] to the HTTP status §4.B assigns
/// it.
fn status_for_handshake_error(err: &crate::error::HandshakeError) -> u16 {
    use crate::error::HandshakeError::*;
    match err {
        WrongMethod => 405,
        WrongVersion => 426,
        _ => 400,
    }
}

fn http_reason(code: u16) -> &'static str {
    match code {
        400 => "Bad Request",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        426 => "Upgrade Required",
        _ => "Error",
    }
}

/// The per-connection state machine. Generic over [`Transport`] so the same
/// logic drives plain TCP and TLS connections alike.
pub struct Engine<T: Transport> {
    id: ConnectionId,
    role: Role,
    transport: T,
    config: EngineConfig,

    phase: Phase,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    control_queue: VecDeque<Vec<u8>>,
    data_queue: VecDeque<Vec<u8>>,
    partial_message: Option<(Opcode, Vec<u8>)>,
    next_read_hint: Option<usize>,
    close_after_write: bool,
    peer_sent_close: bool,
    local_sent_close: bool,
    pending_pongs: Vec<Vec<u8>>,

    // client-only
    client_sec_key: Option<String>,
    // server-only: the key parsed out of a request not yet accepted/denied
    pending_sec_key: Option<String>,

    opened_at: Instant,
}

impl<T: Transport> Engine<T> {
    /// Construct a client-role engine and enqueue its upgrade request.
    pub fn connect_client(
        id: ConnectionId,
        transport: T,
        config: EngineConfig,
        host: &str,
        port: u16,
        path: &str,
    ) -> Self {
        let sec_key = generate_sec_key();
        let mut engine = Self {
            id,
            role: Role::Client,
            transport,
            config,
            phase: Phase::Handshaking,
            read_buffer: Vec::new(),
            write_buffer: Vec::new(),
            control_queue: VecDeque::new(),
            data_queue: VecDeque::new(),
            partial_message: None,
            next_read_hint: None,
            close_after_write: false,
            peer_sent_close: false,
            local_sent_close: false,
            pending_pongs: Vec::new(),
            client_sec_key: Some(sec_key.clone()),
            pending_sec_key: None,
            opened_at: Instant::now(),
        };
        let request = client_request(host, port, path, &sec_key);
        engine.control_queue.push_back(request.into_bytes());
        engine
    }

    /// Construct a server-role engine for a freshly accepted TCP connection,
    /// awaiting its handshake.
    pub fn accept_server(id: ConnectionId, transport: T, config: EngineConfig) -> Self {
        Self {
            id,
            role: Role::Server,
            transport,
            config,
            phase: Phase::Handshaking,
            read_buffer: Vec::new(),
            write_buffer: Vec::new(),
            control_queue: VecDeque::new(),
            data_queue: VecDeque::new(),
            partial_message: None,
            next_read_hint: None,
            close_after_write: false,
            peer_sent_close: false,
            local_sent_close: false,
            pending_pongs: Vec::new(),
            client_sec_key: None,
            pending_sec_key: None,
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_handshake_pending(&self) -> bool {
        self.phase == Phase::Handshaking
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn is_disconnecting(&self) -> bool {
        self.close_after_write || self.peer_sent_close || self.local_sent_close
    }

    pub fn has_pending_write(&self) -> bool {
        !self.write_buffer.is_empty()
            || !self.control_queue.is_empty()
            || !self.data_queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    fn next_mask(&self) -> Option<[u8; 4]> {
        match self.role {
            Role::Client => Some(generate_mask_key()),
            Role::Server => None,
        }
    }

    fn frame_role(&self) -> Role {
        // Frames arriving at a server must be masked; frames arriving at a
        // client must not be. decode_header validates against the role of
        // the *sender*, i.e. the peer — which is the opposite of our own.
        match self.role {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }

    // ---- public write-side operations (§4.C) ----

    /// Frame and enqueue a message. Control opcodes go to the priority
    /// queue; data opcodes to the data queue.
    pub fn write(&mut self, payload: &[u8], opcode: Opcode, is_final: bool) {
        let mask = self.next_mask();
        let frame = encode_frame(opcode, payload, is_final, mask);
        if opcode.is_control() {
            self.control_queue.push_back(frame);
        } else {
            self.data_queue.push_back(frame);
        }
    }

    /// Split `payload` into `frame_size`-byte frames: the first carries
    /// `opcode` with `fin=false`, the middle frames use `Continuation` with
    /// `fin=false`, and the last uses `Continuation` with `fin=true`. A
    /// server-side convenience for streaming large payloads without
    /// buffering the whole message as one frame.
    pub fn write_multi(
        &mut self,
        payload: &[u8],
        opcode: Opcode,
        frame_size: usize,
    ) -> Result<(), EngineError> {
        if opcode.is_control() {
            return Err(EngineError::InvalidWriteMultiOpcode(opcode));
        }
        if frame_size == 0 {
            return Err(EngineError::InvalidFrameSize);
        }

        if payload.is_empty() {
            let mask = self.next_mask();
            self.data_queue
                .push_back(encode_frame(opcode, &[], true, mask));
            return Ok(());
        }

        let chunks: Vec<&[u8]> = payload.chunks(frame_size).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let op = if i == 0 { opcode } else { Opcode::Continuation };
            let fin = i == last;
            let mask = self.next_mask();
            self.data_queue.push_back(encode_frame(op, chunk, fin, mask));
        }
        Ok(())
    }

    /// Enqueue a Close frame and latch `local_sent_close`. Does not close
    /// the transport; call [`Self::latch_close_after_write`] for that.
    pub fn send_close(&mut self, code: u16, reason: &str) {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        let mask = self.next_mask();
        self.control_queue
            .push_back(encode_frame(Opcode::Close, &payload, true, mask));
        self.local_sent_close = true;
    }

    /// Schedule transport shutdown once all queues and the in-flight write
    /// buffer are empty.
    pub fn latch_close_after_write(&mut self) {
        self.close_after_write = true;
    }

    /// Server-only: accept a pending handshake, enqueueing the `101`
    /// response.
    pub fn accept(&mut self, protocol: Option<&str>) {
        let sec_key = self.pending_sec_key.clone().unwrap_or_default();
        let response = server_accept_response(&sec_key, &self.config.server_id, protocol);
        self.control_queue.push_back(response.into_bytes());
        self.phase = Phase::Open;
    }

    /// Server-only: deny a pending handshake with an HTTP error response
    /// and schedule transport teardown.
    pub fn deny(&mut self, http_code: u16) {
        let response = error_response(http_code, http_reason(http_code), &self.config.server_id);
        self.control_queue.push_back(response.into_bytes());
        self.close_after_write = true;
    }

    // ---- read pipeline (§4.C) ----

    /// Consume up to `min(next_read_hint, read_rate)` bytes from the
    /// transport and advance the state machine, returning every `Update`
    /// generated this cycle.
    pub async fn handle_read(&mut self) -> Vec<Update> {
        let cap = self
            .next_read_hint
            .unwrap_or(self.config.read_rate)
            .min(self.config.read_rate)
            .max(1);

        match self.transport.read_chunk(cap).await {
            Ok(bytes) if bytes.is_empty() => {
                self.phase = Phase::Closed;
                if self.peer_sent_close {
                    trace!(id = self.id, "clean disconnect after peer close");
                    vec![Update::SockDisconnect(self.id)]
                } else {
                    warn!(id = self.id, "transport closed without a close frame");
                    vec![Update::ReadUnexpectedDisconnect(self.id)]
                }
            }
            Ok(bytes) => {
                self.read_buffer.extend_from_slice(&bytes);
                match self.phase {
                    Phase::Handshaking => self.process_handshake(),
                    Phase::Open | Phase::Closing => self.process_frames(),
                    Phase::Closed => Vec::new(),
                }
            }
            Err(e) => {
                warn!(id = self.id, error = %e, "transport read error");
                vec![Update::ReadError(self.id, e.to_string())]
            }
        }
    }

    fn process_handshake(&mut self) -> Vec<Update> {
        let Some(end) = find_terminator(&self.read_buffer) else {
            if self.read_buffer.len() > self.config.max_handshake_length {
                self.close_after_write = true;
                return vec![Update::HandshakeTooLarge(self.id)];
            }
            return Vec::new();
        };

        if end > self.config.max_handshake_length {
            warn!(id = self.id, len = end, "handshake exceeds max_handshake_length");
            self.close_after_write = true;
            return vec![Update::HandshakeTooLarge(self.id)];
        }

        let block = String::from_utf8_lossy(&self.read_buffer[..end]).into_owned();
        let trailing = self.read_buffer.split_off(end);
        self.read_buffer.clear();

        let mut updates = Vec::new();
        match self.role {
            Role::Server => match validate_request(&block) {
                Ok(req) => {
                    debug!(id = self.id, path = %req.path, "handshake accepted");
                    self.pending_sec_key = Some(req.sec_key);
                    self.accept(None);
                    updates.push(Update::NewConnection(self.id));
                }
                Err(e) => {
                    warn!(id = self.id, error = %e, "handshake validation failed");
                    self.deny(status_for_handshake_error(&e));
                    updates.push(Update::HandshakeFailure(self.id));
                }
            },
            Role::Client => {
                let key = self.client_sec_key.clone().unwrap_or_default();
                match validate_response(&block, &key) {
                    Ok(()) => {
                        self.phase = Phase::Open;
                        updates.push(Update::ConnectionAccepted(self.id));
                    }
                    Err(e) => {
                        warn!(id = self.id, error = %e, "server denied handshake");
                        self.close_after_write = true;
                        updates.push(Update::ConnectionDenied(self.id));
                    }
                }
            }
        }

        self.read_buffer = trailing;
        if self.phase == Phase::Open {
            updates.extend(self.process_frames());
        }
        updates
    }

    fn process_frames(&mut self) -> Vec<Update> {
        let mut updates = Vec::new();

        loop {
            let header = match decode_header(&self.read_buffer, self.frame_role()) {
                DecodeOutcome::Incomplete => {
                    self.next_read_hint = None;
                    break;
                }
                DecodeOutcome::Error(_e) => {
                    self.enqueue_close(1002, "Protocol error");
                    self.close_after_write = true;
                    updates.push(Update::ReadProtocolError(self.id));
                    break;
                }
                DecodeOutcome::Header(h) => h,
            };

            if header.rsv1 && !self.config.allow_rsv1
                || header.rsv2 && !self.config.allow_rsv2
                || header.rsv3 && !self.config.allow_rsv3
            {
                self.enqueue_close(1002, "Unexpected RSV bit set");
                self.close_after_write = true;
                updates.push(Update::ReadRsvBitSet(self.id));
                break;
            }

            let total = header.total_len();
            if self.read_buffer.len() < total {
                self.next_read_hint = Some(total - self.read_buffer.len());
                break;
            }

            let payload = decode_payload(&self.read_buffer, &header);

            match header.opcode {
                Opcode::Continuation => {
                    if self.partial_message.is_none() {
                        self.enqueue_close(1002, "Continuation without a started message");
                        self.close_after_write = true;
                        updates.push(Update::ReadProtocolError(self.id));
                        self.read_buffer.drain(0..total);
                        break;
                    }
                    if let Some((_, buf)) = self.partial_message.as_mut() {
                        buf.extend_from_slice(&payload);
                    }
                    if header.fin {
                        if let Some(update) = self.finalize_message() {
                            let stop = matches!(update, Update::ReadInvalidPayload(_));
                            updates.push(update);
                            if stop {
                                self.read_buffer.drain(0..total);
                                break;
                            }
                        }
                    }
                }
                Opcode::Text | Opcode::Binary => {
                    if self.partial_message.is_some() {
                        self.enqueue_close(1002, "New message started mid-fragment");
                        self.close_after_write = true;
                        updates.push(Update::ReadInvalidPayload(self.id));
                        self.read_buffer.drain(0..total);
                        break;
                    }
                    self.partial_message = Some((header.opcode, payload));
                    if header.fin {
                        if let Some(update) = self.finalize_message() {
                            let stop = matches!(update, Update::ReadInvalidPayload(_));
                            updates.push(update);
                            if stop {
                                self.read_buffer.drain(0..total);
                                break;
                            }
                        }
                    }
                }
                Opcode::Close => {
                    updates.extend(self.handle_close_frame(&payload));
                }
                Opcode::Ping => {
                    self.pending_pongs.push(payload.clone());
                    updates.push(Update::Ping(self.id, payload));
                }
                Opcode::Pong => {}
            }

            self.read_buffer.drain(0..total);
            self.next_read_hint = None;
        }

        if !self.pending_pongs.is_empty() && !self.is_disconnecting() {
            for payload in self.pending_pongs.drain(..).collect::<Vec<_>>() {
                self.control_queue
                    .push_back(encode_frame(Opcode::Pong, &payload, true, None));
            }
        } else {
            self.pending_pongs.clear();
        }

        updates
    }

    fn finalize_message(&mut self) -> Option<Update> {
        let (opcode, buf) = self.partial_message.take()?;
        match opcode {
            Opcode::Text => match String::from_utf8(buf) {
                Ok(text) => Some(Update::Read(self.id, Message::Text(text))),
                Err(_) => {
                    self.enqueue_close(1007, "Invalid UTF-8 in text message");
                    self.close_after_write = true;
                    Some(Update::ReadInvalidPayload(self.id))
                }
            },
            Opcode::Binary => Some(Update::Read(self.id, Message::Binary(buf))),
            _ => None,
        }
    }

    fn handle_close_frame(&mut self, payload: &[u8]) -> Vec<Update> {
        let mut updates = Vec::new();

        if payload.len() >= 2 {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason_bytes = &payload[2..];
            match std::str::from_utf8(reason_bytes) {
                Ok(reason) if is_receivable_close_code(code) => {
                    self.send_close(code, reason);
                }
                _ => {
                    self.send_close(1002, "Invalid close code or non-UTF-8 reason");
                }
            }
        } else {
            self.send_close(1000, "");
        }

        self.peer_sent_close = true;
        updates.push(Update::ReadDisconnect(self.id));
        if self.role == Role::Server {
            self.close_after_write = true;
        }
        updates
    }

    fn enqueue_close(&mut self, code: u16, reason: &str) {
        debug_assert!(is_sendable_close_code(code), "close code must be send-valid");
        self.send_close(code, reason);
    }

    // ---- write pipeline (§4.C) ----

    /// Drain up to `write_rate` bytes this cycle. Control frames strictly
    /// precede data frames on each refill of `write_buffer`, but an
    /// in-flight write is never preempted.
    pub async fn handle_write(&mut self) -> Option<Update> {
        let mut budget = self.config.write_rate;

        while budget > 0 {
            if self.write_buffer.is_empty() {
                match self.control_queue.pop_front().or_else(|| self.data_queue.pop_front()) {
                    Some(next) => self.write_buffer = next,
                    None => break,
                }
            }

            let chunk_len = budget.min(self.write_buffer.len());
            match self.transport.write_chunk(&self.write_buffer[..chunk_len]).await {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buffer.drain(0..n);
                    budget -= n;
                    if n < chunk_len {
                        break;
                    }
                }
                Err(e) => {
                    warn!(id = self.id, error = %e, "transport write error");
                    return Some(Update::WriteError(self.id, e.to_string()));
                }
            }
        }

        if self.close_after_write
            && self.write_buffer.is_empty()
            && self.control_queue.is_empty()
            && self.data_queue.is_empty()
        {
            let _ = self.transport.shutdown().await;
            self.phase = Phase::Closed;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::collections::VecDeque as Deque;

    /// An in-memory transport for driving the engine in unit tests without
    /// a real socket.
    struct MemTransport {
        inbound: Deque<u8>,
        outbound: Vec<u8>,
    }

    impl MemTransport {
        fn new(inbound: &[u8]) -> Self {
            Self {
                inbound: inbound.iter().copied().collect(),
                outbound: Vec::new(),
            }
        }

        fn feed(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes.iter().copied());
        }
    }

    #[async_trait]
    impl Transport for MemTransport {
        async fn read_chunk(&mut self, max: usize) -> std::io::Result<Vec<u8>> {
            let n = max.min(self.inbound.len());
            Ok(self.inbound.drain(..n).collect())
        }

        async fn write_chunk(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn shutdown(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn server_engine(request: &[u8]) -> Engine<MemTransport> {
        Engine::accept_server(1, MemTransport::new(request), EngineConfig::default())
    }

    #[tokio::test]
    async fn server_handshake_accepts_valid_request() {
        let req = handshake::client_request("h", 80, "/chat", "dGhlIHNhbXBsZSBub25jZQ==");
        let mut engine = server_engine(req.as_bytes());
        let updates = engine.handle_read().await;
        assert!(matches!(updates.as_slice(), [Update::NewConnection(1)]));
        assert_eq!(engine.phase(), Phase::Open);
    }

    #[tokio::test]
    async fn server_handshake_denies_wrong_method() {
        let req = b"POST /chat HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let mut engine = server_engine(req);
        let updates = engine.handle_read().await;
        assert!(matches!(updates.as_slice(), [Update::HandshakeFailure(1)]));
    }

    #[tokio::test]
    async fn oversized_but_terminated_handshake_is_denied() {
        // A single read can deliver a well-terminated request that still
        // exceeds max_handshake_length (e.g. read_rate > max_handshake_length,
        // the default). find_terminator succeeds immediately; the length
        // check must still catch it before the request is validated.
        let padding = "X-Padding: ".to_string() + &"a".repeat(9000) + "\r\n";
        let req = format!(
            "GET /chat HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n{padding}\r\n"
        );
        assert!(req.len() > EngineConfig::default().max_handshake_length);
        let mut engine = server_engine(req.as_bytes());
        let updates = engine.handle_read().await;
        assert_eq!(updates, vec![Update::HandshakeTooLarge(1)]);
        assert!(engine.is_disconnecting());
    }

    #[tokio::test]
    async fn fragmented_text_reassembles_into_one_read() {
        let mut engine = server_engine(b"");
        // Bypass the handshake for this test by forcing Open directly.
        engine.phase = Phase::Open;
        let first = encode_frame(Opcode::Text, b"Hel", false, Some([1, 2, 3, 4]));
        let second = encode_frame(Opcode::Continuation, b"lo", true, Some([5, 6, 7, 8]));
        engine.transport.feed(&first);
        let u1 = engine.handle_read().await;
        assert!(u1.is_empty());
        engine.transport.feed(&second);
        let u2 = engine.handle_read().await;
        assert_eq!(
            u2,
            vec![Update::Read(1, Message::Text("Hello".to_string()))]
        );
    }

    #[tokio::test]
    async fn invalid_utf8_text_triggers_close_1007() {
        let mut engine = server_engine(b"");
        engine.phase = Phase::Open;
        let frame = encode_frame(Opcode::Text, &[0xC3, 0x28], true, Some([0, 0, 0, 0]));
        engine.transport.feed(&frame);
        let updates = engine.handle_read().await;
        assert_eq!(updates, vec![Update::ReadInvalidPayload(1)]);
        assert!(engine.is_disconnecting());
        engine.handle_write().await;
        assert!(engine.transport.outbound.starts_with(&[0x88]));
        let payload = &engine.transport.outbound[2..4];
        assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1007);
    }

    #[tokio::test]
    async fn ping_enqueues_pong_ahead_of_pending_data() {
        let mut engine = server_engine(b"");
        engine.phase = Phase::Open;
        engine.write(b"queued-data", Opcode::Binary, true);
        let ping = encode_frame(Opcode::Ping, b"abc", true, Some([9, 9, 9, 9]));
        engine.transport.feed(&ping);
        let updates = engine.handle_read().await;
        assert_eq!(updates, vec![Update::Ping(1, b"abc".to_vec())]);
        assert_eq!(engine.control_queue.len(), 1);
        assert_eq!(engine.data_queue.len(), 1);
    }

    #[tokio::test]
    async fn disallowed_rsv_bit_halts_decoding() {
        let mut engine = server_engine(b"");
        engine.phase = Phase::Open;
        let mut frame = encode_frame(Opcode::Text, b"x", true, Some([1, 1, 1, 1]));
        frame[0] |= 0x40; // set RSV1
        engine.transport.feed(&frame);
        let updates = engine.handle_read().await;
        assert_eq!(updates, vec![Update::ReadRsvBitSet(1)]);
        assert!(engine.is_disconnecting());
    }

    #[tokio::test]
    async fn second_data_frame_mid_fragment_is_a_protocol_error() {
        let mut engine = server_engine(b"");
        engine.phase = Phase::Open;
        let first = encode_frame(Opcode::Text, b"Hel", false, Some([1, 1, 1, 1]));
        let second = encode_frame(Opcode::Text, b"lo", true, Some([2, 2, 2, 2]));
        engine.transport.feed(&first);
        engine.handle_read().await;
        engine.transport.feed(&second);
        let updates = engine.handle_read().await;
        assert_eq!(updates, vec![Update::ReadInvalidPayload(1)]);
    }

    #[tokio::test]
    async fn control_frame_is_sent_before_queued_data() {
        let mut engine = server_engine(b"");
        engine.phase = Phase::Open;
        engine.write(b"data-first", Opcode::Binary, true);
        engine.send_close(1000, "bye");
        engine.handle_write().await;
        // The close frame (control) must appear before the data frame in
        // the bytes actually written to the transport.
        let out = &engine.transport.outbound;
        let close_pos = out.iter().position(|&b| b == 0x88).unwrap();
        let data_pos = out.iter().position(|&b| b == 0x82).unwrap();
        assert!(close_pos < data_pos);
    }

    #[test]
    fn write_multi_rejects_control_opcode() {
        let mut engine = server_engine(b"");
        let err = engine.write_multi(b"x", Opcode::Ping, 4).unwrap_err();
        assert_eq!(err, EngineError::InvalidWriteMultiOpcode(Opcode::Ping));
    }

    #[test]
    fn write_multi_splits_with_rfc_opcode_sequencing() {
        let mut engine = server_engine(b"");
        engine.write_multi(b"HelloWorld", Opcode::Text, 4).unwrap();
        let frames: Vec<_> = engine.data_queue.iter().collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0][0] & 0x0F, Opcode::Text as u8);
        assert_eq!(frames[0][0] & 0x80, 0); // fin=false
        assert_eq!(frames[1][0] & 0x0F, Opcode::Continuation as u8);
        assert_eq!(frames[2][0] & 0x0F, Opcode::Continuation as u8);
        assert_eq!(frames[2][0] & 0x80, 0x80); // fin=true
    }
}
