//! Update events — the tagged values the caller drains from the engine and
//! the driver. See §4.E and §7.

use crate::frame::Opcode;

/// Identifies the connection an `Update` originated from. The driver is the
/// sole owner of the mapping from index to connection; engines never see
/// each other.
pub type ConnectionId = usize;

/// A decoded, reassembled message (§3's "Message").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// Tagged update values yielded by [`crate::engine::Engine::handle_read`],
/// [`crate::engine::Engine::handle_write`], and the event driver. Exactly
/// one terminating event (`SockDisconnect` or a disconnect-shaped error) is
/// yielded per connection, per §7's user-visible failure behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    // --- read-side, successful ---
    NewConnection(ConnectionId),
    ConnectionAccepted(ConnectionId),
    ConnectionDenied(ConnectionId),
    Read(ConnectionId, Message),
    Ping(ConnectionId, Vec<u8>),
    ReadDisconnect(ConnectionId),
    SockDisconnect(ConnectionId),

    // --- errors, surfaced per §7's taxonomy ---
    SelectError(String),
    ReadError(ConnectionId, String),
    ReadEmpty(ConnectionId),
    ReadUnhandled(ConnectionId, Opcode),
    HandshakeFailure(ConnectionId),
    HandshakeTooLarge(ConnectionId),
    ReadInvalidPayload(ConnectionId),
    ReadInvalidHeaders(ConnectionId),
    ReadUnexpectedDisconnect(ConnectionId),
    ReadProtocolError(ConnectionId),
    ReadRsvBitSet(ConnectionId),
    WriteError(ConnectionId, String),
    AcceptTimeoutPassed(ConnectionId),
}

impl Update {
    /// The connection this event concerns, if any (`SelectError` is
    /// driver-wide and has none).
    pub fn connection_id(&self) -> Option<ConnectionId> {
        use Update::*;
        match self {
            NewConnection(id)
            | ConnectionAccepted(id)
            | ConnectionDenied(id)
            | Read(id, _)
            | Ping(id, _)
            | ReadDisconnect(id)
            | SockDisconnect(id)
            | ReadError(id, _)
            | ReadEmpty(id)
            | ReadUnhandled(id, _)
            | HandshakeFailure(id)
            | HandshakeTooLarge(id)
            | ReadInvalidPayload(id)
            | ReadInvalidHeaders(id)
            | ReadUnexpectedDisconnect(id)
            | ReadProtocolError(id)
            | ReadRsvBitSet(id)
            | WriteError(id, _)
            | AcceptTimeoutPassed(id) => Some(*id),
            SelectError(_) => None,
        }
    }

    /// True for the disconnect-shaped events that terminate a connection's
    /// event stream (§7: "callers see exactly one terminating event per
    /// connection").
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Update::SockDisconnect(_)
                | Update::ReadUnexpectedDisconnect(_)
                | Update::HandshakeFailure(_)
                | Update::HandshakeTooLarge(_)
                | Update::ConnectionDenied(_)
                | Update::AcceptTimeoutPassed(_)
        )
    }
}
