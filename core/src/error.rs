//! Error taxonomy for the frame codec, handshake codec, and connection engine.
//!
//! Protocol violations that the engine can recover from by queuing a Close
//! frame are represented as [`crate::event::Update`] values, not errors —
//! see §7 of the spec. The types here are reserved for decode-time failures
//! that have no connection to attach an `Update` to yet (the codec layer)
//! and for genuinely fatal, caller-visible programming errors.

use thiserror::Error;

/// Failures while decoding or encoding a single frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
    #[error("control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,
    #[error("control frame is fragmented (fin=false)")]
    ControlFrameFragmented,
    #[error("server received an unmasked frame")]
    ExpectedMask,
    #[error("client received a masked frame")]
    UnexpectedMask,
    #[error("64-bit payload length has its high bit set")]
    LengthHighBitSet,
}

/// Failures while parsing or validating the HTTP upgrade exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake exceeds the configured maximum of {0} bytes")]
    TooLarge(usize),
    #[error("malformed request or status line")]
    MalformedStartLine,
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
    #[error("request method was not GET")]
    WrongMethod,
    #[error("unsupported Sec-WebSocket-Version (require 13)")]
    WrongVersion,
    #[error("Sec-WebSocket-Accept did not match the expected value")]
    AcceptMismatch,
    #[error("server responded with status {0}, expected 101")]
    Denied(u16),
}

/// Fatal engine errors: programming mistakes that must fail loudly rather
/// than be folded into the `Update` stream, per §7's propagation policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("write_multi called with a non-data opcode {0:?}")]
    InvalidWriteMultiOpcode(crate::frame::Opcode),
    #[error("write_multi called with frame_size=0")]
    InvalidFrameSize,
    #[error("unhandled opcode {0:#x} reached the read dispatch")]
    UnhandledOpcode(u8),
}
