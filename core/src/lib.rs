//! `wsproto-core`: an RFC 6455 WebSocket frame codec, handshake codec,
//! per-connection protocol engine, and event driver.
//!
//! Module layout follows the component split: [`frame`] is the wire codec,
//! [`handshake`] the HTTP upgrade exchange, [`engine`] the per-connection
//! state machine, [`driver`] the multiplexer that pumps many engines, and
//! [`event`] the tagged values yielded to callers. [`transport`] abstracts
//! over plain TCP and TLS so the engine never depends on either directly.

pub mod driver;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod transport;

pub use driver::{connect_plain, serve, Driver};
pub use engine::{Engine, EngineConfig, Phase};
pub use error::{EngineError, FrameError, HandshakeError};
pub use event::{ConnectionId, Message, Update};
pub use frame::{Opcode, Role};
pub use transport::{TcpTransport, TlsTransport, Transport};
