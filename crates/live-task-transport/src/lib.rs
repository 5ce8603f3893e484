//! Wire framing and transports for live task sessions.
//!
//! Provides:
//! - Wire protocol (`Packet`, JSON text frames)
//! - WebSocket transport (feature: websocket)
//! - In-memory transport for tests and demos
//! - Echo backend used by the demo router

pub mod echo;
pub mod memory;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use echo::EchoServer;
pub use memory::{MemoryPeer, MemoryRouter, MemoryTransport};
pub use protocol::{Packet, ProtocolError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
