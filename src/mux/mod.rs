//! Mux protocol plumbing: framing, sockets, connections and the acceptor.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Mux server side                        │
//! │                                                               │
//! │  ┌──────────┐ accept ┌───────────────┐  body  ┌────────────┐  │
//! │  │ Listener │───────▶│ TransportSink │───────▶│ sink chain │  │
//! │  │ (trait)  │        │ (per conn)    │◀───────│ (shared)   │  │
//! │  └──────────┘        └───────────────┘  reply └────────────┘  │
//! │       ▲                   │      ▲                            │
//! │  ┌──────────┐        ┌──────────────┐                         │
//! │  │ Acceptor │        │ FrameDecoder │  size · type · tag      │
//! │  └──────────┘        └──────────────┘                         │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod acceptor;
pub mod codec;
pub mod connection;
pub mod transport;

pub use acceptor::{Acceptor, AcceptorSettings, AcceptorState};
pub use codec::{Frame, FrameDecoder, MessageType, Tag};
pub use connection::{ConnectionLimits, TransportSink};
pub use transport::{Listener, TcpSocket};
