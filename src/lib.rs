//! tagmux: server-side dispatch core for the tagged multiplexing RPC
//! protocol.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Acceptor ─▶ TransportSink ─▶ JsonSerializerSink ─▶ CallBuilder │
//! │   (mux)       (per conn)        (reference codec)     │         │
//! │                    ▲                                  ▼         │
//! │                    └──── SinkStack ◀── Hub ◀── AsyncResult      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one `edge_executor::LocalExecutor`; see [`hub`].

#![deny(unused_must_use)]

pub mod call_builder;
pub mod config;
pub mod error;
pub mod future;
pub mod handler;
pub mod hub;
pub mod message;
pub mod mux;
pub mod serializer;
pub mod sink;

pub use call_builder::CallBuilderSink;
pub use config::ServerConfig;
pub use error::{Error, ProtocolError, Result};
pub use future::{AsyncResult, ScheduleOn};
pub use handler::{Handler, HandlerBuilder};
pub use hub::{Executor, Hub};
pub use message::{Failure, FailureKind, Kwargs, Property, RequestMessage, ReturnMessage, Value};
pub use serializer::JsonSerializerSink;
pub use sink::{Reply, Request, RequestSink, ResponseSink, SinkStack};
