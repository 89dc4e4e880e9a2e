//! Unified error types for the dispatch core.
//!
//! Only transport-level and protocol-level problems are `Error`s. A request
//! that fails in the application layer becomes a [`Failure`] carried inside a
//! `ReturnMessage` and never reaches this type.
//!
//! [`Failure`]: crate::message::Failure

use core::fmt;
use std::io;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// The peer sent bytes that do not form a valid mux frame.
    Protocol(ProtocolError),
    /// Socket read, write or accept failed.
    Io(io::Error),
    /// A payload could not be encoded or decoded by a serializer stage.
    Codec(String),
    /// Configuration is invalid or could not be loaded.
    Config(String),
    /// An `AsyncResult` was asked to transition out of a terminal state.
    AlreadyComplete,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::AlreadyComplete => write!(f, "async result already complete"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

/// Framing violations. The connection is closed on any of these; the byte
/// offset of an untrusted stream is never resynchronised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Declared frame size is smaller than the type+tag header.
    FrameTooShort { size: u32 },
    /// Declared frame size exceeds the configured maximum.
    FrameTooLarge { size: u32, max: usize },
    /// Tag does not fit in the 24-bit tag field.
    TagOutOfRange { tag: u32 },
    /// Body does not fit in a single frame.
    BodyTooLarge { len: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooShort { size } => write!(f, "frame size {size} shorter than header"),
            Self::FrameTooLarge { size, max } => {
                write!(f, "frame size {size} exceeds maximum {max}")
            }
            Self::TagOutOfRange { tag } => write!(f, "tag {tag:#x} exceeds 24 bits"),
            Self::BodyTooLarge { len } => write!(f, "body of {len} bytes does not fit a frame"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
