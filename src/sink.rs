//! Sink stages and the per-request sink stack.
//!
//! A request travels *down* a chain of [`RequestSink`]s. Every stage that
//! wants to see the response pushes itself onto the request's [`SinkStack`]
//! before forwarding; the terminal stage calls
//! [`SinkStack::deliver_response`], which pops frames one at a time so the
//! reply walks back *up* the same stages.
//!
//! ```text
//!   transport ──push(tag)──▶ serializer ──push──▶ call builder
//!       ▲                        │                    │
//!       └──── Reply::Body ◀──────┴── Reply::Message ◀─┘
//! ```
//!
//! The stack is moved from stage to stage and consumed by
//! `deliver_response`, so one exchange delivers exactly one reply.

use std::any::Any;
use std::rc::Rc;

use log::warn;

use crate::message::{RequestMessage, ReturnMessage};

/// Correlation token stored with a stack frame. Only the stage that pushed
/// it interprets it; the transport stores the frame [`Tag`].
///
/// [`Tag`]: crate::mux::codec::Tag
pub type Context = Box<dyn Any>;

/// What flows down the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Raw dispatch body, positioned at its first byte.
    Body(Vec<u8>),
    /// Decoded call.
    Message(RequestMessage),
}

/// What flows back up the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Result of a call, not yet encoded.
    Message(ReturnMessage),
    /// Encoded reply body, ready to frame.
    Body(Vec<u8>),
    /// The exchange failed below the application layer.
    Error(String),
}

/// A stage that accepts requests travelling away from the transport.
///
/// Takes `Rc<Self>` so a stage can push itself onto the stack.
pub trait RequestSink {
    fn on_request(self: Rc<Self>, stack: SinkStack, request: Request);
}

/// A stage that receives replies travelling back to the transport.
pub trait ResponseSink {
    fn on_response(&self, stack: SinkStack, context: Context, reply: Reply);
}

struct StackFrame {
    sink: Rc<dyn ResponseSink>,
    context: Context,
}

/// Ordered record of the stages a reply has to pass back through.
#[derive(Default)]
pub struct SinkStack {
    frames: Vec<StackFrame>,
}

impl SinkStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Rc<dyn ResponseSink>, context: Context) {
        self.frames.push(StackFrame { sink, context });
    }

    /// Hand `reply` to the most recently pushed stage, along with the rest
    /// of the stack.
    pub fn deliver_response(mut self, reply: Reply) {
        match self.frames.pop() {
            Some(StackFrame { sink, context }) => sink.on_response(self, context, reply),
            None => warn!("sink stack: reply with no stage left to receive it, dropped"),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
