//! Per-connection transport sink: mux framing at the socket boundary.
//!
//! Each accepted connection runs two cooperative loops over one
//! [`TransportSink`]:
//!
//! 1. **Read**: feeds socket bytes into the [`FrameDecoder`] and handles
//!    each complete frame. Pings are answered right here; dispatches enter
//!    the downstream chain with a fresh [`SinkStack`].
//! 2. **Write**: drains the outbox, an `embassy-sync` channel of encoded
//!    frames. It is the only writer of the socket.
//!
//! When the peer stops sending, the write loop still flushes every frame
//! already queued before the connection ends.
//!
//! ```text
//!  socket ─▶ read loop ─▶ decoder ─┬─ Tping ──────────────────────┐
//!                                  └─ Tdispatch ─▶ chain ─▶ ...   │
//!                                                    │            ▼
//!  socket ◀─ write loop ◀──────── outbox ◀── on_response ◀────────┘
//! ```

use core::pin::pin;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures_lite::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures_lite::FutureExt;
use log::{debug, error, info, warn};

use super::codec::{encode_frame, Frame, FrameDecoder, MessageType, Tag};
use crate::error::Result;
use crate::sink::{Context, Reply, Request, RequestSink, ResponseSink, SinkStack};

/// Encoded frames a connection may have queued for writing. A peer that
/// lets more pile up without reading is disconnected.
pub const OUTBOX_DEPTH: usize = 1024;

/// Limits applied to one connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub read_buffer_size: usize,
    pub max_frame_size: usize,
}

/// Framing endpoint of one connection and bottom frame of every sink stack
/// created for it.
pub struct TransportSink {
    label: String,
    next: Rc<dyn RequestSink>,
    outbox: Channel<NoopRawMutex, Vec<u8>, OUTBOX_DEPTH>,
    shutdown: Signal<NoopRawMutex, ()>,
    in_flight: RefCell<HashSet<Tag>>,
    closed: Cell<bool>,
}

impl TransportSink {
    /// `label` prefixes every log line of this connection.
    pub fn new(label: impl Into<String>, next: Rc<dyn RequestSink>) -> Rc<Self> {
        Rc::new(Self {
            label: label.into(),
            next,
            outbox: Channel::new(),
            shutdown: Signal::new(),
            in_flight: RefCell::new(HashSet::new()),
            closed: Cell::new(false),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Dispatch requests whose reply has not been written yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.borrow().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Stop accepting replies. The write loop flushes what is already
    /// queued, then finishes.
    pub fn close(&self) {
        self.closed.set(true);
        self.shutdown.signal(());
    }

    /// Pop the oldest encoded frame waiting to be written.
    pub fn take_outbound(&self) -> Option<Vec<u8>> {
        self.outbox.try_receive().ok()
    }

    /// Frames queued but not yet written.
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// Handle one decoded frame.
    pub fn handle_frame(self: &Rc<Self>, frame: Frame) {
        let Frame {
            tag,
            message_type,
            body,
        } = frame;

        match message_type {
            MessageType::Tping => self.send(tag, MessageType::Rping, &[]),
            MessageType::Tdispatch => self.dispatch(tag, body),
            MessageType::Tinit => self.send(tag, MessageType::Rinit, &body),
            MessageType::Tdiscarded => {
                info!("{}: peer discarded a request (tag {})", self.label, tag);
            }
            MessageType::Tdrain => debug!("{}: ignoring drain request (tag {})", self.label, tag),
            ty if ty.is_request() => {
                warn!("{}: unsupported message type {:?} (tag {})", self.label, ty, tag);
                self.send(tag, MessageType::Rerr, b"unsupported message type");
            }
            ty => debug!("{}: ignoring {:?} (tag {})", self.label, ty, tag),
        }
    }

    fn dispatch(self: &Rc<Self>, tag: Tag, body: Vec<u8>) {
        if !self.in_flight.borrow_mut().insert(tag) {
            warn!("{}: tag {} reused while in flight", self.label, tag);
            self.send(tag, MessageType::Rerr, b"tag already in use");
            return;
        }

        let mut stack = SinkStack::new();
        let this = Rc::clone(self) as Rc<dyn ResponseSink>;
        stack.push(this, Box::new(tag));
        Rc::clone(&self.next).on_request(stack, Request::Body(body));
    }

    fn send(&self, tag: Tag, message_type: MessageType, body: &[u8]) {
        if self.closed.get() {
            debug!("{}: closed, dropping {:?} for tag {}", self.label, message_type, tag);
            return;
        }
        let bytes = match encode_frame(tag, message_type, body) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{}: cannot encode {:?} for tag {}: {}", self.label, message_type, tag, e);
                return;
            }
        };
        if self.outbox.try_send(bytes).is_err() {
            error!(
                "{}: outbox full ({} frames), peer is not reading; closing",
                self.label, OUTBOX_DEPTH
            );
            self.close();
        }
    }

    /// Read frames until the peer closes or the stream breaks.
    pub async fn read_loop<R>(self: &Rc<Self>, mut reader: R, limits: ConnectionLimits) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = FrameDecoder::new(limits.max_frame_size);
        let mut buf = vec![0u8; limits.read_buffer_size];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                debug!("{}: peer closed", self.label);
                return Ok(());
            }
            decoder.feed(&buf[..n])?;
            while let Some(frame) = decoder.next_frame() {
                self.handle_frame(frame);
            }
        }
    }

    /// Write queued frames until the sink is closed and the outbox is
    /// empty. A write error ends the loop and is returned to the caller.
    pub async fn write_loop<W>(&self, mut writer: W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let next = async { Some(self.outbox.receive().await) }
                .or(async {
                    self.shutdown.wait().await;
                    None
                })
                .await;

            if let Some(bytes) = next {
                writer.write_all(&bytes).await?;
            }
            while let Some(bytes) = self.take_outbound() {
                writer.write_all(&bytes).await?;
            }
            writer.flush().await?;

            if self.closed.get() {
                return Ok(());
            }
        }
    }

    /// Run both loops over `stream`. A clean end of input closes the sink
    /// and lets the writer flush what is queued; a read or write error
    /// ends the connection at once.
    pub async fn serve<S>(self: Rc<Self>, stream: S, limits: ConnectionLimits) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        enum Ended {
            Read(Result<()>),
            Write(Result<()>),
        }

        let (reader, writer) = futures_lite::io::split(stream);
        let mut writing = pin!(self.write_loop(writer));
        let ended = async { Ended::Read(self.read_loop(reader, limits).await) }
            .or(async { Ended::Write(writing.as_mut().await) })
            .await;

        let result = match ended {
            Ended::Read(Ok(())) => {
                self.close();
                writing.await
            }
            Ended::Read(Err(e)) => Err(e),
            Ended::Write(result) => result,
        };
        self.close();
        let dropped = self.in_flight();
        if dropped > 0 {
            info!("{}: closing with {} request(s) in flight", self.label, dropped);
        }
        result
    }
}

impl ResponseSink for TransportSink {
    fn on_response(&self, stack: SinkStack, context: Context, reply: Reply) {
        if !stack.is_empty() {
            warn!("{}: reply reached transport with {} stage(s) left", self.label, stack.len());
        }
        let Some(tag) = context.downcast_ref::<Tag>().copied() else {
            warn!("{}: reply carries a foreign context, dropped", self.label);
            return;
        };
        self.in_flight.borrow_mut().remove(&tag);

        match reply {
            Reply::Body(body) => self.send(tag, MessageType::Rdispatch, &body),
            Reply::Error(message) => self.send(tag, MessageType::Rerr, message.as_bytes()),
            Reply::Message(_) => {
                warn!("{}: unencoded reply for tag {}, no serializer in chain", self.label, tag);
                self.send(tag, MessageType::Rerr, b"reply was not serialized");
            }
        }
    }
}
