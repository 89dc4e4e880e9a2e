//! In-memory sockets for integration tests.
//!
//! A [`MockListener`] hands out [`MockStream`]s created with
//! [`MockListener::connect`]. The test keeps the matching [`MockPeer`] and
//! plays the client: it writes request bytes and collects reply frames.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use futures_lite::future;
use futures_lite::io::{AsyncRead, AsyncWrite};
use tagmux::hub::{Executor, Hub};
use tagmux::mux::{Frame, FrameDecoder, Listener};

// ── Pipe shared by a stream and its peer ──────────────────────

#[derive(Default)]
struct Pipe {
    to_server: RefCell<VecDeque<u8>>,
    to_client: RefCell<Vec<u8>>,
    reader: RefCell<Option<Waker>>,
    hung_up: Cell<bool>,
    done_sending: Cell<bool>,
}

impl Pipe {
    fn wake_reader(&self) {
        if let Some(waker) = self.reader.borrow_mut().take() {
            waker.wake();
        }
    }
}

/// Server side of an in-memory connection.
pub struct MockStream {
    pipe: Rc<Pipe>,
}

impl AsyncRead for MockStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let mut incoming = self.pipe.to_server.borrow_mut();
        if incoming.is_empty() {
            if self.pipe.hung_up.get() || self.pipe.done_sending.get() {
                return Poll::Ready(Ok(0));
            }
            *self.pipe.reader.borrow_mut() = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = buf.len().min(incoming.len());
        for (slot, byte) in buf.iter_mut().zip(incoming.drain(..n)) {
            *slot = byte;
        }
        Poll::Ready(Ok(n))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.pipe.hung_up.get() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        self.pipe.to_client.borrow_mut().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Client side of an in-memory connection.
pub struct MockPeer {
    pub addr: SocketAddr,
    pipe: Rc<Pipe>,
    decoder: FrameDecoder,
}

#[allow(dead_code)]
impl MockPeer {
    pub fn send(&self, bytes: &[u8]) {
        self.pipe.to_server.borrow_mut().extend(bytes.iter().copied());
        self.pipe.wake_reader();
    }

    pub fn send_frame(&self, frame: &Frame) {
        self.send(&frame.encode().expect("frame encodes"));
    }

    /// Close the client end; the server reads EOF.
    pub fn hang_up(&self) {
        self.pipe.hung_up.set(true);
        self.pipe.wake_reader();
    }

    /// Shut down the client's sending half only. The server reads EOF but
    /// can still write.
    pub fn finish_sending(&self) {
        self.pipe.done_sending.set(true);
        self.pipe.wake_reader();
    }

    /// Every complete frame the server has written since the last call.
    pub fn received(&mut self) -> Vec<Frame> {
        let bytes = std::mem::take(&mut *self.pipe.to_client.borrow_mut());
        self.decoder.feed(&bytes).expect("server writes valid frames");
        std::iter::from_fn(|| self.decoder.next_frame()).collect()
    }
}

// ── Listener ──────────────────────────────────────────────────

#[derive(Default)]
struct Backlog {
    queue: RefCell<VecDeque<io::Result<(MockStream, SocketAddr)>>>,
    acceptor: RefCell<Option<Waker>>,
    listens: Cell<u32>,
}

#[derive(Clone, Default)]
pub struct MockListener {
    backlog: Rc<Backlog>,
}

#[allow(dead_code)]
impl MockListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: io::Result<(MockStream, SocketAddr)>) {
        self.backlog.queue.borrow_mut().push_back(entry);
        if let Some(waker) = self.backlog.acceptor.borrow_mut().take() {
            waker.wake();
        }
    }

    pub fn connect(&self, addr: SocketAddr) -> MockPeer {
        let pipe = Rc::new(Pipe::default());
        self.push(Ok((MockStream { pipe: Rc::clone(&pipe) }, addr)));
        MockPeer {
            addr,
            pipe,
            decoder: FrameDecoder::new(1 << 20),
        }
    }

    /// Make the next `accept` fail.
    pub fn fail_next_accept(&self, kind: io::ErrorKind) {
        self.push(Err(io::Error::new(kind, "injected accept failure")));
    }

    pub fn listen_calls(&self) -> u32 {
        self.backlog.listens.get()
    }
}

impl Listener for MockListener {
    type Stream = MockStream;

    fn listen(&mut self, _backlog: u32) -> io::Result<()> {
        self.backlog.listens.set(self.backlog.listens.get() + 1);
        Ok(())
    }

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        future::poll_fn(|cx| match self.backlog.queue.borrow_mut().pop_front() {
            Some(entry) => Poll::Ready(entry),
            None => {
                *self.backlog.acceptor.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
        })
        .await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 9990)))
    }
}

// ── Executor helpers ──────────────────────────────────────────

pub fn runtime() -> (Rc<Executor>, Rc<Hub>) {
    let executor = Rc::new(Executor::new());
    let hub = Hub::start(Rc::clone(&executor));
    (executor, hub)
}

/// Let every spawned task run until nothing is left to do.
pub fn run_until_idle(executor: &Executor) {
    future::block_on(executor.run(async {
        for _ in 0..64 {
            future::yield_now().await;
        }
    }));
}

pub fn peer_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([192, 168, 1, 10], port))
}
