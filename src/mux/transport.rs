//! Socket abstraction: anything that can hand out byte streams.
//!
//! Concrete implementations:
//! - [`TcpSocket`]: TCP over the `async-io-mini` reactor
//! - in-memory listeners in the integration tests
//!
//! The acceptor is generic over `Listener`, so adding a new socket kind
//! requires zero changes to the dispatch logic.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

use async_io_mini::Async;
use futures_lite::{AsyncRead, AsyncWrite};
use log::info;

/// A listening socket.
pub trait Listener {
    /// Connection stream handed out by `accept`.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Start listening. `backlog` is the number of pending connections the
    /// socket should queue.
    fn listen(&mut self, backlog: u32) -> io::Result<()>;

    /// Wait for the next incoming connection.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Bound address, for diagnostics.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// TCP listener bound lazily at `listen()`.
pub struct TcpSocket {
    addr: SocketAddr,
    listener: Option<Async<TcpListener>>,
}

impl TcpSocket {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            listener: None,
        }
    }
}

impl Listener for TcpSocket {
    type Stream = Async<TcpStream>;

    fn listen(&mut self, backlog: u32) -> io::Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        // std picks the platform backlog; the requested one is advisory here
        let listener = TcpListener::bind(self.addr)?;
        info!(
            "tcp: bound {} (requested backlog {})",
            listener.local_addr()?,
            backlog
        );
        self.listener = Some(Async::new(listener)?);
        Ok(())
    }

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        match &self.listener {
            Some(listener) => listener.accept().await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "accept() before listen()",
            )),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.get_ref().local_addr(),
            None => Ok(self.addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future;

    #[test]
    fn accept_before_listen_fails() {
        let socket = TcpSocket::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        let err = future::block_on(socket.accept()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn unbound_socket_reports_configured_addr() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 9999));
        let socket = TcpSocket::new(addr);
        assert_eq!(socket.local_addr().unwrap(), addr);
    }
}
