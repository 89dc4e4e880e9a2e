//! Listening socket and accept loop.
//!
//! `Idle ─open()─▶ Listening ─spawned loop─▶ Accepting`. Each accepted
//! stream gets its own [`TransportSink`] in front of the shared downstream
//! chain, and is registered by peer address until its handling ends.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use log::{error, info, warn};

use super::connection::{ConnectionLimits, TransportSink};
use super::transport::Listener;
use crate::config::ServerConfig;
use crate::future::AsyncResult;
use crate::hub::Hub;
use crate::message::Failure;
use crate::sink::RequestSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    Idle,
    Listening,
}

/// Live connections, keyed by peer address.
pub type Registry = Rc<RefCell<HashMap<SocketAddr, Rc<TransportSink>>>>;

#[derive(Debug, Clone, Copy)]
pub struct AcceptorSettings {
    pub backlog: u32,
    pub limits: ConnectionLimits,
    /// Pause after a failed accept. Zero only yields.
    pub accept_backoff: Duration,
}

impl From<&ServerConfig> for AcceptorSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            backlog: config.backlog,
            limits: ConnectionLimits {
                read_buffer_size: config.read_buffer_size,
                max_frame_size: config.max_frame_size,
            },
            accept_backoff: Duration::from_millis(config.accept_backoff_ms),
        }
    }
}

pub struct Acceptor<L: Listener> {
    label: String,
    socket: RefCell<Option<L>>,
    bound: RefCell<Option<Rc<L>>>,
    state: Cell<AcceptorState>,
    registry: Registry,
    chain: Rc<dyn RequestSink>,
    hub: Rc<Hub>,
    settings: AcceptorSettings,
}

impl<L: Listener + 'static> Acceptor<L> {
    /// `chain` is the first stage after the transport, shared by every
    /// connection.
    pub fn new(
        service: &str,
        socket: L,
        chain: Rc<dyn RequestSink>,
        hub: Rc<Hub>,
        settings: AcceptorSettings,
    ) -> Rc<Self> {
        let label = match socket.local_addr() {
            Ok(addr) => format!("[{}.{}]", service, addr),
            Err(_) => format!("[{}]", service),
        };
        Rc::new(Self {
            label,
            socket: RefCell::new(Some(socket)),
            bound: RefCell::new(None),
            state: Cell::new(AcceptorState::Idle),
            registry: Rc::new(RefCell::new(HashMap::new())),
            chain,
            hub,
            settings,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> AcceptorState {
        self.state.get()
    }

    /// Bind, listen and start accepting. Calling it again once listening
    /// does nothing. The returned result is already complete.
    pub fn open(self: &Rc<Self>) -> AsyncResult<()> {
        if self.state.get() == AcceptorState::Listening {
            return AsyncResult::completed(&self.hub, Ok(()));
        }

        let Some(mut socket) = self.socket.borrow_mut().take() else {
            return AsyncResult::completed(&self.hub, Err(Failure::application("no socket to listen on")));
        };
        if let Err(e) = socket.listen(self.settings.backlog) {
            error!("{} listen failed: {}", self.label, e);
            *self.socket.borrow_mut() = Some(socket);
            return AsyncResult::completed(&self.hub, Err(Failure::application(format!("listen failed: {e}"))));
        }

        match socket.local_addr() {
            Ok(addr) => info!("{} Listening on {}", self.label, addr),
            Err(_) => info!("{} Listening", self.label),
        }
        let socket = Rc::new(socket);
        *self.bound.borrow_mut() = Some(Rc::clone(&socket));
        self.state.set(AcceptorState::Listening);
        self.hub.spawn(Rc::clone(self).accept_loop(socket));
        AsyncResult::completed(&self.hub, Ok(()))
    }

    async fn accept_loop(self: Rc<Self>, socket: Rc<L>) {
        loop {
            match socket.accept().await {
                Ok((stream, peer)) => self.start_connection(stream, peer),
                Err(e) => {
                    error!("{} accept failed: {}", self.label, e);
                    if self.settings.accept_backoff.is_zero() {
                        futures_lite::future::yield_now().await;
                    } else {
                        async_io_mini::Timer::after(self.settings.accept_backoff).await;
                    }
                }
            }
        }
    }

    fn start_connection(&self, stream: L::Stream, peer: SocketAddr) {
        info!("{} accepted {}", self.label, peer);
        let transport = TransportSink::new(format!("conn[{}]", peer), Rc::clone(&self.chain));
        if let Some(stale) = self.registry.borrow_mut().insert(peer, Rc::clone(&transport)) {
            warn!("{} replacing stale connection for {}", self.label, peer);
            stale.close();
        }

        let registry = Rc::clone(&self.registry);
        let label = self.label.clone();
        let limits = self.settings.limits;
        self.hub.spawn(async move {
            let result = Rc::clone(&transport).serve(stream, limits).await;
            {
                let mut registry = registry.borrow_mut();
                if registry.get(&peer).is_some_and(|current| Rc::ptr_eq(current, &transport)) {
                    registry.remove(&peer);
                }
            }
            match result {
                Ok(()) => info!("{} {} disconnected", label, peer),
                Err(e) => warn!("{} {} dropped: {}", label, peer, e),
            }
        });
    }

    /// Connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn connection(&self, peer: &SocketAddr) -> Option<Rc<TransportSink>> {
        self.registry.borrow().get(peer).cloned()
    }

    /// Bound address once listening, the configured one before.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        if let Some(bound) = self.bound.borrow().as_ref() {
            return bound.local_addr().ok();
        }
        self.socket.borrow().as_ref().and_then(|s| s.local_addr().ok())
    }
}
