/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Formatter};
use std::io::{ErrorKind, Result as IoResult};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use mio::Interest;
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};

use log::{debug, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::context::PollContext;
use crate::session::SessionFactory;
use crate::utilities::{Flag, Timeout};
use crate::{Canceller, Endpoint, ListenerOptions, SocketError};

/// A TCP socket server, listening for connections, with ***timeout*** and
/// ***cancellation*** support
///
/// [`accept()`](Listener::accept()) is "blocking", but the wait is bounded by
/// the `timeout` parameter and can be aborted at any time via
/// [`stop_accepting()`](Listener::stop_accepting()) or a
/// [`Canceller`](crate::Canceller), e.g. from a Ctrl+C (SIGINT) handler.
///
/// If a [`SessionFactory`](crate::SessionFactory) was installed, every
/// accepted connection first completes a secure handshake, within the same
/// timeout budget, before it is handed out.
pub struct Listener {
    listener: MioTcpListener,
    context: Mutex<PollContext>,
    cancelled: Arc<Flag>,
    factory: Option<SessionFactory>,
    options: ListenerOptions,
}

impl Listener {
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        Self::bind_with(addr, ListenerOptions::default())
    }

    /// Binds to `port` on the "any" address of the configured IP version.
    pub fn bind_port(port: u16, options: ListenerOptions) -> Result<Self, SocketError> {
        let addr = options.ip_version.unspecified(port);
        Self::bind_with(addr, options)
    }

    pub fn bind_with(addr: SocketAddr, options: ListenerOptions) -> Result<Self, SocketError> {
        let mut listener = Self::initialize(addr, &options)?;
        let (context, cancelled) = PollContext::with_canceller(options.endpoint.events_capacity).map_err(SocketError::Poll)?;
        context.register(&mut listener, Interest::READABLE).map_err(SocketError::Poll)?;
        debug!("Listening on {:?} (backlog: {})", listener.local_addr(), options.backlog);

        Ok(Self {
            listener,
            context: Mutex::new(context),
            cancelled,
            factory: None,
            options,
        })
    }

    fn initialize(addr: SocketAddr, options: &ListenerOptions) -> Result<MioTcpListener, SocketError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(SocketError::SocketCreate)?;
        if options.reuse_address {
            socket.set_reuse_address(true).map_err(SocketError::SetOption)?;
            #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
            socket.set_reuse_port(true).map_err(SocketError::SetOption)?;
        }
        socket.set_nonblocking(true).map_err(SocketError::SetOption)?;
        socket.bind(&addr.into()).map_err(SocketError::Bind)?;
        socket.listen(options.backlog).map_err(SocketError::Listen)?;
        Ok(MioTcpListener::from_std(StdTcpListener::from(socket)))
    }

    /// Every accepted connection will complete a handshake with a session
    /// created by `factory` before [`accept()`](Listener::accept()) returns it.
    pub fn with_session_factory(mut self, factory: SessionFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Waits for the next incoming connection
    ///
    /// Fails with [`SocketError::ReadTimeout`] if no connection arrived (and
    /// completed its handshake) before the `timeout` expired, and with
    /// [`SocketError::TerminationRequested`] after cancellation.
    pub fn accept(&self, timeout: Option<Duration>) -> Result<Endpoint, SocketError> {
        let timeout = Timeout::start(timeout);
        let mut context = self.context.lock();
        let (stream, peer) = self.await_connection(&mut context, &timeout)?;
        debug!("Accepted connection from {:?}", peer);

        let session = match &self.factory {
            Some(factory) => Some(factory().map_err(SocketError::Handshake)?),
            None => None,
        };

        let endpoint = Endpoint::accepted(stream, session, self.options.endpoint.clone())?;
        endpoint.complete_handshake(&timeout, self.options.handshake_interval, |pause| self.pause(&mut context, pause))?;
        Ok(endpoint)
    }

    fn await_connection(&self, context: &mut PollContext, timeout: &Timeout) -> Result<(MioTcpStream, SocketAddr), SocketError> {
        loop {
            if self.cancelled.check() {
                return Err(SocketError::TerminationRequested);
            }
            match self.event_accept() {
                Ok(Some(connection)) => return Ok(connection),
                Ok(None) => context.await_ready(&self.cancelled, timeout)?,
                Err(error) => return Err(SocketError::Accept(error)),
            }
        }
    }

    /// Waits between two handshake steps. The listener's waker cuts the wait
    /// short, so [`stop_accepting()`](Listener::stop_accepting()) also aborts
    /// a pending handshake.
    fn pause(&self, context: &mut PollContext, duration: Duration) -> Result<(), SocketError> {
        match context.wait(Some(duration)) {
            Ok(_) => (),
            Err(error) if error.kind() == ErrorKind::Interrupted => (),
            Err(error) => return Err(SocketError::Poll(error)),
        }
        if self.cancelled.check() {
            return Err(SocketError::TerminationRequested);
        }
        Ok(())
    }

    fn event_accept(&self) -> IoResult<Option<(MioTcpStream, SocketAddr)>> {
        loop {
            match self.listener.accept() {
                Ok(connection) => return Ok(Some(connection)),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock => return Ok(None),
                    _ => return Err(error),
                },
            }
        }
    }

    /// Aborts a pending (and every future) [`accept()`](Listener::accept()).
    /// Returns `true` only for the call that actually raised the request.
    pub fn stop_accepting(&self) -> IoResult<bool> {
        self.cancelled.raise()
    }

    pub fn canceller(&self) -> Canceller {
        Canceller::from(self.cancelled.clone())
    }
}

impl Debug for Listener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("listener", &self.listener)
            .field("secure", &self.factory.is_some())
            .field("cancelled", &self.cancelled.check())
            .finish()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Err(error) = self.cancelled.raise() {
            warn!("Failed to signal cancellation: {:?}", error);
        }
        self.context.get_mut().deregister(&mut self.listener);
    }
}
