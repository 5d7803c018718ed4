/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write, Error as IoError, ErrorKind, Result as IoResult};
use std::net::{SocketAddr, Shutdown};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mio::event::Source;
use mio::Interest;
use mio::net::TcpStream as MioTcpStream;
#[cfg(unix)]
use mio::net::UnixStream as MioUnixStream;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::context::PollContext;
use crate::session::{Handshake, SecureSession, SessionFactory};
use crate::utilities::{Flag, Timeout};
use crate::{Canceller, EndpointOptions, SocketError};

const HANDSHAKE_INTERVAL: Duration = Duration::from_millis(5);

/// A connected stream socket with ***timeout*** and ***cancellation*** support
///
/// An `msock_rs::Endpoint` exclusively owns one OS socket plus a dedicated
/// cancellation signal. All I/O operations are "blocking", but every wait is
/// bounded by the caller's `timeout` and can be interrupted from any other
/// thread via [`request_cancellation()`](Endpoint::request_cancellation()) or
/// a [`Canceller`](crate::Canceller).
///
/// Reads and writes are independently serialized: one read and one write may
/// run at the same time, but two concurrent reads (or writes) queue up. All
/// operations take `&self`, so an endpoint can be shared through an `Arc`.
///
/// Endpoints are created by [`connect()`](Endpoint::connect())ing to a remote
/// host, by [`Listener::accept()`](crate::Listener::accept()), or as a local
/// [`pair()`](Endpoint::pair()). Dropping the endpoint first raises the
/// cancellation signal and then closes the socket.
///
/// If the endpoint was built over a [`SecureSession`](crate::SecureSession),
/// every read and write goes through the session instead of the raw socket,
/// with exactly the same waiting and cancellation behaviour.
pub struct Endpoint {
    socket: Socket,
    reader: Mutex<PollContext>,
    writer: Mutex<()>,
    session: Option<Mutex<Box<dyn SecureSession>>>,
    cancelled: Arc<Flag>,
    options: EndpointOptions,
}

#[derive(Debug)]
pub(crate) enum Socket {
    Tcp(MioTcpStream),
    #[cfg(unix)]
    Local(MioUnixStream),
}

impl Endpoint {
    pub(crate) fn new(mut socket: Socket, session: Option<Box<dyn SecureSession>>, options: EndpointOptions) -> Result<Self, SocketError> {
        let (context, cancelled) = PollContext::with_canceller(options.events_capacity).map_err(SocketError::Poll)?;
        context.register(socket.source(), Interest::READABLE | Interest::WRITABLE).map_err(SocketError::Poll)?;

        Ok(Self {
            socket,
            reader: Mutex::new(context),
            writer: Mutex::new(()),
            session: session.map(Mutex::new),
            cancelled,
            options,
        })
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Factory functions
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Creates two endpoints that are connected to each other.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self), SocketError> {
        Self::pair_with(EndpointOptions::default())
    }

    #[cfg(unix)]
    pub fn pair_with(options: EndpointOptions) -> Result<(Self, Self), SocketError> {
        let (first, second) = MioUnixStream::pair().map_err(SocketError::Pair)?;
        Ok((
            Self::new(Socket::Local(first), None, options.clone())?,
            Self::new(Socket::Local(second), None, options)?,
        ))
    }

    pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<Self, SocketError> {
        Self::connect_with(addr, EndpointOptions::default(), timeout)
    }

    pub fn connect_with(addr: SocketAddr, options: EndpointOptions, timeout: Option<Duration>) -> Result<Self, SocketError> {
        let timeout = Timeout::start(timeout);
        let endpoint = Self::open(addr, None, options)?;
        endpoint.await_connected(&timeout)?;
        debug!("Connected: {:?} -> {:?}", endpoint.local_addr(), endpoint.peer_addr());
        Ok(endpoint)
    }

    /// Connects, then drives the client side of a secure handshake. The
    /// `timeout` covers both steps.
    pub fn connect_secure(addr: SocketAddr, factory: &SessionFactory, options: EndpointOptions, timeout: Option<Duration>) -> Result<Self, SocketError> {
        let timeout = Timeout::start(timeout);
        let session = factory().map_err(SocketError::Handshake)?;
        let endpoint = Self::open(addr, Some(session), options)?;
        endpoint.await_connected(&timeout)?;
        endpoint.complete_handshake(&timeout, HANDSHAKE_INTERVAL, |pause| {
            thread::sleep(pause);
            Ok(())
        })?;
        Ok(endpoint)
    }

    pub(crate) fn accepted(stream: MioTcpStream, session: Option<Box<dyn SecureSession>>, options: EndpointOptions) -> Result<Self, SocketError> {
        Self::new(Socket::Tcp(stream), session, options)
    }

    fn open(addr: SocketAddr, session: Option<Box<dyn SecureSession>>, options: EndpointOptions) -> Result<Self, SocketError> {
        let stream = MioTcpStream::connect(addr).map_err(SocketError::Connect)?;
        Self::new(Socket::Tcp(stream), session, options)
    }

    fn await_connected(&self, timeout: &Timeout) -> Result<(), SocketError> {
        let mut context = self.reader.lock();
        loop {
            if self.cancelled.check() {
                return Err(SocketError::TerminationRequested);
            }
            if self.socket.connected().map_err(SocketError::Connect)? {
                return Ok(());
            }
            context.await_ready(&self.cancelled, timeout)?;
        }
    }

    /// Repeats the handshake step until it completes, fails, or the timeout
    /// budget is used up. Between two steps that would block, `pause` waits
    /// for at most the given duration; an error from `pause` aborts the
    /// handshake.
    pub(crate) fn complete_handshake<F>(&self, timeout: &Timeout, interval: Duration, mut pause: F) -> Result<(), SocketError>
    where
        F: FnMut(Duration) -> Result<(), SocketError>,
    {
        let session = match &self.session {
            Some(session) => session,
            None => return Ok(()),
        };
        loop {
            if self.cancelled.check() {
                return Err(SocketError::TerminationRequested);
            }
            let mut io = &self.socket;
            match session.lock().handshake(&mut io) {
                Handshake::Done => return Ok(()),
                Handshake::Failed(error) => return Err(SocketError::Handshake(error)),
                Handshake::WouldBlock => (),
            }
            let delay = match timeout.remaining_time() {
                Some(remaining) if remaining.is_zero() => {
                    return Err(SocketError::Handshake(IoError::new(ErrorKind::TimedOut, "handshake did not complete in time")));
                },
                Some(remaining) => remaining.min(interval),
                None => interval,
            };
            trace!("Handshake would block, retrying in {:?}", delay);
            pause(delay)?;
        }
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Properties
    // ~~~~~~~~~~~~~~~~~~~~~~~

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            Socket::Tcp(stream) => stream.peer_addr().ok(),
            #[cfg(unix)]
            Socket::Local(_) => None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            Socket::Tcp(stream) => stream.local_addr().ok(),
            #[cfg(unix)]
            Socket::Local(_) => None,
        }
    }

    pub fn shutdown(&self, how: Shutdown) -> IoResult<()> {
        match &self.socket {
            Socket::Tcp(stream) => stream.shutdown(how),
            #[cfg(unix)]
            Socket::Local(stream) => stream.shutdown(how),
        }
    }

    pub fn is_secure(&self) -> bool {
        self.session.is_some()
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Cancellation
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Wakes up any thread blocked in [`read()`](Endpoint::read()) and makes
    /// it fail with [`SocketError::TerminationRequested`]. Idempotent; returns
    /// `true` only for the call that actually raised the request.
    pub fn request_cancellation(&self) -> IoResult<bool> {
        self.cancelled.raise()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.check()
    }

    pub fn canceller(&self) -> Canceller {
        Canceller::from(self.cancelled.clone())
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Read functions
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Reads into `buffer` until at least `min_bytes` bytes have arrived
    ///
    /// Every single OS-level read copies at most the remaining length of
    /// `buffer`, so `buffer.len()` is the upper bound of the returned count.
    /// Fails with [`SocketError::Closed`] if the peer closed the connection,
    /// with [`SocketError::ReadTimeout`] if `timeout` expired, and with
    /// [`SocketError::TerminationRequested`] after cancellation. Bytes that
    /// were read before a failure are lost!
    pub fn read(&self, buffer: &mut [u8], min_bytes: usize, timeout: Option<Duration>) -> Result<usize, SocketError> {
        if min_bytes > buffer.len() {
            return Err(SocketError::Read(IoError::new(ErrorKind::InvalidInput, "min_bytes exceeds the buffer length")));
        }

        let timeout = Timeout::start(timeout);
        let mut context = self.reader.lock();
        let mut total = 0;

        while total < min_bytes {
            if self.cancelled.check() {
                return Err(SocketError::TerminationRequested);
            }
            match self.event_read(&mut buffer[total..]) {
                Ok(Some(0)) => return Err(SocketError::Closed),
                Ok(Some(count)) => total += count,
                Ok(None) => context.await_ready(&self.cancelled, &timeout)?,
                Err(error) => return Err(SocketError::Read(error)),
            }
        }

        Ok(total)
    }

    fn event_read(&self, buffer: &mut [u8]) -> IoResult<Option<usize>> {
        loop {
            let result = match &self.session {
                Some(session) => {
                    let mut io = &self.socket;
                    session.lock().read(&mut io, buffer)
                },
                None => self.socket.read_raw(buffer),
            };
            match result {
                Ok(count) => return Ok(Some(count)),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock => return Ok(None),
                    _ => return Err(error),
                },
            }
        }
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Write functions
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Writes the whole `buffer`, using at most `attempts` OS-level writes
    ///
    /// Between two attempts that did not complete the buffer, the endpoint
    /// pauses for the configured retry interval and then continues with the
    /// first unwritten byte. If the attempts are used up, this fails with
    /// [`SocketError::PartialWrite`], which carries the number of bytes that
    /// did go out. A hard OS error fails immediately with
    /// [`SocketError::Write`].
    pub fn write(&self, buffer: &[u8], attempts: usize) -> Result<(), SocketError> {
        let _guard = self.writer.lock();
        let mut written = 0;

        for attempt in 0..attempts {
            if written == buffer.len() {
                break;
            }
            if attempt > 0 {
                thread::sleep(self.options.retry_interval);
            }
            if self.cancelled.check() {
                return Err(SocketError::TerminationRequested);
            }
            match self.event_write(&buffer[written..]) {
                Ok(Some(count)) => written += count,
                Ok(None) => trace!("Write attempt {} would block", attempt + 1),
                Err(error) => return Err(SocketError::Write(error)),
            }
        }

        match written == buffer.len() {
            true => Ok(()),
            false => Err(SocketError::PartialWrite { written }),
        }
    }

    fn event_write(&self, buffer: &[u8]) -> IoResult<Option<usize>> {
        loop {
            let result = match &self.session {
                Some(session) => {
                    let mut io = &self.socket;
                    session.lock().write(&mut io, buffer)
                },
                None => self.socket.write_raw(buffer),
            };
            match result {
                Ok(count) => return Ok(Some(count)),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock => return Ok(None),
                    _ => return Err(error),
                },
            }
        }
    }
}

impl Read for Endpoint {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let timeout = self.options.read_timeout;
        Endpoint::read(self, buffer, 1, timeout).map_err(IoError::from)
    }
}

impl Write for Endpoint {
    fn write(&mut self, buffer: &[u8]) -> IoResult<usize> {
        match Endpoint::write(self, buffer, self.options.write_attempts) {
            Ok(()) => Ok(buffer.len()),
            Err(SocketError::PartialWrite { written }) if written > 0 => Ok(written),
            Err(error) => Err(error.into()),
        }
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("socket", &self.socket)
            .field("secure", &self.session.is_some())
            .field("cancelled", &self.cancelled.check())
            .finish()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Err(error) = self.cancelled.raise() {
            warn!("Failed to signal cancellation: {:?}", error);
        }
        self.reader.get_mut().deregister(self.socket.source());
    }
}

// ~~~~~~~~~~~~~~~~~~~~~~~
// Raw socket
// ~~~~~~~~~~~~~~~~~~~~~~~

impl Socket {
    fn source(&mut self) -> &mut dyn Source {
        match self {
            Self::Tcp(stream) => stream,
            #[cfg(unix)]
            Self::Local(stream) => stream,
        }
    }

    fn read_raw(&self, buffer: &mut [u8]) -> IoResult<usize> {
        match self {
            Self::Tcp(stream) => {
                let mut stream: &MioTcpStream = stream;
                stream.read(buffer)
            },
            #[cfg(unix)]
            Self::Local(stream) => {
                let mut stream: &MioUnixStream = stream;
                stream.read(buffer)
            },
        }
    }

    fn write_raw(&self, buffer: &[u8]) -> IoResult<usize> {
        match self {
            Self::Tcp(stream) => {
                let mut stream: &MioTcpStream = stream;
                stream.write(buffer)
            },
            #[cfg(unix)]
            Self::Local(stream) => {
                let mut stream: &MioUnixStream = stream;
                stream.write(buffer)
            },
        }
    }

    fn connected(&self) -> IoResult<bool> {
        let stream = match self {
            Self::Tcp(stream) => stream,
            #[cfg(unix)]
            Self::Local(_) => return Ok(true),
        };
        loop {
            if let Some(error) = stream.take_error()? {
                return Err(error);
            }
            match stream.peer_addr() {
                Ok(_addr) => return Ok(true),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::NotConnected => return Ok(false),
                    _ => return Err(error),
                },
            }
        }
    }
}

impl Read for &Socket {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        self.read_raw(buffer)
    }
}

impl Write for &Socket {
    fn write(&mut self, buffer: &[u8]) -> IoResult<usize> {
        self.write_raw(buffer)
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}
