/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Debug, Formatter};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mio::Interest;
use mio::net::UdpSocket as MioUdpSocket;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::context::PollContext;
use crate::utilities::{Flag, Timeout};
use crate::{Canceller, EndpointOptions, SocketError};

/// A UDP socket with ***timeout*** and ***cancellation*** support
///
/// Every [`read()`](Datagram::read()) returns exactly one datagram together
/// with its sender. Datagrams larger than the configured buffer size are
/// rejected with [`SocketError::ReceiveBufferTooSmall`] instead of being
/// silently truncated.
pub struct Datagram {
    socket: MioUdpSocket,
    receiver: Mutex<Receiver>,
    writer: Mutex<()>,
    cancelled: Arc<Flag>,
    buffer_size: usize,
    options: EndpointOptions,
}

struct Receiver {
    context: PollContext,
    buffer: Box<[u8]>,
}

impl Datagram {
    pub fn bind(addr: SocketAddr, buffer_size: usize) -> Result<Self, SocketError> {
        Self::bind_with(addr, buffer_size, EndpointOptions::default())
    }

    pub fn bind_with(addr: SocketAddr, buffer_size: usize, options: EndpointOptions) -> Result<Self, SocketError> {
        let mut socket = Self::initialize(addr)?;
        let (context, cancelled) = PollContext::with_canceller(options.events_capacity).map_err(SocketError::Poll)?;
        context.register(&mut socket, Interest::READABLE).map_err(SocketError::Poll)?;
        debug!("Datagram socket bound to {:?}", socket.local_addr());

        let buffer_size = buffer_size.max(1);
        Ok(Self {
            socket,
            receiver: Mutex::new(Receiver {
                context,
                buffer: vec![0u8; buffer_size + 1].into_boxed_slice(),
            }),
            writer: Mutex::new(()),
            cancelled,
            buffer_size,
            options,
        })
    }

    fn initialize(addr: SocketAddr) -> Result<MioUdpSocket, SocketError> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP)).map_err(SocketError::SocketCreate)?;
        socket.set_reuse_address(true).map_err(SocketError::SetOption)?;
        socket.set_nonblocking(true).map_err(SocketError::SetOption)?;
        socket.bind(&addr.into()).map_err(SocketError::Bind)?;
        Ok(MioUdpSocket::from_std(StdUdpSocket::from(socket)))
    }

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Joins the multicast `group` on the default interface.
    pub fn join_multicast(&self, group: IpAddr) -> Result<(), SocketError> {
        let result = match group {
            IpAddr::V4(group) if group.is_multicast() => self.socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(group) if group.is_multicast() => self.socket.join_multicast_v6(&group, 0),
            other => Err(IoError::new(ErrorKind::InvalidInput, format!("{} is not a multicast address", other))),
        };
        result.map_err(SocketError::JoinMulticast)
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Cancellation
    // ~~~~~~~~~~~~~~~~~~~~~~~

    pub fn request_cancellation(&self) -> IoResult<bool> {
        self.cancelled.raise()
    }

    pub fn canceller(&self) -> Canceller {
        Canceller::from(self.cancelled.clone())
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // I/O functions
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Waits for the next datagram and returns its payload and sender.
    pub fn read(&self, timeout: Option<Duration>) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let timeout = Timeout::start(timeout);
        let mut receiver = self.receiver.lock();
        let Receiver { context, buffer } = &mut *receiver;

        loop {
            if self.cancelled.check() {
                return Err(SocketError::TerminationRequested);
            }
            match self.event_receive(buffer) {
                Ok(Some((count, _))) if count > self.buffer_size => {
                    return Err(SocketError::ReceiveBufferTooSmall { capacity: self.buffer_size });
                },
                Ok(Some((count, sender))) => return Ok((buffer[..count].to_vec(), sender)),
                Ok(None) => context.await_ready(&self.cancelled, &timeout)?,
                Err(error) => return Err(SocketError::Read(error)),
            }
        }
    }

    fn event_receive(&self, buffer: &mut [u8]) -> IoResult<Option<(usize, SocketAddr)>> {
        loop {
            match self.socket.recv_from(buffer) {
                Ok(received) => return Ok(Some(received)),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock => return Ok(None),
                    _ => return Err(error),
                },
            }
        }
    }

    /// Sends `data` as one datagram to `destination`, retrying a send that
    /// would block up to the configured number of write attempts.
    pub fn write(&self, data: &[u8], destination: SocketAddr) -> Result<(), SocketError> {
        let _guard = self.writer.lock();
        let attempts = self.options.write_attempts;

        for attempt in 0..attempts {
            if attempt > 0 {
                thread::sleep(self.options.retry_interval);
            }
            if self.cancelled.check() {
                return Err(SocketError::TerminationRequested);
            }
            match self.socket.send_to(data, destination) {
                Ok(count) if count == data.len() => return Ok(()),
                Ok(count) => return Err(SocketError::PartialWrite { written: count }),
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock | ErrorKind::Interrupted => trace!("Send attempt {} would block", attempt + 1),
                    _ => return Err(SocketError::Write(error)),
                },
            }
        }

        Err(SocketError::PartialWrite { written: 0 })
    }
}

impl Debug for Datagram {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datagram")
            .field("socket", &self.socket)
            .field("buffer_size", &self.buffer_size)
            .field("cancelled", &self.cancelled.check())
            .finish()
    }
}

impl Drop for Datagram {
    fn drop(&mut self) {
        if let Err(error) = self.cancelled.raise() {
            warn!("Failed to signal cancellation: {:?}", error);
        }
        self.receiver.get_mut().context.deregister(&mut self.socket);
    }
}
