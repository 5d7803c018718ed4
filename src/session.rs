/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Read, Write, Error as IoError, Result as IoResult};
use std::sync::Arc;

/// The raw, *non-blocking* socket underneath a [`SecureSession`]
pub trait Duplex: Read + Write {}

impl<T: Read + Write + ?Sized> Duplex for T {}

/// Result of a single handshake step
#[derive(Debug)]
pub enum Handshake {
    Done,
    /// The step needs more data from the peer; try again later.
    WouldBlock,
    Failed(IoError),
}

/// An established (or establishing) secure session, such as a TLS connection
///
/// **msock** does not bundle a TLS implementation. Instead, an
/// [`Endpoint`](crate::Endpoint) can be built over any type implementing this
/// trait: every read and write on the endpoint is then routed through the
/// session, while the session moves encrypted bytes over the raw socket it is
/// handed. The raw socket is non-blocking, so implementations must report
/// [`ErrorKind::WouldBlock`](std::io::ErrorKind::WouldBlock) (or
/// [`Handshake::WouldBlock`]) instead of waiting; the endpoint takes care of
/// waiting, timeouts and cancellation.
pub trait SecureSession: Send {
    fn handshake(&mut self, io: &mut dyn Duplex) -> Handshake;

    fn read(&mut self, io: &mut dyn Duplex, buffer: &mut [u8]) -> IoResult<usize>;

    fn write(&mut self, io: &mut dyn Duplex, buffer: &[u8]) -> IoResult<usize>;
}

/// Creates a fresh [`SecureSession`] for every accepted or connected socket.
pub type SessionFactory = Arc<dyn Fn() -> IoResult<Box<dyn SecureSession>> + Send + Sync>;
