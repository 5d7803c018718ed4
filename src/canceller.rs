/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result;
use std::sync::Arc;

use crate::utilities::Flag;

/// A canceller that can be used to abort "pending" I/O operations
///
/// Each `msock_rs::Canceller` is tied to exactly one
/// [`Endpoint`](crate::Endpoint), [`Listener`](crate::Listener) or
/// [`Datagram`](crate::Datagram). Calling the
/// [`cancel()`](Canceller::cancel()) function will *immediately* wake up any
/// thread that is blocked in that socket, and make the pending operation fail
/// with [`SocketError::TerminationRequested`](crate::SocketError::TerminationRequested).
/// Unlike the socket itself, a canceller is cheap to clone and can be moved
/// across the thread boundary. This is useful, for example, to implement a
/// Ctrl+C (SIGINT) handler.
///
/// Cancellation is *sticky*: once cancelled, every later operation on the
/// socket fails with `TerminationRequested` as well. There is no way back.
#[derive(Clone, Debug)]
pub struct Canceller {
    flag: Arc<Flag>,
}

impl Canceller {
    pub(crate) fn from(flag: Arc<Flag>) -> Self {
        Self {
            flag,
        }
    }

    /// Requests cancellation. Returns `true` if this call raised the request,
    /// or `false` if cancellation had been requested before.
    pub fn cancel(&self) -> Result<bool> {
        self.flag.raise()
    }

    pub fn cancelled(&self) -> bool {
        self.flag.check()
    }
}
