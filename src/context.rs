/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{ErrorKind, Result as IoResult};
use std::sync::Arc;
use std::time::Duration;

use mio::event::Source;
use mio::{Poll, Events, Token, Waker, Registry, Interest};

use log::warn;

use crate::SocketError;
use crate::utilities::{Flag, Timeout};

pub(crate) const SOCKET: Token = Token(0);
pub(crate) const SHUTDOWN: Token = Token(usize::MAX);

/// What a single readiness wait observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    Cancelled,
    Idle,
}

/// Poll state owned by exactly one socket: the socket itself is registered
/// under [`SOCKET`], its cancellation waker under [`SHUTDOWN`].
#[derive(Debug)]
pub(crate) struct PollContext {
    poll: Poll,
    events: Events,
}

impl PollContext {
    /// Creates the context together with the cancellation flag that wakes it.
    pub fn with_canceller(capacity: usize) -> IoResult<(Self, Arc<Flag>)> {
        let context = Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(2)),
        };
        let waker = Waker::new(context.registry(), SHUTDOWN)?;
        Ok((context, Arc::new(Flag::new(waker))))
    }

    pub fn register<S: Source + ?Sized>(&self, source: &mut S, interest: Interest) -> IoResult<()> {
        self.registry().register(source, SOCKET, interest)
    }

    pub fn deregister<S: Source + ?Sized>(&self, source: &mut S) {
        if let Err(error) = self.registry().deregister(source) {
            warn!("Failed to de-register: {:?}", error);
        }
    }

    /// Waits until the socket becomes ready, the waker fires, or the timeout
    /// expires. Readiness of the socket wins over a simultaneous wake-up; the
    /// caller re-checks the cancellation flag anyway.
    pub fn wait(&mut self, timeout: Option<Duration>) -> IoResult<Readiness> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut readiness = Readiness::Idle;
        for event in self.events.iter() {
            match event.token() {
                SOCKET => return Ok(Readiness::Ready),
                SHUTDOWN => readiness = Readiness::Cancelled,
                _ => (),
            }
        }
        Ok(readiness)
    }

    /// One wait step of a "blocking" operation. `Ok(())` means: try the
    /// non-blocking system call again.
    pub fn await_ready(&mut self, cancelled: &Flag, timeout: &Timeout) -> Result<(), SocketError> {
        let readiness = match self.wait(timeout.remaining_time()) {
            Ok(readiness) => readiness,
            Err(error) if error.kind() == ErrorKind::Interrupted => Readiness::Idle,
            Err(error) => return Err(SocketError::Poll(error)),
        };
        if cancelled.check() {
            return Err(SocketError::TerminationRequested);
        }
        if readiness != Readiness::Ready && timeout.expired() {
            return Err(SocketError::ReadTimeout);
        }
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }
}
