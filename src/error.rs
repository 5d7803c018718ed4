/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Error as IoError, ErrorKind};

use thiserror::Error;

/// The error type for **msock** operations
///
/// Failures reported by the operating system keep the original
/// [`std::io::Error`](std::io::Error) as their source. The remaining variants
/// are **msock**-specific: timeouts, cancellation, closed peers, and contract
/// violations by the caller (such as a [`Condition`](crate::Condition) that
/// claims more bytes than are buffered).
///
/// `SocketError` is `Clone`, because the terminal failure of a
/// [`Demultiplexer`](crate::Demultiplexer) is handed out to every reader.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("failed to create the socket: {0}")]
    SocketCreate(#[source] IoError),
    #[error("failed to set a socket option: {0}")]
    SetOption(#[source] IoError),
    #[error("failed to bind the socket: {0}")]
    Bind(#[source] IoError),
    #[error("failed to listen on the socket: {0}")]
    Listen(#[source] IoError),
    #[error("failed to accept a connection: {0}")]
    Accept(#[source] IoError),
    #[error("failed to connect: {0}")]
    Connect(#[source] IoError),
    #[error("failed to create a socket pair: {0}")]
    Pair(#[source] IoError),
    #[error("the read operation has failed: {0}")]
    Read(#[source] IoError),
    /// The operation did not complete before its timeout expired. Data may
    /// have been read partially!
    #[error("the socket operation timed out")]
    ReadTimeout,
    /// The peer closed the connection.
    #[error("the connection was closed by the peer")]
    Closed,
    #[error("the write operation has failed: {0}")]
    Write(#[source] IoError),
    /// All write attempts were used up; `written` bytes made it out.
    #[error("the write operation is incomplete, only {written} bytes were written")]
    PartialWrite { written: usize },
    /// The operation observed a cancellation request. Cancellation is
    /// sticky: every later operation on the same socket fails the same way.
    #[error("the socket operation was cancelled")]
    TerminationRequested,
    #[error("waiting for socket readiness has failed: {0}")]
    Poll(#[source] IoError),
    /// A condition reported more bytes than are currently buffered.
    #[error("condition consumed {requested} bytes, but only {buffered} bytes are buffered")]
    InvalidCondition { requested: usize, buffered: usize },
    /// The buffer filled up before the delimiter (or any condition) matched.
    #[error("the buffer of {capacity} bytes is exhausted without a match")]
    BufferExhausted { capacity: usize },
    #[error("requested {requested} bytes, but only {buffered} bytes are buffered")]
    OutOfRange { requested: usize, buffered: usize },
    #[error("requested {requested} bytes, which exceeds the buffer capacity of {capacity} bytes")]
    RequestTooLarge { requested: usize, capacity: usize },
    /// A non-blocking read found no fragment. Wait for the handle first!
    #[error("no data is available yet")]
    NoData,
    /// Conditions can only be registered, and the worker only started, once.
    #[error("the demultiplexer has already been started")]
    AlreadyStarted,
    #[error("the condition handle does not belong to this demultiplexer")]
    InvalidHandle,
    /// A condition has panicked and the demultiplexer worker is gone.
    #[error("the demultiplexer worker has panicked")]
    WorkerPanicked,
    #[error("the secure handshake has failed: {0}")]
    Handshake(#[source] IoError),
    #[error("failed to join the multicast group: {0}")]
    JoinMulticast(#[source] IoError),
    #[error("the datagram does not fit into the receive buffer of {capacity} bytes")]
    ReceiveBufferTooSmall { capacity: usize },
}

impl SocketError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::TerminationRequested)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout)
    }

    /// The [`ErrorKind`](std::io::ErrorKind) this error maps to when it is
    /// converted into a [`std::io::Error`](std::io::Error).
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SocketCreate(inner) | Self::SetOption(inner) | Self::Bind(inner) | Self::Listen(inner)
            | Self::Accept(inner) | Self::Connect(inner) | Self::Pair(inner) | Self::Read(inner)
            | Self::Write(inner) | Self::Poll(inner) | Self::Handshake(inner) | Self::JoinMulticast(inner) => inner.kind(),
            Self::ReadTimeout => ErrorKind::TimedOut,
            Self::Closed => ErrorKind::UnexpectedEof,
            Self::PartialWrite { .. } => ErrorKind::WriteZero,
            Self::TerminationRequested | Self::WorkerPanicked => ErrorKind::Other,
            Self::NoData => ErrorKind::WouldBlock,
            Self::InvalidCondition { .. } | Self::OutOfRange { .. } | Self::RequestTooLarge { .. }
            | Self::AlreadyStarted | Self::InvalidHandle => ErrorKind::InvalidInput,
            Self::BufferExhausted { .. } | Self::ReceiveBufferTooSmall { .. } => ErrorKind::OutOfMemory,
        }
    }
}

impl Clone for SocketError {
    fn clone(&self) -> Self {
        match self {
            Self::SocketCreate(inner) => Self::SocketCreate(duplicate(inner)),
            Self::SetOption(inner) => Self::SetOption(duplicate(inner)),
            Self::Bind(inner) => Self::Bind(duplicate(inner)),
            Self::Listen(inner) => Self::Listen(duplicate(inner)),
            Self::Accept(inner) => Self::Accept(duplicate(inner)),
            Self::Connect(inner) => Self::Connect(duplicate(inner)),
            Self::Pair(inner) => Self::Pair(duplicate(inner)),
            Self::Read(inner) => Self::Read(duplicate(inner)),
            Self::ReadTimeout => Self::ReadTimeout,
            Self::Closed => Self::Closed,
            Self::Write(inner) => Self::Write(duplicate(inner)),
            Self::PartialWrite { written } => Self::PartialWrite { written: *written },
            Self::TerminationRequested => Self::TerminationRequested,
            Self::WorkerPanicked => Self::WorkerPanicked,
            Self::Poll(inner) => Self::Poll(duplicate(inner)),
            Self::InvalidCondition { requested, buffered } => Self::InvalidCondition { requested: *requested, buffered: *buffered },
            Self::BufferExhausted { capacity } => Self::BufferExhausted { capacity: *capacity },
            Self::OutOfRange { requested, buffered } => Self::OutOfRange { requested: *requested, buffered: *buffered },
            Self::RequestTooLarge { requested, capacity } => Self::RequestTooLarge { requested: *requested, capacity: *capacity },
            Self::NoData => Self::NoData,
            Self::AlreadyStarted => Self::AlreadyStarted,
            Self::InvalidHandle => Self::InvalidHandle,
            Self::Handshake(inner) => Self::Handshake(duplicate(inner)),
            Self::JoinMulticast(inner) => Self::JoinMulticast(duplicate(inner)),
            Self::ReceiveBufferTooSmall { capacity } => Self::ReceiveBufferTooSmall { capacity: *capacity },
        }
    }
}

impl From<SocketError> for IoError {
    fn from(error: SocketError) -> Self {
        match error {
            SocketError::SocketCreate(inner) | SocketError::SetOption(inner) | SocketError::Bind(inner)
            | SocketError::Listen(inner) | SocketError::Accept(inner) | SocketError::Connect(inner)
            | SocketError::Pair(inner) | SocketError::Read(inner) | SocketError::Write(inner)
            | SocketError::Poll(inner) | SocketError::Handshake(inner) | SocketError::JoinMulticast(inner) => inner,
            other => IoError::new(other.kind(), other),
        }
    }
}

fn duplicate(error: &IoError) -> IoError {
    match error.raw_os_error() {
        Some(code) => IoError::from_raw_os_error(code),
        None => IoError::new(error.kind(), error.to_string()),
    }
}
