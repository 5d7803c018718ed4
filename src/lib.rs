/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */

//! **msock** provides "blocking" sockets with proper ***timeout*** and
//! ***cancellation*** support, plus a ***demultiplexer*** that splits an
//! incoming byte stream into independent streams of fragments.
//!
//! An [`msock_rs::Endpoint`](Endpoint) is a connected stream socket (TCP, or
//! one half of a local socket pair) whose "blocking" reads take an additional
//! *timeout* parameter. Every endpoint, [`Listener`] and [`Datagram`] socket
//! can also be ***cancelled*** from any other thread, e.g. from a Ctrl+C
//! (SIGINT) handler via a [`Canceller`], so that "cleanly" shutting down your
//! server becomes a possibility. Cancellation is sticky: once cancelled, every
//! operation on that socket fails with
//! [`SocketError::TerminationRequested`].
//!
//! The "blocking" I/O operations are emulated via *non-blocking* operations,
//! using the [**`mio`**](mio) library. All platforms supported by `mio` are
//! supported by **msock** as well; the local socket pair requires Unix.
//!
//! # Framing
//!
//! A [`ContiguousBuffer`] amortizes small reads and offers "read exactly *N*
//! bytes" as well as "read until delimiter". On top of that, a
//! [`Demultiplexer`] runs a worker thread that evaluates user-supplied
//! [`Condition`]s against the buffered data and queues the fragments they cut
//! off, one queue per condition. Any number of threads can then wait for
//! fragments of "their" condition, independently of each other.
//!
//! # Secure sessions
//!
//! **msock** does not bundle TLS. An endpoint can be layered over anything
//! implementing [`SecureSession`], see [`Endpoint::connect_secure()`] and
//! [`Listener::with_session_factory()`].
//!
//! # Examples
//!
//! Examples can be found in the `demos` sub-directory.

mod buffer;
mod canceller;
mod context;
mod datagram;
mod demux;
mod endpoint;
mod error;
mod listener;
mod options;
mod session;
mod utilities;

pub use buffer::ContiguousBuffer;
pub use canceller::Canceller;
pub use datagram::Datagram;
pub use demux::{delimiter, Condition, ConditionHandle, Delimiter, Demultiplexer, Outcome};
pub use endpoint::Endpoint;
pub use error::SocketError;
pub use listener::Listener;
pub use options::{EndpointOptions, IpVersion, ListenerOptions, ParseIpVersionError};
pub use session::{Duplex, Handshake, SecureSession, SessionFactory};
