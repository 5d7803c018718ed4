/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Tunables of an [`Endpoint`](crate::Endpoint)
///
/// The defaults match what most callers want: an event buffer of 128 entries,
/// two write attempts that are 50 milliseconds apart, and no timeout for the
/// [`std::io::Read`](std::io::Read) implementation.
#[derive(Clone, Debug)]
pub struct EndpointOptions {
    pub(crate) events_capacity: usize,
    pub(crate) write_attempts: usize,
    pub(crate) retry_interval: Duration,
    pub(crate) read_timeout: Option<Duration>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            events_capacity: 128,
            write_attempts: 2,
            retry_interval: Duration::from_millis(50),
            read_timeout: None,
        }
    }
}

impl EndpointOptions {
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Number of write calls used by "convenience" writes, such as
    /// [`ContiguousBuffer::write()`](crate::ContiguousBuffer::write()) or the
    /// [`std::io::Write`](std::io::Write) implementation.
    pub fn write_attempts(mut self, attempts: usize) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    /// Pause between two write attempts that did not complete the buffer.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Timeout used by the [`std::io::Read`](std::io::Read) implementation.
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Tunables of a [`Listener`](crate::Listener)
#[derive(Clone, Debug)]
pub struct ListenerOptions {
    pub(crate) ip_version: IpVersion,
    pub(crate) reuse_address: bool,
    pub(crate) backlog: i32,
    pub(crate) handshake_interval: Duration,
    pub(crate) endpoint: EndpointOptions,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            ip_version: IpVersion::V4,
            reuse_address: true,
            backlog: 5,
            handshake_interval: Duration::from_millis(5),
            endpoint: EndpointOptions::default(),
        }
    }
}

impl ListenerOptions {
    /// IP version used by [`Listener::bind_port()`](crate::Listener::bind_port()).
    pub fn ip_version(mut self, version: IpVersion) -> Self {
        self.ip_version = version;
        self
    }

    /// Enables `SO_REUSEADDR` (and `SO_REUSEPORT` on Unix).
    pub fn reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Pause between two handshake steps that would have blocked.
    pub fn handshake_interval(mut self, interval: Duration) -> Self {
        self.handshake_interval = interval;
        self
    }

    /// Options applied to every accepted [`Endpoint`](crate::Endpoint).
    pub fn endpoint(mut self, options: EndpointOptions) -> Self {
        self.endpoint = options;
        self
    }
}

/// The IP protocol version
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// The "any" address of this IP version, with the given port.
    pub fn unspecified(self, port: u16) -> SocketAddr {
        match self {
            Self::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            Self::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        }
    }

    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::V4,
            SocketAddr::V6(_) => Self::V6,
        }
    }
}

impl Display for IpVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4 => write!(f, "IPv4"),
            Self::V6 => write!(f, "IPv6"),
        }
    }
}

#[derive(Debug, Error)]
#[error("only supported IP versions are IPv4 and IPv6, not [{0}]")]
pub struct ParseIpVersionError(String);

impl FromStr for IpVersion {
    type Err = ParseIpVersionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "IPv4" => Ok(Self::V4),
            "IPv6" => Ok(Self::V6),
            other => Err(ParseIpVersionError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_version_names_round_trip() {
        assert_eq!("IPv4".parse::<IpVersion>().unwrap(), IpVersion::V4);
        assert_eq!("IPv6".parse::<IpVersion>().unwrap(), IpVersion::V6);
        assert_eq!(IpVersion::V6.to_string(), "IPv6");
    }

    #[test]
    fn ip_version_rejects_unknown_names() {
        let error = "ipv4".parse::<IpVersion>().unwrap_err();
        assert!(error.to_string().contains("[ipv4]"));
    }

    #[test]
    fn unspecified_address_matches_version() {
        assert_eq!(IpVersion::V4.unspecified(80), "0.0.0.0:80".parse().unwrap());
        assert_eq!(IpVersion::V6.unspecified(80), "[::]:80".parse().unwrap());
        assert_eq!(IpVersion::of(&"[::1]:1".parse().unwrap()), IpVersion::V6);
    }

    #[test]
    fn builders_clamp_degenerate_values() {
        assert_eq!(EndpointOptions::default().write_attempts(0).write_attempts, 1);
        assert_eq!(ListenerOptions::default().backlog(0).backlog, 1);
    }
}
