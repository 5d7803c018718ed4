/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{ErrorKind, Read, Write, Result as IoResult};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use msock_rs::{Duplex, Endpoint, EndpointOptions, Handshake, IpVersion, Listener, ListenerOptions, SecureSession, SessionFactory, SocketError};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn localhost() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

/// Toy session: each side announces a one-byte key, then XORs its output
/// with its own key and its input with the peer's key.
struct XorSession {
    key: u8,
    sent: bool,
    peer: Option<u8>,
}

impl XorSession {
    fn factory(key: u8) -> SessionFactory {
        Arc::new(move || -> IoResult<Box<dyn SecureSession>> { Ok(Box::new(XorSession { key, sent: false, peer: None })) })
    }
}

impl SecureSession for XorSession {
    fn handshake(&mut self, io: &mut dyn Duplex) -> Handshake {
        if !self.sent {
            match io.write(&[self.key]) {
                Ok(1) => self.sent = true,
                Ok(_) => return Handshake::WouldBlock,
                Err(error) if error.kind() == ErrorKind::WouldBlock => return Handshake::WouldBlock,
                Err(error) => return Handshake::Failed(error),
            }
        }
        if self.peer.is_none() {
            let mut key = [0u8; 1];
            match io.read(&mut key) {
                Ok(1) => self.peer = Some(key[0]),
                Ok(_) => return Handshake::Failed(ErrorKind::UnexpectedEof.into()),
                Err(error) if error.kind() == ErrorKind::WouldBlock => return Handshake::WouldBlock,
                Err(error) => return Handshake::Failed(error),
            }
        }
        Handshake::Done
    }

    fn read(&mut self, io: &mut dyn Duplex, buffer: &mut [u8]) -> IoResult<usize> {
        let peer = self.peer.ok_or(ErrorKind::NotConnected)?;
        let count = io.read(buffer)?;
        buffer[..count].iter_mut().for_each(|value| *value ^= peer);
        Ok(count)
    }

    fn write(&mut self, io: &mut dyn Duplex, buffer: &[u8]) -> IoResult<usize> {
        let encoded: Vec<u8> = buffer.iter().map(|value| value ^ self.key).collect();
        io.write(&encoded)
    }
}

#[test]
fn accept_times_out() {
    init_logger();
    let listener = Listener::bind(localhost()).unwrap();
    match listener.accept(Some(Duration::from_millis(100))) {
        Err(SocketError::ReadTimeout) => (),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn accept_is_cancellable_from_another_thread() {
    init_logger();
    let listener = Listener::bind(localhost()).unwrap();
    let canceller = listener.canceller();
    let (result_tx, result_rx) = crossbeam_channel::bounded(1);

    let acceptor = thread::spawn(move || {
        result_tx.send(listener.accept(Some(Duration::from_secs(30))).map(|_| ())).unwrap();
        listener
    });

    thread::sleep(Duration::from_millis(50));
    assert!(canceller.cancel().unwrap());

    assert!(result_rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err().is_cancelled());
    let listener = acceptor.join().unwrap();
    assert!(!listener.stop_accepting().unwrap());
    assert!(listener.accept(TIMEOUT).unwrap_err().is_cancelled());
}

#[test]
fn connected_endpoints_exchange_data() {
    init_logger();
    let listener = Listener::bind(localhost()).unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        let endpoint = Endpoint::connect(addr, TIMEOUT).unwrap();
        endpoint.write(b"ping", 2).unwrap();
        let mut buffer = [0u8; 4];
        endpoint.read(&mut buffer, 4, TIMEOUT).unwrap();
        buffer
    });

    let server = listener.accept(TIMEOUT).unwrap();
    assert_eq!(server.local_addr(), Some(addr));
    let mut buffer = [0u8; 4];
    assert_eq!(server.read(&mut buffer, 4, TIMEOUT).unwrap(), 4);
    assert_eq!(&buffer, b"ping");
    server.write(b"pong", 2).unwrap();

    assert_eq!(&client.join().unwrap(), b"pong");
}

#[test]
fn bind_port_uses_unspecified_address() {
    init_logger();
    let options = ListenerOptions::default().ip_version(IpVersion::V4).backlog(16);
    let listener = Listener::bind_port(0, options).unwrap();
    let addr = listener.local_addr().unwrap();
    assert!(addr.ip().is_unspecified());
    assert_ne!(addr.port(), 0);
}

#[test]
fn connect_to_closed_port_fails() {
    init_logger();
    let addr = {
        let listener = Listener::bind(localhost()).unwrap();
        listener.local_addr().unwrap()
    };
    match Endpoint::connect(addr, TIMEOUT) {
        Err(SocketError::Connect(_)) => (),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn secure_sessions_wrap_the_stream() {
    init_logger();
    let listener = Listener::bind(localhost()).unwrap().with_session_factory(XorSession::factory(0x5a));
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        let endpoint = Endpoint::connect_secure(addr, &XorSession::factory(0xa5), EndpointOptions::default(), TIMEOUT).unwrap();
        assert!(endpoint.is_secure());
        endpoint.write(b"secret", 2).unwrap();
        let mut buffer = [0u8; 2];
        endpoint.read(&mut buffer, 2, TIMEOUT).unwrap();
        buffer
    });

    let server = listener.accept(TIMEOUT).unwrap();
    assert!(server.is_secure());
    let mut buffer = [0u8; 6];
    assert_eq!(server.read(&mut buffer, 6, TIMEOUT).unwrap(), 6);
    assert_eq!(&buffer, b"secret");
    server.write(b"ok", 2).unwrap();

    assert_eq!(&client.join().unwrap(), b"ok");
}

#[test]
fn handshake_is_bounded_by_accept_timeout() {
    init_logger();
    let listener = Listener::bind(localhost()).unwrap().with_session_factory(XorSession::factory(0x5a));
    let addr = listener.local_addr().unwrap();

    /* a plain client never completes the handshake */
    let client = Endpoint::connect(addr, TIMEOUT).unwrap();
    match listener.accept(Some(Duration::from_millis(300))) {
        Err(SocketError::Handshake(inner)) => assert_eq!(inner.kind(), ErrorKind::TimedOut),
        other => panic!("unexpected result: {:?}", other),
    }
    drop(client);
}

#[test]
fn stop_accepting_aborts_a_pending_handshake() {
    init_logger();
    let listener = Listener::bind(localhost()).unwrap().with_session_factory(XorSession::factory(0x5a));
    let addr = listener.local_addr().unwrap();
    let canceller = listener.canceller();
    let (result_tx, result_rx) = crossbeam_channel::bounded(1);

    /* a plain client never completes the handshake, and accept() has no deadline */
    let client = Endpoint::connect(addr, TIMEOUT).unwrap();
    let acceptor = thread::spawn(move || {
        result_tx.send(listener.accept(None).map(|_| ())).unwrap();
        listener
    });

    thread::sleep(Duration::from_millis(200));
    assert!(result_rx.is_empty());
    assert!(canceller.cancel().unwrap());

    match result_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
        Err(SocketError::TerminationRequested) => (),
        other => panic!("unexpected result: {:?}", other),
    }
    drop(acceptor.join().unwrap());
    drop(client);
}
