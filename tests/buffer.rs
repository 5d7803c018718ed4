/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use msock_rs::{ContiguousBuffer, Endpoint, SocketError};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn buffer_pair(capacity: usize) -> (ContiguousBuffer, Endpoint) {
    init_logger();
    let (local, remote) = Endpoint::pair().unwrap();
    (ContiguousBuffer::new(local, capacity), remote)
}

#[test]
fn read_exact_spans_several_writes() {
    let (buffer, remote) = buffer_pair(64);
    let writer = thread::spawn(move || {
        for chunk in ["ab", "cd", "ef"] {
            remote.write(chunk.as_bytes(), 2).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        remote
    });

    assert_eq!(buffer.read_exact(5, TIMEOUT).unwrap(), b"abcde");
    assert_eq!(buffer.read_exact(1, TIMEOUT).unwrap(), b"f");
    drop(writer.join().unwrap());
}

#[test]
fn read_exact_larger_than_capacity_fails_immediately() {
    let (buffer, _remote) = buffer_pair(8);
    match buffer.read_exact(9, None) {
        Err(SocketError::RequestTooLarge { requested: 9, capacity: 8 }) => (),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn zero_capacity_is_raised_to_one_byte() {
    let (buffer, remote) = buffer_pair(0);
    assert_eq!(buffer.capacity(), 1);
    remote.write(b"xy", 2).unwrap();
    assert_eq!(buffer.read_exact(1, TIMEOUT).unwrap(), b"x");
    assert_eq!(buffer.read_exact(1, TIMEOUT).unwrap(), b"y");
    assert!(matches!(buffer.read_exact(2, TIMEOUT), Err(SocketError::RequestTooLarge { requested: 2, capacity: 1 })));
}

#[test]
fn read_until_includes_delimiter_and_keeps_remainder() {
    let (buffer, remote) = buffer_pair(64);
    remote.write(b"first\nsecond\nthi", 2).unwrap();

    assert_eq!(buffer.read_until(b'\n', TIMEOUT).unwrap(), b"first\n");
    assert_eq!(buffer.read_until(b'\n', TIMEOUT).unwrap(), b"second\n");
    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.peek(3).unwrap(), b"thi");

    remote.write(b"rd\n", 2).unwrap();
    assert_eq!(buffer.read_until(b'\n', TIMEOUT).unwrap(), b"third\n");
    assert!(buffer.is_empty());
}

#[test]
fn read_until_fails_when_buffer_is_exhausted() {
    let (buffer, remote) = buffer_pair(4);
    remote.write(b"abcdef", 2).unwrap();

    match buffer.read_until(b'\n', TIMEOUT) {
        Err(SocketError::BufferExhausted { capacity: 4 }) => (),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(buffer.len(), 4);
}

#[test]
fn timeout_keeps_buffered_data() {
    let (buffer, remote) = buffer_pair(16);
    remote.write(b"abc", 2).unwrap();

    match buffer.read_exact(5, Some(Duration::from_millis(100))) {
        Err(SocketError::ReadTimeout) => (),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(buffer.len(), 3);

    remote.write(b"de", 2).unwrap();
    assert_eq!(buffer.read_exact(5, TIMEOUT).unwrap(), b"abcde");
}

#[test]
fn pop_beyond_buffered_length_fails() {
    let (buffer, remote) = buffer_pair(16);
    remote.write(b"xy", 2).unwrap();
    while buffer.len() < 2 {
        buffer.fill(TIMEOUT).unwrap();
    }

    match buffer.pop(3) {
        Err(SocketError::OutOfRange { requested: 3, buffered: 2 }) => (),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(buffer.pop(2).unwrap(), b"xy");
}

#[test]
fn read_into_moves_at_most_destination_length() {
    let (buffer, remote) = buffer_pair(32);
    remote.write(b"0123456789", 2).unwrap();

    let mut target = [0u8; 4];
    assert_eq!(buffer.read_into(&mut target, 4, TIMEOUT).unwrap(), 4);
    assert_eq!(&target, b"0123");

    let mut target = [0u8; 16];
    let count = buffer.read_into(&mut target, 1, TIMEOUT).unwrap();
    assert_eq!(&target[..count], &b"456789"[..count]);
}

#[test]
fn writes_pass_through_to_endpoint() {
    let (buffer, remote) = buffer_pair(16);
    buffer.write(b"reply").unwrap();

    let mut target = [0u8; 5];
    assert_eq!(remote.read(&mut target, 5, TIMEOUT).unwrap(), 5);
    assert_eq!(&target, b"reply");
}

#[test]
fn cancellation_interrupts_fill() {
    let (buffer, _remote) = buffer_pair(16);
    let buffer = Arc::new(buffer);
    let (result_tx, result_rx) = crossbeam_channel::bounded(1);

    let reader = {
        let buffer = buffer.clone();
        thread::spawn(move || result_tx.send(buffer.read_until(b'\n', Some(Duration::from_secs(30)))).unwrap())
    };

    thread::sleep(Duration::from_millis(50));
    buffer.canceller().cancel().unwrap();

    assert!(result_rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err().is_cancelled());
    reader.join().unwrap();
    assert!(buffer.fill(TIMEOUT).unwrap_err().is_cancelled());
}
