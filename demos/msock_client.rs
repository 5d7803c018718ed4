/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::{str, net::{IpAddr, SocketAddr}, time::Duration};

use msock_rs::{Canceller, ContiguousBuffer, Endpoint, SocketError};

use dns_lookup::lookup_host;
use lazy_static::lazy_static;
use log::{debug, info, warn, error};
use parking_lot::Mutex;
use regex::bytes::Regex;

const REMOTE_HOST: &str = "www.example.com";
const PORT_NUMBER: u16 = 80;
const BUFFER_SIZE: usize = 65536;
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

lazy_static! {
    static ref CANCELLER: Mutex<Option<Canceller>> = Mutex::new(None);
}

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("msock - Example HTTP Client [Version {}]", PKG_VERSION);

    /* Register Ctrl+C handler, cancelling the current connection */
    ctrlc::set_handler(move || {
        warn!("Shutdown has been requested!");
        if let Some(canceller) = CANCELLER.lock().as_ref() {
            canceller.cancel().expect("Failed to cancel operation!");
        }
    })
    .expect("Failed to register CTRL+C handler!");

    // Lookup ip address
    info!("Looking up IP address for server: {:?}", REMOTE_HOST);
    match lookup_host(REMOTE_HOST) {
        Ok(result) => {
            for ip_addr in result {
                if let Err(error) = fetch(ip_addr, REMOTE_HOST) {
                    error!("Request to {} has failed: {}", ip_addr, error);
                }
            }
        }
        Err(error) => error!("Address lookup failed: {:?}", error),
    }

    /* Bye! */
    info!("That's it, goodbye!");
}

fn fetch(ip_addr: IpAddr, hostname: &str) -> Result<(), SocketError> {
    // Connect to the server
    info!("Connecting to server: {}:{}", ip_addr, PORT_NUMBER);
    let endpoint = Endpoint::connect(SocketAddr::new(ip_addr, PORT_NUMBER), Some(Duration::from_secs(10)))?;
    info!("Connected: {:?} -> {:?}", endpoint.local_addr(), endpoint.peer_addr());

    *CANCELLER.lock() = Some(endpoint.canceller());

    // Send HTTP request
    let buffer = ContiguousBuffer::new(endpoint, BUFFER_SIZE);
    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n", hostname);
    info!("Sending HTTP request to server...");
    buffer.write(request.as_bytes())?;

    // Read HTTP response header, line by line
    info!("Reading HTTP response from server...");
    let mut content_length = None;
    loop {
        let line = buffer.read_until(b'\n', Some(Duration::from_secs(15)))?;
        if line == b"\r\n" {
            break;
        }
        debug!("Header: {:?}", String::from_utf8_lossy(&line));
        content_length = content_length.or_else(|| parse_content_length(&line));
    }

    // Read HTTP response body
    debug!("Content-Length: {:?}", content_length);
    match content_length {
        Some(length) if length <= buffer.capacity() => {
            let body = buffer.read_exact(length, Some(Duration::from_secs(15)))?;
            info!("Response: {:?}", str::from_utf8(&body[..]));
        },
        Some(length) => warn!("Response body of {} bytes exceeds the buffer size!", length),
        None => warn!("Response has no Content-Length header!"),
    }

    Ok(())
}

fn parse_content_length(line: &[u8]) -> Option<usize> {
    lazy_static! {
        static ref CONTENT_LENGTH: Regex = Regex::new(r"(?i)^Content-Length:\s*(\d+)").expect("Failed to create regex!");
    }
    CONTENT_LENGTH.captures(line)
        .and_then(|cap| cap.get(1))
        .and_then(|cap| str::from_utf8(cap.as_bytes()).ok())
        .and_then(|str| str.parse::<usize>().ok())
}
