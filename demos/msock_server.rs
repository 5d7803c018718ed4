/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use msock_rs::{ContiguousBuffer, Demultiplexer, Endpoint, Listener, ListenerOptions, Outcome, SocketError};

use crossbeam_channel::Receiver;
use lazy_static::lazy_static;
use lazy_rc::LazyArc;
use log::{info, warn, error};
use regex::bytes::Regex;

static CPU_COUNT: LazyArc<usize> = LazyArc::empty();

const PORT_NUMBER: u16 = 8080;
const BUFFER_SIZE: usize = 16384;
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("msock - Example HTTP Server [Version {}]", PKG_VERSION);

    /* Bind Listener to local socket */
    let options = ListenerOptions::default().backlog(128);
    let listener = match Listener::bind_with(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), PORT_NUMBER), options) {
        Ok(value) => value,
        Err(error) => return error!("Failed to bind Listener: {}", error),
    };

    /* Register Canceller with Ctrl+C handler */
    let canceller = listener.canceller();
    ctrlc::set_handler(move || {
        warn!("Shutdown has been requested!");
        canceller.cancel().expect("Failed to cancel operation!");
    })
    .expect("Failed to register CTRL+C handler!");

    /* Create Crossbeam channel */
    let (channel_tx, channel_rx) = crossbeam_channel::bounded::<Endpoint>(256);

    /* Detect number of processors */
    let cpu_count = cpu_count();

    /* Create some worker threads to handle incoming connections */
    let mut threads = Vec::with_capacity(*cpu_count);
    for _n in 0..(*cpu_count) {
        let thread_receiver = channel_rx.clone();
        threads.push(thread::spawn(move || thread_worker(thread_receiver)));
    }

    /* Accept all incoming connections */
    info!("Waiting for incoming connections...");
    loop {
        match listener.accept(Some(Duration::from_secs(30))) {
            Ok(endpoint) => {
                info!("Connection received: {:?} -> {:?}", endpoint.local_addr(), endpoint.peer_addr());
                if let Err(error) = channel_tx.send_timeout(endpoint, Duration::from_secs(15)) {
                    warn!("Failed to enqueue the connection: {:?}", error);
                }
            },
            Err(SocketError::ReadTimeout) => info!("No connection received yet, still waiting..."),
            Err(SocketError::TerminationRequested) => {
                error!("Accept operation was cancelled!");
                break;
            },
            Err(error) => {
                error!("Accept operation failed: {}", error);
                break; /* stop server after an error was encountered */
            },
        }
    }

    /* Close the "sender" end of the channel*/
    drop(channel_tx);

    /* Wait for all worker threads to complete */
    threads.drain(..).for_each(|thread| thread.join().expect("Failed to join with worker thread!"));

    /* Bye! */
    info!("That's it, goodbye!");
}

fn thread_worker(receiver: Receiver<Endpoint>) {
    /* Get thread id*/
    let thread_id = thread::current().id();

    /* Process all incoming connections */
    while let Ok(endpoint) = receiver.recv() {
        handle_connection(endpoint, thread_id);
    }
}

fn handle_connection(endpoint: Endpoint, thread_id: ThreadId) {
    /* Split the stream into HTTP requests */
    let demux = Demultiplexer::new(ContiguousBuffer::new(endpoint, BUFFER_SIZE));
    let requests = match demux.register_condition(end_of_header) {
        Ok(handle) => handle,
        Err(error) => return error!("[{:?}] Failed to register condition: {}", thread_id, error),
    };
    if let Err(error) = demux.start() {
        return error!("[{:?}] Failed to start demultiplexer: {}", thread_id, error);
    }

    /* Serve requests until the client goes away */
    loop {
        match demux.read_blocking_str(requests, Some(Duration::from_secs(15))) {
            Ok(request) => info!("[{:?}] Request: {:?}", thread_id, request),
            Err(SocketError::Closed) => break,
            Err(error) => {
                error!("[{:?}] Read operation failed: {}", thread_id, error);
                break;
            },
        }

        let response = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 48\r\n\r\n<!DOCTYPE html>\r\n<title>Hello</title><h1>Hi</h1>";
        if let Err(error) = demux.write_str(response) {
            error!("[{:?}] Write operation failed: {}", thread_id, error);
            break;
        }
    }

    /* Shut down the worker thread */
    match demux.stop() {
        Ok(()) | Err(SocketError::Closed) => info!("[{:?}] Connection closed.", thread_id),
        Err(error) => warn!("[{:?}] Connection ended with: {}", thread_id, error),
    }
}

fn end_of_header(buffer: &[u8]) -> Outcome {
    lazy_static! {
        static ref END_OF_HEADER: Regex = Regex::new(r"\r\n\r\n").expect("Failed to create regex!");
    }
    match END_OF_HEADER.find(buffer) {
        Some(header) => Outcome::Cut(header.end()),
        None => Outcome::Pending,
    }
}

fn cpu_count() -> Arc<usize> {
    CPU_COUNT.or_init_with(|| num_cpus::get().max(1))
}
