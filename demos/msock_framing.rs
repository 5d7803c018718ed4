/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::thread;
use std::time::Duration;

use msock_rs::{delimiter, ContiguousBuffer, Demultiplexer, Endpoint, Outcome, SocketError};

use lazy_static::lazy_static;
use log::{info, warn, error};
use regex::bytes::Regex;

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("msock - Example Framing [Version {}]", PKG_VERSION);

    if let Err(error) = run() {
        error!("Example has failed: {}", error);
    }

    /* Bye! */
    info!("That's it, goodbye!");
}

fn run() -> Result<(), SocketError> {
    /* Create a pair of connected endpoints */
    let (local, remote) = Endpoint::pair()?;

    /* Commands look like "<NAME:ARGS>", everything else is a plain line */
    let demux = Demultiplexer::new(ContiguousBuffer::new(local, 4096));
    let commands = demux.register_condition(command)?;
    let lines = demux.register_condition(delimiter(b'\n'))?;
    demux.start()?;

    /* Produce some input on another thread */
    let producer = thread::spawn(move || -> Result<(), SocketError> {
        for chunk in ["hello\n<PING:1>", "world\n<ECHO:abc", ">\n", "bye\n"] {
            remote.write(chunk.as_bytes(), 2)?;
            thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    });

    /* Consume both streams */
    for _n in 0..2 {
        info!("Command: {:?}", demux.read_blocking_str(commands, Some(Duration::from_secs(5)))?);
    }
    for _n in 0..3 {
        info!("Line: {:?}", demux.read_blocking_str(lines, Some(Duration::from_secs(5)))?);
    }

    match producer.join() {
        Ok(result) => result?,
        Err(_) => warn!("Producer thread has panicked!"),
    }

    demux.stop()
}

fn command(buffer: &[u8]) -> Outcome {
    lazy_static! {
        static ref COMMAND: Regex = Regex::new(r"^<[A-Z]+:[^>]*>").expect("Failed to create regex!");
    }
    match buffer.first() {
        Some(b'<') => match COMMAND.find(buffer) {
            Some(found) => Outcome::Cut(found.end()),
            None if buffer.contains(&b'>') => Outcome::Discard(1),
            None => Outcome::Pending,
        },
        _ => Outcome::Pending,
    }
}
