/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result as IoResult;
use std::time::Duration;

use log::trace;
use parking_lot::{Mutex, MutexGuard};

use crate::utilities::Timeout;
use crate::{Canceller, Endpoint, SocketError};

/// A fixed-capacity read buffer on top of an [`Endpoint`](crate::Endpoint)
///
/// Small reads are amortized by pulling as much data as fits into the buffer
/// with every OS-level read. Buffered data always starts at offset zero;
/// consuming bytes shifts the remainder down.
///
/// Two read shapes are provided: [`read_exact()`](ContiguousBuffer::read_exact())
/// returns exactly *N* bytes, and [`read_until()`](ContiguousBuffer::read_until())
/// returns everything up to and including a delimiter byte. The capacity is a
/// contract: requests that can never fit fail with an error instead of
/// blocking forever.
///
/// All operations take `&self`; the buffer state is guarded by an internal
/// lock, so a buffer can be driven by a background thread while its owner
/// writes to the endpoint or requests cancellation.
#[derive(Debug)]
pub struct ContiguousBuffer {
    endpoint: Endpoint,
    storage: Mutex<Storage>,
}

/// The buffered bytes: `data[..filled]` is valid, the rest is free space.
#[derive(Debug)]
pub(crate) struct Storage {
    data: Box<[u8]>,
    filled: usize,
}

impl ContiguousBuffer {
    /// Wraps `endpoint` with a buffer of `capacity` bytes. A capacity of zero
    /// could never hold a byte, so it is raised to one.
    pub fn new(endpoint: Endpoint, capacity: usize) -> Self {
        Self {
            endpoint,
            storage: Mutex::new(Storage::with_capacity(capacity.max(1))),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn capacity(&self) -> usize {
        self.storage.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.lock().is_empty()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock()
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Read functions
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Issues one endpoint read of at least one byte, appending at most the
    /// remaining free capacity. Returns the number of bytes appended.
    pub fn fill(&self, timeout: Option<Duration>) -> Result<usize, SocketError> {
        let mut storage = self.storage.lock();
        self.fill_locked(&mut storage, timeout)
    }

    pub(crate) fn fill_locked(&self, storage: &mut Storage, timeout: Option<Duration>) -> Result<usize, SocketError> {
        if storage.is_full() {
            return Err(SocketError::BufferExhausted { capacity: storage.capacity() });
        }
        let count = self.endpoint.read(storage.spare(), 1, timeout)?;
        storage.commit(count);
        trace!("Buffered {} more bytes ({} of {})", count, storage.len(), storage.capacity());
        Ok(count)
    }

    /// Blocks until `count` bytes are buffered, then pops exactly those.
    pub fn read_exact(&self, count: usize, timeout: Option<Duration>) -> Result<Vec<u8>, SocketError> {
        let mut storage = self.storage.lock();
        if count > storage.capacity() {
            return Err(SocketError::RequestTooLarge { requested: count, capacity: storage.capacity() });
        }

        let timeout = Timeout::start(timeout);
        while storage.len() < count {
            self.fill_locked(&mut storage, timeout.remaining_time())?;
        }
        storage.pop(count)
    }

    /// Blocks until `delimiter` is buffered, then pops everything up to and
    /// including it
    ///
    /// Fails with [`SocketError::BufferExhausted`] if the buffer fills up
    /// without the delimiter ever showing up; size the buffer for the
    /// longest expected message.
    pub fn read_until(&self, delimiter: u8, timeout: Option<Duration>) -> Result<Vec<u8>, SocketError> {
        let mut storage = self.storage.lock();
        let timeout = Timeout::start(timeout);
        loop {
            if let Some(position) = storage.find(delimiter) {
                return storage.pop(position + 1);
            }
            self.fill_locked(&mut storage, timeout.remaining_time())?;
        }
    }

    /// Waits until at least `min_bytes` (and at least one) bytes are
    /// buffered, then moves as many buffered bytes as fit into `buffer`.
    pub fn read_into(&self, buffer: &mut [u8], min_bytes: usize, timeout: Option<Duration>) -> Result<usize, SocketError> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let mut storage = self.storage.lock();
        if min_bytes > storage.capacity() {
            return Err(SocketError::RequestTooLarge { requested: min_bytes, capacity: storage.capacity() });
        }

        let timeout = Timeout::start(timeout);
        while storage.is_empty() || storage.len() < min_bytes {
            self.fill_locked(&mut storage, timeout.remaining_time())?;
        }
        let count = storage.len().min(buffer.len());
        buffer[..count].copy_from_slice(&storage.data()[..count]);
        storage.discard(count)?;
        Ok(count)
    }

    /// Removes and returns the first `count` buffered bytes, without reading.
    pub fn pop(&self, count: usize) -> Result<Vec<u8>, SocketError> {
        self.storage.lock().pop(count)
    }

    /// Returns a copy of the first `count` buffered bytes, without removing them.
    pub fn peek(&self, count: usize) -> Result<Vec<u8>, SocketError> {
        let storage = self.storage.lock();
        storage.check(count)?;
        Ok(storage.data()[..count].to_vec())
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Pass-through functions
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Writes `data` to the endpoint, using the configured number of attempts.
    pub fn write(&self, data: &[u8]) -> Result<(), SocketError> {
        self.endpoint.write(data, self.endpoint.options().write_attempts)
    }

    pub fn request_cancellation(&self) -> IoResult<bool> {
        self.endpoint.request_cancellation()
    }

    pub fn canceller(&self) -> Canceller {
        self.endpoint.canceller()
    }
}

impl Storage {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    fn spare(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    fn commit(&mut self, count: usize) {
        debug_assert!(self.filled + count <= self.data.len());
        self.filled = self.filled.saturating_add(count).min(self.data.len());
    }

    fn find(&self, byte: u8) -> Option<usize> {
        self.data().iter().position(|value| *value == byte)
    }

    fn check(&self, count: usize) -> Result<(), SocketError> {
        match count <= self.filled {
            true => Ok(()),
            false => Err(SocketError::OutOfRange { requested: count, buffered: self.filled }),
        }
    }

    pub fn pop(&mut self, count: usize) -> Result<Vec<u8>, SocketError> {
        self.check(count)?;
        let fragment = self.data[..count].to_vec();
        self.shift(count);
        Ok(fragment)
    }

    pub fn discard(&mut self, count: usize) -> Result<(), SocketError> {
        self.check(count)?;
        self.shift(count);
        Ok(())
    }

    fn shift(&mut self, count: usize) {
        self.data.copy_within(count..self.filled, 0);
        self.filled -= count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with(bytes: &[u8], capacity: usize) -> Storage {
        let mut storage = Storage::with_capacity(capacity);
        storage.spare()[..bytes.len()].copy_from_slice(bytes);
        storage.commit(bytes.len());
        storage
    }

    #[test]
    fn pop_shifts_remainder_to_front() {
        let mut storage = storage_with(b"abc\ndef", 16);
        assert_eq!(storage.pop(4).unwrap(), b"abc\n");
        assert_eq!(storage.data(), b"def");
        assert_eq!(storage.spare().len(), 13);
    }

    #[test]
    fn pop_beyond_filled_is_rejected() {
        let mut storage = storage_with(b"ab", 4);
        match storage.pop(3) {
            Err(SocketError::OutOfRange { requested: 3, buffered: 2 }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(storage.data(), b"ab");
    }

    #[test]
    fn discard_everything_empties_storage() {
        let mut storage = storage_with(b"full", 4);
        assert!(storage.is_full());
        storage.discard(4).unwrap();
        assert!(storage.is_empty());
        assert_eq!(storage.spare().len(), 4);
    }

    #[test]
    fn find_only_searches_filled_region() {
        let mut storage = storage_with(b"xy", 8);
        storage.data[5] = b'\n';
        assert_eq!(storage.find(b'\n'), None);
        assert_eq!(storage.find(b'y'), Some(1));
    }
}
