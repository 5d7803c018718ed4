/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use crate::buffer::Storage;
use crate::utilities::{Signal, Timeout};
use crate::{Canceller, ContiguousBuffer, SocketError};

/// Decision of a [`Condition`] about the current head of the buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Not enough data to decide; wait for the next refill.
    Pending,
    /// Cut the first *N* bytes off as a fragment for this condition.
    Cut(usize),
    /// Drop the first *N* bytes without delivering them anywhere.
    Discard(usize),
}

impl Outcome {
    /// Decodes the classic integer contract: `0` means pending, `+N` means
    /// cut *N* bytes and `-N` means discard *N* bytes.
    pub fn from_count(count: isize) -> Self {
        match count {
            0 => Self::Pending,
            positive if positive > 0 => Self::Cut(positive.unsigned_abs()),
            negative => Self::Discard(negative.unsigned_abs()),
        }
    }
}

/// A framing predicate, evaluated by the [`Demultiplexer`] worker against
/// the unconsumed head of the stream
///
/// The data handed to `evaluate()` always starts at the first byte that has
/// not been cut or discarded yet. Returning a count larger than `data.len()`
/// is a bug in the condition and terminates the demultiplexer with
/// [`SocketError::InvalidCondition`].
///
/// Any `FnMut(&[u8]) -> Outcome + Send` closure is a condition.
pub trait Condition: Send {
    fn evaluate(&mut self, data: &[u8]) -> Outcome;
}

impl<F> Condition for F
where
    F: FnMut(&[u8]) -> Outcome + Send,
{
    fn evaluate(&mut self, data: &[u8]) -> Outcome {
        self(data)
    }
}

/// Condition that cuts everything up to and including a delimiter byte
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delimiter(u8);

impl Condition for Delimiter {
    fn evaluate(&mut self, data: &[u8]) -> Outcome {
        match data.iter().position(|value| *value == self.0) {
            Some(position) => Outcome::Cut(position + 1),
            None => Outcome::Pending,
        }
    }
}

/// Creates a [`Condition`] that splits the stream at every `byte`, keeping
/// the delimiter at the end of each fragment. It never discards.
pub fn delimiter(byte: u8) -> Delimiter {
    Delimiter(byte)
}

/// Identifies one registered condition, and its fragment queue, within the
/// [`Demultiplexer`] that returned it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConditionHandle(usize);

/// Turns a byte stream into independent streams of fragments, one per
/// registered [`Condition`]
///
/// A `msock_rs::Demultiplexer` owns a [`ContiguousBuffer`] and, once
/// [`start()`](Demultiplexer::start())ed, a dedicated worker thread. The
/// worker refills the buffer, then evaluates the conditions in registration
/// order against the buffered data. Whenever a condition cuts a fragment, the
/// fragment is appended to that condition's queue and the evaluation starts
/// over from the first condition, so that several fragments found by a single
/// refill come out in stream order. Discarded bytes simply vanish.
///
/// Any number of threads may read fragments via
/// [`read_blocking()`](Demultiplexer::read_blocking()) or
/// [`read_non_blocking()`](Demultiplexer::read_non_blocking()), and write to
/// the endpoint, at the same time.
///
/// When the worker ends, because of [`stop()`](Demultiplexer::stop()) or
/// because the endpoint failed, the failure is recorded and every reader is
/// woken up. From then on, reads return the queued fragments that are left,
/// followed by the recorded failure.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use msock_rs::{delimiter, ContiguousBuffer, Demultiplexer, Endpoint};
///
/// let (local, remote) = Endpoint::pair().unwrap();
/// let demux = Demultiplexer::new(ContiguousBuffer::new(local, 4096));
/// let lines = demux.register_condition(delimiter(b'\n')).unwrap();
/// demux.start().unwrap();
///
/// remote.write(b"hello\nworld\n", 2).unwrap();
/// assert_eq!(demux.read_blocking(lines, Some(Duration::from_secs(1))).unwrap(), b"hello\n");
/// ```
pub struct Demultiplexer {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

enum Lifecycle {
    Registering(Vec<Box<dyn Condition>>),
    Running(JoinHandle<Result<(), SocketError>>),
    Stopped,
}

struct Shared {
    buffer: ContiguousBuffer,
    queues: Mutex<Queues>,
}

#[derive(Default)]
struct Queues {
    slots: Vec<Slot>,
    terminal: Option<SocketError>,
}

struct Slot {
    fragments: VecDeque<Vec<u8>>,
    signal: Arc<Signal>,
}

impl Demultiplexer {
    pub fn new(buffer: ContiguousBuffer) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer,
                queues: Mutex::new(Queues::default()),
            }),
            lifecycle: Mutex::new(Lifecycle::Registering(Vec::new())),
        }
    }

    /// Appends a condition to the evaluation order. Conditions can only be
    /// registered before the worker is started.
    pub fn register_condition<C: Condition + 'static>(&self, condition: C) -> Result<ConditionHandle, SocketError> {
        let mut lifecycle = self.lifecycle.lock();
        match &mut *lifecycle {
            Lifecycle::Registering(conditions) => {
                let mut queues = self.shared.queues.lock();
                let handle = ConditionHandle(queues.slots.len());
                queues.slots.push(Slot {
                    fragments: VecDeque::new(),
                    signal: Arc::new(Signal::new()),
                });
                conditions.push(Box::new(condition));
                Ok(handle)
            },
            _ => Err(SocketError::AlreadyStarted),
        }
    }

    /// Spawns the worker thread. A demultiplexer can be started only once.
    pub fn start(&self) -> Result<(), SocketError> {
        let mut lifecycle = self.lifecycle.lock();
        let conditions = match mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Registering(conditions) => conditions,
            other => {
                *lifecycle = other;
                return Err(SocketError::AlreadyStarted);
            },
        };

        let shared = self.shared.clone();
        *lifecycle = Lifecycle::Running(thread::spawn(move || shared.run(conditions)));
        Ok(())
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Read functions
    // ~~~~~~~~~~~~~~~~~~~~~~~

    /// Pops the oldest queued fragment of `handle`
    ///
    /// Fails with [`SocketError::NoData`] if the queue is empty, or with the
    /// recorded failure once the demultiplexer has terminated.
    pub fn read_non_blocking(&self, handle: ConditionHandle) -> Result<Vec<u8>, SocketError> {
        let mut queues = self.shared.queues.lock();
        let slot = queues.slots.get_mut(handle.0).ok_or(SocketError::InvalidHandle)?;
        if let Some(fragment) = slot.fragments.pop_front() {
            return Ok(fragment);
        }
        match &queues.terminal {
            Some(error) => Err(error.clone()),
            None => Err(SocketError::NoData),
        }
    }

    /// Waits for the next fragment of `handle`
    ///
    /// Fails with [`SocketError::ReadTimeout`] if nothing arrived before the
    /// timeout; the queue is left untouched in that case.
    pub fn read_blocking(&self, handle: ConditionHandle, timeout: Option<Duration>) -> Result<Vec<u8>, SocketError> {
        let timeout = Timeout::start(timeout);
        let signal = self.signal(handle)?;
        loop {
            if !signal.wait(timeout.remaining_time()) {
                return Err(SocketError::ReadTimeout);
            }
            match self.read_non_blocking(handle) {
                Err(SocketError::NoData) => trace!("Wake-up unit without a fragment, waiting again"),
                result => return result,
            }
        }
    }

    pub fn read_blocking_str(&self, handle: ConditionHandle, timeout: Option<Duration>) -> Result<String, SocketError> {
        self.read_blocking(handle, timeout).map(|fragment| String::from_utf8_lossy(&fragment).into_owned())
    }

    /// Waits until `handle` is signalled, without dequeuing a fragment. Use
    /// [`read_non_blocking()`](Demultiplexer::read_non_blocking()) afterwards.
    ///
    /// Returns `false` if the timeout expired.
    pub fn wait(&self, handle: ConditionHandle, timeout: Option<Duration>) -> Result<bool, SocketError> {
        Ok(self.signal(handle)?.wait(timeout))
    }

    fn signal(&self, handle: ConditionHandle) -> Result<Arc<Signal>, SocketError> {
        let queues = self.shared.queues.lock();
        queues.slots.get(handle.0).map(|slot| slot.signal.clone()).ok_or(SocketError::InvalidHandle)
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // Write functions
    // ~~~~~~~~~~~~~~~~~~~~~~~

    pub fn write(&self, data: &[u8]) -> Result<(), SocketError> {
        self.shared.buffer.write(data)
    }

    pub fn write_str(&self, text: &str) -> Result<(), SocketError> {
        self.write(text.as_bytes())
    }

    // ~~~~~~~~~~~~~~~~~~~~~~~
    // State
    // ~~~~~~~~~~~~~~~~~~~~~~~

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_)) && self.terminal_error().is_none()
    }

    /// The failure that ended the worker, if it has ended.
    pub fn terminal_error(&self) -> Option<SocketError> {
        self.shared.queues.lock().terminal.clone()
    }

    pub fn canceller(&self) -> Canceller {
        self.shared.buffer.canceller()
    }

    /// Cancels the endpoint and joins the worker thread
    ///
    /// Returns the failure that ended the worker, unless that failure was
    /// the cancellation itself. Calling `stop()` again is harmless. A panic
    /// raised by a condition is resumed on the calling thread; until then,
    /// readers already see [`SocketError::WorkerPanicked`].
    pub fn stop(&self) -> Result<(), SocketError> {
        match self.halt() {
            Some(Ok(result)) => result,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => Ok(()),
        }
    }

    fn halt(&self) -> Option<thread::Result<Result<(), SocketError>>> {
        let worker = match mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped) {
            Lifecycle::Running(worker) => Some(worker),
            _ => None,
        };
        if let Err(error) = self.shared.buffer.request_cancellation() {
            warn!("Failed to signal cancellation: {:?}", error);
        }
        let result = worker.map(JoinHandle::join);
        self.shared.terminate(SocketError::TerminationRequested);
        result
    }
}

impl Debug for Demultiplexer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let queues = self.shared.queues.lock();
        f.debug_struct("Demultiplexer")
            .field("buffer", &self.shared.buffer)
            .field("conditions", &queues.slots.len())
            .field("terminal", &queues.terminal)
            .finish()
    }
}

impl Drop for Demultiplexer {
    fn drop(&mut self) {
        if let Some(Err(_)) = self.halt() {
            error!("Demultiplexer worker has panicked!");
        }
    }
}

// ~~~~~~~~~~~~~~~~~~~~~~~
// Worker
// ~~~~~~~~~~~~~~~~~~~~~~~

impl Shared {
    fn run(&self, mut conditions: Vec<Box<dyn Condition>>) -> Result<(), SocketError> {
        debug!("Demultiplexer worker started with {} condition(s)", conditions.len());
        let error = match panic::catch_unwind(AssertUnwindSafe(|| self.pump(&mut conditions))) {
            Ok(error) => error,
            Err(payload) => {
                error!("A condition has panicked, the demultiplexer worker stops");
                self.terminate(SocketError::WorkerPanicked);
                panic::resume_unwind(payload);
            },
        };
        self.terminate(error.clone());
        match error {
            SocketError::TerminationRequested => {
                debug!("Demultiplexer worker stopped");
                Ok(())
            },
            error => {
                error!("Demultiplexer worker has failed: {}", error);
                Err(error)
            },
        }
    }

    fn pump(&self, conditions: &mut [Box<dyn Condition>]) -> SocketError {
        loop {
            let mut storage = self.buffer.lock();
            if let Err(error) = self.buffer.fill_locked(&mut storage, None) {
                return error;
            }
            if let Err(error) = self.dispatch(conditions, &mut storage) {
                return error;
            }
        }
    }

    /// Runs the conditions against the buffer head until none of them can
    /// cut or discard anything more.
    fn dispatch(&self, conditions: &mut [Box<dyn Condition>], storage: &mut Storage) -> Result<(), SocketError> {
        'restart: while !storage.is_empty() {
            for (index, condition) in conditions.iter_mut().enumerate() {
                let buffered = storage.len();
                match condition.evaluate(storage.data()) {
                    Outcome::Cut(count) if count > 0 => {
                        check_count(count, buffered)?;
                        let fragment = storage.pop(count)?;
                        trace!("Condition #{} has cut a fragment of {} bytes", index, count);
                        self.deliver(index, fragment);
                        continue 'restart;
                    },
                    Outcome::Discard(count) if count > 0 => {
                        check_count(count, buffered)?;
                        storage.discard(count)?;
                        trace!("Condition #{} has discarded {} bytes", index, count);
                        continue 'restart;
                    },
                    _ => (),
                }
            }
            break;
        }
        Ok(())
    }

    fn deliver(&self, index: usize, fragment: Vec<u8>) {
        let mut queues = self.queues.lock();
        if let Some(slot) = queues.slots.get_mut(index) {
            slot.fragments.push_back(fragment);
            slot.signal.notify();
        }
    }

    /// Records the first terminal failure and releases every waiting reader.
    fn terminate(&self, error: SocketError) {
        let mut queues = self.queues.lock();
        if queues.terminal.is_none() {
            queues.terminal = Some(error);
        }
        for slot in queues.slots.iter() {
            slot.signal.close();
        }
    }
}

fn check_count(requested: usize, buffered: usize) -> Result<(), SocketError> {
    match requested <= buffered {
        true => Ok(()),
        false => Err(SocketError::InvalidCondition { requested, buffered }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_count() {
        assert_eq!(Outcome::from_count(0), Outcome::Pending);
        assert_eq!(Outcome::from_count(7), Outcome::Cut(7));
        assert_eq!(Outcome::from_count(-3), Outcome::Discard(3));
        assert_eq!(Outcome::from_count(isize::MIN), Outcome::Discard(isize::MIN.unsigned_abs()));
    }

    #[test]
    fn delimiter_is_inclusive_and_one_based() {
        let mut newline = delimiter(b'\n');
        assert_eq!(newline.evaluate(b"\n"), Outcome::Cut(1));
        assert_eq!(newline.evaluate(b"abc\ndef\n"), Outcome::Cut(4));
        assert_eq!(newline.evaluate(b"abc"), Outcome::Pending);
        assert_eq!(newline.evaluate(b""), Outcome::Pending);
    }

    #[test]
    fn closures_are_conditions() {
        let mut calls = 0;
        let mut fixed = |data: &[u8]| {
            calls += 1;
            match data.len() >= 2 {
                true => Outcome::Cut(2),
                false => Outcome::Pending,
            }
        };
        assert_eq!(Condition::evaluate(&mut fixed, b"abc"), Outcome::Cut(2));
        assert_eq!(Condition::evaluate(&mut fixed, b"a"), Outcome::Pending);
        assert_eq!(calls, 2);
    }

    #[test]
    fn count_check_rejects_overlong_claims() {
        assert!(check_count(3, 3).is_ok());
        match check_count(4, 3) {
            Err(SocketError::InvalidCondition { requested: 4, buffered: 3 }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
