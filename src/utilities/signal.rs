/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::Timeout;

/// Counting wake-up handle: every `notify()` leaves exactly one unit for one
/// `wait()`. Once closed, every present and future `wait()` returns at once.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct SignalState {
    pending: u64,
    closed: bool,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_add(1);
        drop(state);
        self.condvar.notify_one();
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.condvar.notify_all();
    }

    /// Consumes one pending unit. Returns `false` if the timeout expired first.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let timeout = Timeout::start(timeout);
        let mut state = self.state.lock();
        loop {
            if state.pending > 0 {
                state.pending -= 1;
                return true;
            }
            if state.closed {
                return true;
            }
            match timeout.remaining_time() {
                None => self.condvar.wait(&mut state),
                Some(remaining) if remaining.is_zero() => return false,
                Some(remaining) => {
                    self.condvar.wait_for(&mut state, remaining);
                },
            }
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> u64 {
        self.state.lock().pending
    }
}
