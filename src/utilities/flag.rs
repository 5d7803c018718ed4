/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::Waker;

/// One-shot cancellation flag, paired with the waker that interrupts the
/// owning poll context.
#[derive(Debug)]
pub(crate) struct Flag {
    waker: Waker,
    flag: AtomicBool,
}

impl Flag {
    pub fn new(waker: Waker) -> Self {
        Self {
            waker,
            flag: AtomicBool::new(false),
        }
    }

    /// Returns `true` only for the call that actually raised the flag.
    pub fn raise(&self) -> Result<bool> {
        match self.flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => self.waker.wake().map(always),
            Err(_) => Ok(false),
        }
    }

    pub fn check(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

fn always<T>(_: T) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Poll, Token};

    #[test]
    fn raise_is_one_shot() {
        let poll = Poll::new().unwrap();
        let flag = Flag::new(Waker::new(poll.registry(), Token(7)).unwrap());
        assert!(!flag.check());
        assert!(flag.raise().unwrap());
        assert!(!flag.raise().unwrap());
        assert!(flag.check());
    }
}
