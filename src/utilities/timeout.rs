/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
use std::time::{Instant, Duration};

/// Deadline for a whole "blocking" call; `None` means wait forever.
#[derive(Clone, Copy, Debug)]
pub struct Timeout {
    timeout: Option<(Instant, Duration)>,
}

impl Timeout {
    pub fn start(timeout: Option<Duration>) -> Self {
        Self {
            timeout: timeout.map(|duration| (Instant::now(), duration))
        }
    }

    pub fn remaining_time(&self) -> Option<Duration> {
        self.timeout.map(|(start, duration)| duration.saturating_sub(start.elapsed()))
    }

    pub fn expired(&self) -> bool {
        self.remaining_time().map(|time| time.is_zero()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_never_expires() {
        let timeout = Timeout::start(None);
        assert_eq!(timeout.remaining_time(), None);
        assert!(!timeout.expired());
    }

    #[test]
    fn zero_is_expired_immediately() {
        let timeout = Timeout::start(Some(Duration::ZERO));
        assert_eq!(timeout.remaining_time(), Some(Duration::ZERO));
        assert!(timeout.expired());
    }

    #[test]
    fn remaining_time_counts_down() {
        let timeout = Timeout::start(Some(Duration::from_secs(60)));
        let remaining = timeout.remaining_time().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(59));
        assert!(!timeout.expired());
    }
}
