//! Network liveness tracking for the network watchdog.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Moment of the last successful network delivery.
#[derive(Debug)]
pub struct NetworkTimeout {
    last_success: Mutex<Instant>,
}

impl NetworkTimeout {
    pub fn new() -> Self {
        Self {
            last_success: Mutex::new(Instant::now()),
        }
    }

    /// Record a successful delivery now.
    pub fn update_timestamp(&self) {
        self.set_timestamp(Instant::now());
    }

    /// Record a successful delivery at `at`.
    pub fn set_timestamp(&self, at: Instant) {
        *self
            .last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// True when nothing was delivered for longer than `timeout`.
    pub fn check(&self, timeout: Duration) -> bool {
        self.last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            > timeout
    }
}

impl Default for NetworkTimeout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_timestamp_not_expired() {
        let nt = NetworkTimeout::new();
        assert!(!nt.check(Duration::from_secs(1)));
    }

    #[test]
    fn test_expires_after_timeout() {
        let nt = NetworkTimeout::new();
        std::thread::sleep(Duration::from_millis(30));
        assert!(nt.check(Duration::from_millis(10)));
        nt.update_timestamp();
        assert!(!nt.check(Duration::from_millis(10)));
    }
}
