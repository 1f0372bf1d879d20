//! Single-flight async communication session.
//!
//! One HTTP client exists system-wide, so at most one transfer may be in
//! flight. Callers never wait for it: [`AsyncSession::try_acquire`] either
//! hands out the only [`SessionPermit`] or reports [`Busy`], and the caller
//! defers its work to a later timer tick.
//!
//! # Example
//!
//! ```
//! use ruuvi_gw_esp32::comm::AsyncSession;
//!
//! let session = AsyncSession::new();
//! let permit = session.try_acquire().unwrap();
//! assert!(session.try_acquire().is_err());
//! drop(permit);
//! assert!(session.try_acquire().is_ok());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The session is held by another transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a busy session means the caller must defer, not proceed"]
pub struct Busy;

impl fmt::Display for Busy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "async comm session is busy")
    }
}

impl std::error::Error for Busy {}

/// Binary, non-blocking mutual exclusion over the shared HTTP client.
#[derive(Debug, Default)]
pub struct AsyncSession {
    taken: AtomicBool,
}

impl AsyncSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the session if it is free.
    pub fn try_acquire(self: &Arc<Self>) -> Result<SessionPermit, Busy> {
        self.taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SessionPermit {
                session: self.clone(),
            })
            .map_err(|_| Busy)
    }

    /// Check whether a permit is currently held.
    pub fn is_busy(&self) -> bool {
        self.taken.load(Ordering::Acquire)
    }
}

/// Proof of holding the session. Dropping it frees the session.
#[derive(Debug)]
pub struct SessionPermit {
    session: Arc<AsyncSession>,
}

impl SessionPermit {
    /// Release the session explicitly.
    pub fn release(self) {}
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.session.taken.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    // ==================== Single-Flight Tests ====================

    #[test]
    fn test_second_acquire_is_busy() {
        let session = AsyncSession::new();
        let permit = session.try_acquire().unwrap();
        assert!(session.is_busy());
        assert_eq!(session.try_acquire().err(), Some(Busy));
        permit.release();
        assert!(!session.is_busy());
    }

    #[test]
    fn test_concurrent_acquire_exactly_one_wins() {
        for _ in 0..50 {
            let session = AsyncSession::new();
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let session = session.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        // Keep the permit alive until both threads have tried.
                        let permit = session.try_acquire().ok();
                        let won = permit.is_some();
                        barrier.wait();
                        won
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
            assert!(!session.is_busy());
        }
    }
}
