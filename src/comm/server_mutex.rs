//! Mutual exclusion between outgoing HTTP posts and the local HTTP server.
//!
//! When MQTT runs over TLS and an HTTP target is enabled as well, the TLS
//! buffers are too scarce for an outgoing post and an incoming web-UI
//! connection at the same time. In that configuration the mutex is
//! activated; otherwise every `try_lock` succeeds without locking.
//!
//! Only the party holding an [`HttpServerLock`] can release the mutex, by
//! dropping it.

use super::session::Busy;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

const UNLOCKED: u32 = 0;

#[derive(Debug, Default)]
pub struct HttpServerMutex {
    active: AtomicBool,
    /// Ticket of the current holder, `UNLOCKED` when free.
    holder: AtomicU32,
    next_ticket: AtomicU32,
}

impl HttpServerMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            info!("HTTP server mutex activated");
        }
    }

    /// Deactivate the mutex. A held lock is released; its guard becomes inert.
    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("HTTP server mutex deactivated");
        }
        self.holder.store(UNLOCKED, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Lock without blocking. Always succeeds while deactivated, with a
    /// guard that holds nothing.
    pub fn try_lock(self: &Arc<Self>) -> Result<HttpServerLock, Busy> {
        if !self.is_active() {
            return Ok(HttpServerLock { held: None });
        }
        let ticket = self.issue_ticket();
        self.holder
            .compare_exchange(UNLOCKED, ticket, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| HttpServerLock {
                held: Some((self.clone(), ticket)),
            })
            .map_err(|_| {
                debug!("HTTP server mutex is busy");
                Busy
            })
    }

    pub fn is_locked(&self) -> bool {
        self.holder.load(Ordering::Acquire) != UNLOCKED
    }

    fn issue_ticket(&self) -> u32 {
        loop {
            let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if ticket != UNLOCKED {
                return ticket;
            }
        }
    }
}

/// Proof of holding the HTTP server mutex. Dropping it unlocks.
#[derive(Debug)]
#[must_use = "dropping the guard unlocks the HTTP server mutex immediately"]
pub struct HttpServerLock {
    held: Option<(Arc<HttpServerMutex>, u32)>,
}

impl HttpServerLock {
    /// Whether this guard actually locked an active mutex.
    pub fn is_held(&self) -> bool {
        self.held
            .as_ref()
            .is_some_and(|(m, ticket)| m.holder.load(Ordering::Acquire) == *ticket)
    }

    /// Release the mutex explicitly.
    pub fn unlock(self) {}
}

impl Drop for HttpServerLock {
    fn drop(&mut self) {
        if let Some((mutex, ticket)) = self.held.take() {
            // A no-op when deactivate already released this ticket.
            let _ = mutex.holder.compare_exchange(
                ticket,
                UNLOCKED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> Arc<HttpServerMutex> {
        let m = Arc::new(HttpServerMutex::new());
        m.activate();
        m
    }

    // ==================== Locking Tests ====================

    #[test]
    fn test_inactive_never_blocks() {
        let m = Arc::new(HttpServerMutex::new());
        let a = m.try_lock().unwrap();
        let b = m.try_lock().unwrap();
        assert!(!a.is_held());
        assert!(!b.is_held());
        assert!(!m.is_locked());
    }

    #[test]
    fn test_active_excludes() {
        let m = active();
        let guard = m.try_lock().unwrap();
        assert!(guard.is_held());
        assert_eq!(m.try_lock().map(|_| ()), Err(Busy));
        guard.unlock();
        assert!(!m.is_locked());
        let _again = m.try_lock().unwrap();
        assert!(m.is_locked());
    }

    #[test]
    fn test_deactivate_releases() {
        let m = active();
        let guard = m.try_lock().unwrap();
        m.deactivate();
        assert!(!m.is_locked());
        assert!(!guard.is_held());
        m.activate();
        let _other = m.try_lock().unwrap();
        assert!(m.is_locked());
    }

    // ==================== Ownership Tests ====================

    #[test]
    fn test_stale_guard_keeps_new_holder_locked() {
        let m = active();
        let stale = m.try_lock().unwrap();
        m.deactivate();
        m.activate();
        let server = m.try_lock().unwrap();

        drop(stale);
        assert!(m.is_locked());
        assert!(server.is_held());
        drop(server);
        assert!(!m.is_locked());
    }

    #[test]
    fn test_inactive_guard_never_unlocks_later_holder() {
        let m = Arc::new(HttpServerMutex::new());
        let inert = m.try_lock().unwrap();
        m.activate();
        let server = m.try_lock().unwrap();

        drop(inert);
        assert!(m.is_locked());
        assert!(server.is_held());
    }
}
