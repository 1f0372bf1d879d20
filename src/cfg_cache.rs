//! Mutex-guarded config-derived caches.
//!
//! Hot paths (advertisement intake, MQTT instant relay) read a few values
//! derived from the gateway config on every call. Instead of taking a config
//! snapshot each time they read a small cache that the owning task rebuilds
//! wholesale whenever the config changes.
//!
//! The cache is created on first use. Access goes through a
//! [`CfgCacheGuard`], which releases the lock when dropped, so a reader sees
//! either the whole old cache or the whole new one.
//!
//! # Example
//!
//! ```
//! use ruuvi_gw_esp32::cfg_cache::CfgCache;
//!
//! #[derive(Default)]
//! struct Flags {
//!     use_ntp: bool,
//!     instant: bool,
//! }
//!
//! let cache: CfgCache<Flags> = CfgCache::new("demo");
//! {
//!     let mut guard = cache.lock();
//!     guard.use_ntp = true;
//!     guard.instant = true;
//! }
//! assert!(cache.lock().use_ntp);
//! ```

use log::debug;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError, TryLockError};

/// The cache is locked by another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a busy cache means the caller must skip or defer its work"]
pub struct CacheBusy;

impl fmt::Display for CacheBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config cache is busy")
    }
}

impl std::error::Error for CacheBusy {}

/// Errors raised while rebuilding a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgCacheError {
    /// A derived buffer could not be allocated.
    OutOfMemory {
        /// Which buffer failed.
        what: &'static str,
        /// Number of elements requested.
        len: usize,
    },
}

impl fmt::Display for CfgCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { what, len } => {
                write!(f, "can't allocate {} entries for {}", len, what)
            }
        }
    }
}

impl std::error::Error for CfgCacheError {}

/// Lazily created, mutex-guarded cache of type `T`.
pub struct CfgCache<T: Default> {
    name: &'static str,
    cell: OnceLock<Mutex<T>>,
}

impl<T: Default> CfgCache<T> {
    /// Create an empty cache. The value itself is built on first lock.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceLock::new(),
        }
    }

    /// Lock the cache, blocking until it is available.
    ///
    /// Not reentrant: locking twice on one thread without dropping the
    /// first guard deadlocks.
    pub fn lock(&self) -> CfgCacheGuard<'_, T> {
        CfgCacheGuard {
            guard: self
                .mutex()
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Lock the cache without blocking.
    pub fn try_lock(&self) -> Result<CfgCacheGuard<'_, T>, CacheBusy> {
        match self.mutex().try_lock() {
            Ok(guard) => Ok(CfgCacheGuard { guard }),
            Err(TryLockError::Poisoned(poisoned)) => Ok(CfgCacheGuard {
                guard: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => Err(CacheBusy),
        }
    }

    /// Check whether the cache has been created yet.
    pub fn is_created(&self) -> bool {
        self.cell.get().is_some()
    }

    fn mutex(&self) -> &Mutex<T> {
        self.cell.get_or_init(|| {
            debug!("cfg cache '{}' created", self.name);
            Mutex::new(T::default())
        })
    }
}

impl<T: Default> fmt::Debug for CfgCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfgCache")
            .field("name", &self.name)
            .field("created", &self.is_created())
            .finish()
    }
}

/// Exclusive access to a cache. Dropping it releases the lock.
pub struct CfgCacheGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> CfgCacheGuard<'_, T> {
    /// Release the lock explicitly.
    pub fn unlock(self) {}
}

impl<T> Deref for CfgCacheGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for CfgCacheGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
