//! Signal bus: a per-task set of pending signal bits.
//!
//! Any thread may post a signal to a bus; exactly one registered thread may
//! wait on it and drain the pending bits. Pending signals are handed out in
//! ascending numeric order, not in arrival order, and each pending bit is
//! delivered once per wait no matter how many times it was posted.
//!
//! # Example
//!
//! ```
//! use ruuvi_gw_esp32::os::{SignalBus, SignalKind};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Sig {
//!     Stop,
//!     Ping,
//! }
//!
//! impl SignalKind for Sig {
//!     const ALL: &'static [Self] = &[Sig::Stop, Sig::Ping];
//!
//!     fn num(self) -> u32 {
//!         self as u32
//!     }
//! }
//!
//! let bus = SignalBus::<Sig>::with_all_signals("demo");
//! let receiver = bus.register_current_thread().unwrap();
//!
//! bus.send(Sig::Ping).unwrap();
//! bus.send(Sig::Stop).unwrap();
//!
//! let drained: Vec<Sig> = receiver.wait_with_timeout(Duration::from_millis(10)).collect();
//! assert_eq!(drained, vec![Sig::Stop, Sig::Ping]);
//! ```

use log::{debug, error};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Number of distinct signals a single bus can carry.
pub const MAX_SIGNALS: u32 = 64;

/// A task's closed set of signals.
///
/// Implemented by plain fieldless enums. `ALL` must list every variant in
/// ascending `num()` order and every number must be below [`MAX_SIGNALS`].
pub trait SignalKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Every declared signal, in ascending numeric order.
    const ALL: &'static [Self];

    /// Bit number of this signal on the bus.
    fn num(self) -> u32;

    /// Inverse of [`SignalKind::num`].
    fn from_num(num: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|sig| sig.num() == num)
    }
}

/// Type-erased posting side of a bus.
///
/// The event manager and the timer service keep subscriptions to buses of
/// different signal types, so they only see this trait.
pub trait SignalTarget: Send + Sync {
    /// Bus name used in log messages.
    fn name(&self) -> &str;

    /// Post the signal with the given bit number.
    fn post(&self, num: u32) -> Result<(), SignalError>;
}

/// Errors reported by the signal bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// The signal number is not below [`MAX_SIGNALS`].
    OutOfRange(u32),
    /// The signal was never added to the bus.
    NotAdded {
        /// Bus name.
        bus: &'static str,
        /// Signal number.
        num: u32,
    },
    /// A consumer thread is already registered on the bus.
    AlreadyRegistered(&'static str),
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange(num) => write!(f, "signal number {} is out of range", num),
            Self::NotAdded { bus, num } => {
                write!(f, "signal {} was not added to bus '{}'", num, bus)
            }
            Self::AlreadyRegistered(bus) => {
                write!(f, "bus '{}' already has a registered thread", bus)
            }
        }
    }
}

impl std::error::Error for SignalError {}

#[derive(Debug, Default)]
struct BusState {
    added: u64,
    pending: u64,
    owner: Option<ThreadId>,
}

/// Per-task signal bus.
///
/// Shared as `Arc<SignalBus<S>>`: producers keep clones, the owning task
/// holds the only [`SignalReceiver`].
pub struct SignalBus<S: SignalKind> {
    name: &'static str,
    state: Mutex<BusState>,
    wakeup: Condvar,
    _kind: PhantomData<fn() -> S>,
}

impl<S: SignalKind> SignalBus<S> {
    /// Create an empty bus with no signals added.
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(BusState::default()),
            wakeup: Condvar::new(),
            _kind: PhantomData,
        })
    }

    /// Create a bus and add every signal of `S`.
    pub fn with_all_signals(name: &'static str) -> Arc<Self> {
        let bus = Self::new(name);
        for sig in S::ALL {
            if let Err(e) = bus.add(*sig) {
                error!("{}: failed to add {:?}: {}", name, sig, e);
            }
        }
        bus
    }

    /// Bus name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a signal as valid on this bus. Adding twice is harmless.
    pub fn add(&self, sig: S) -> Result<(), SignalError> {
        let mask = bit(sig.num())?;
        self.lock_state().added |= mask;
        Ok(())
    }

    /// Post a signal from any thread and wake the registered consumer.
    pub fn send(&self, sig: S) -> Result<(), SignalError> {
        self.post(sig.num())
    }

    /// Check whether a signal is currently pending.
    pub fn is_pending(&self, sig: S) -> bool {
        match bit(sig.num()) {
            Ok(mask) => self.lock_state().pending & mask != 0,
            Err(_) => false,
        }
    }

    /// Check whether any thread is registered as the consumer.
    pub fn is_any_thread_registered(&self) -> bool {
        self.lock_state().owner.is_some()
    }

    /// Register the calling thread as the only consumer of this bus.
    ///
    /// Fails if a consumer (including the calling thread) is already
    /// registered. The registration ends when the receiver is dropped or
    /// [`SignalReceiver::unregister`] is called.
    pub fn register_current_thread(&self) -> Result<SignalReceiver<'_, S>, SignalError> {
        let mut state = self.lock_state();
        if state.owner.is_some() {
            return Err(SignalError::AlreadyRegistered(self.name));
        }
        state.owner = Some(thread::current().id());
        debug!("{}: registered consumer thread", self.name);
        Ok(SignalReceiver {
            bus: self,
            _not_send: PhantomData,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: SignalKind> SignalTarget for SignalBus<S> {
    fn name(&self) -> &str {
        self.name
    }

    fn post(&self, num: u32) -> Result<(), SignalError> {
        let mask = bit(num)?;
        let mut state = self.lock_state();
        if state.added & mask == 0 {
            return Err(SignalError::NotAdded {
                bus: self.name,
                num,
            });
        }
        state.pending |= mask;
        drop(state);
        self.wakeup.notify_one();
        Ok(())
    }
}

impl<S: SignalKind> fmt::Debug for SignalBus<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("SignalBus")
            .field("name", &self.name)
            .field("added", &format_args!("{:#x}", state.added))
            .field("pending", &format_args!("{:#x}", state.pending))
            .field("registered", &state.owner.is_some())
            .finish()
    }
}

/// Consumer side of a bus, bound to the thread that registered it.
///
/// Not `Send`: waiting and draining can only happen on the owner thread.
pub struct SignalReceiver<'a, S: SignalKind> {
    bus: &'a SignalBus<S>,
    _not_send: PhantomData<*const ()>,
}

impl<S: SignalKind> SignalReceiver<'_, S> {
    /// Block until at least one signal is pending or `timeout` elapses.
    ///
    /// Takes every pending bit at once. On timeout the returned set is empty.
    pub fn wait_with_timeout(&self, timeout: Duration) -> SignalEvents<S> {
        let deadline = Instant::now() + timeout;
        let mut state = self.bus.lock_state();
        while state.pending == 0 {
            let now = Instant::now();
            if now >= deadline {
                return SignalEvents::empty();
            }
            state = match self.bus.wakeup.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        let mask = std::mem::take(&mut state.pending);
        SignalEvents::from_mask(mask)
    }

    /// End the registration explicitly.
    pub fn unregister(self) {}
}

impl<S: SignalKind> Drop for SignalReceiver<'_, S> {
    fn drop(&mut self) {
        let mut state = self.bus.lock_state();
        if state.owner == Some(thread::current().id()) {
            state.owner = None;
            debug!("{}: unregistered consumer thread", self.bus.name);
        }
    }
}

/// Signals taken from a bus by one wait.
///
/// Iterating yields each signal once, lowest number first.
#[derive(Clone, PartialEq, Eq)]
pub struct SignalEvents<S: SignalKind> {
    mask: u64,
    _kind: PhantomData<fn() -> S>,
}

impl<S: SignalKind> SignalEvents<S> {
    /// An empty set (what a timed-out wait returns).
    pub fn empty() -> Self {
        Self::from_mask(0)
    }

    fn from_mask(mask: u64) -> Self {
        Self {
            mask,
            _kind: PhantomData,
        }
    }

    /// Check whether no signals remain.
    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }
}

impl<S: SignalKind> Iterator for SignalEvents<S> {
    type Item = S;

    fn next(&mut self) -> Option<S> {
        while self.mask != 0 {
            let num = self.mask.trailing_zeros();
            self.mask &= self.mask - 1;
            match S::from_num(num) {
                Some(sig) => return Some(sig),
                None => error!("Unknown signal number {} dropped", num),
            }
        }
        None
    }
}

impl<S: SignalKind> FromIterator<S> for SignalEvents<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mask = iter
            .into_iter()
            .filter_map(|sig| bit(sig.num()).ok())
            .fold(0, |acc, mask| acc | mask);
        Self::from_mask(mask)
    }
}

impl<S: SignalKind> fmt::Debug for SignalEvents<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

fn bit(num: u32) -> Result<u64, SignalError> {
    if num >= MAX_SIGNALS {
        return Err(SignalError::OutOfRange(num));
    }
    Ok(1u64 << num)
}
