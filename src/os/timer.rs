//! Timers that post a signal when they fire.
//!
//! A single [`TimerService`] thread owns every deadline. Timers never run
//! application code: firing only posts the bound signal to the bound bus,
//! and the owning task picks it up on its next wait.
//!
//! Two kinds exist:
//! - [`PeriodicTimer`] re-arms itself after every firing
//! - [`OneShotTimer`] disarms after firing
//!
//! # Relaunch semantics
//!
//! `relaunch(true)` moves the next fire point to `now + period`.
//! `relaunch(false)` keeps the countdown that started when the timer last
//! fired: the fire point becomes `last_triggered + period`, or
//! `now + period` if that moment has already passed.
//!
//! # Example
//!
//! ```
//! use ruuvi_gw_esp32::os::{SignalBus, SignalKind, TimerService};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Sig {
//!     Tick,
//! }
//!
//! impl SignalKind for Sig {
//!     const ALL: &'static [Self] = &[Sig::Tick];
//!
//!     fn num(self) -> u32 {
//!         0
//!     }
//! }
//!
//! let service = TimerService::start("demo").unwrap();
//! let bus = SignalBus::<Sig>::with_all_signals("demo");
//! let rx = bus.register_current_thread().unwrap();
//!
//! let timer = service.create_one_shot("tick", &bus, Sig::Tick, Duration::from_millis(5));
//! timer.start();
//!
//! let fired: Vec<Sig> = rx.wait_with_timeout(Duration::from_secs(5)).collect();
//! assert_eq!(fired, vec![Sig::Tick]);
//! assert!(!timer.is_active());
//! ```

use super::signal::{SignalBus, SignalKind, SignalTarget};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

struct TimerSlot {
    name: &'static str,
    target: Arc<dyn SignalTarget>,
    sig_num: u32,
    period: Duration,
    periodic: bool,
    deadline: Option<Instant>,
    last_triggered: Instant,
    /// Fire point set by `postpone`, used by the next `relaunch(false)`.
    postponed_due: Option<Instant>,
}

impl TimerSlot {
    fn arm_from(&mut self, now: Instant) {
        if self.periodic && self.period.is_zero() {
            warn!("timer '{}': zero period, not started", self.name);
            self.deadline = None;
            return;
        }
        self.last_triggered = now;
        self.postponed_due = None;
        self.deadline = Some(now + self.period);
    }

    fn relaunch(&mut self, restart_from_now: bool, now: Instant) {
        if restart_from_now {
            self.arm_from(now);
            return;
        }
        if self.periodic && self.period.is_zero() {
            warn!("timer '{}': zero period, not relaunched", self.name);
            self.deadline = None;
            return;
        }
        let due = self
            .postponed_due
            .take()
            .unwrap_or(self.last_triggered + self.period);
        self.deadline = Some(if due > now { due } else { now + self.period });
    }

    fn fire(&mut self, now: Instant) {
        self.last_triggered = now;
        self.postponed_due = None;
        self.deadline = match (self.periodic, self.deadline) {
            (true, Some(deadline)) => {
                let next = deadline + self.period;
                Some(if next > now { next } else { now + self.period })
            }
            _ => None,
        };
    }
}

#[derive(Default)]
struct Registry {
    slots: HashMap<u64, TimerSlot>,
    next_id: u64,
    shutdown: bool,
}

struct TimerShared {
    registry: Mutex<Registry>,
    wakeup: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background thread that fires every timer created from it.
///
/// Dropping the service stops the thread; timers created from it stay valid
/// but never fire again.
pub struct TimerService {
    shared: Arc<TimerShared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TimerService {
    /// Spawn the timer service thread.
    pub fn start(name: &str) -> Result<Self, std::io::Error> {
        let shared = Arc::new(TimerShared {
            registry: Mutex::new(Registry::default()),
            wakeup: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-timers", name))
            .spawn(move || Self::run(thread_shared))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Create a stopped periodic timer bound to `(bus, sig)`.
    pub fn create_periodic<S: SignalKind>(
        &self,
        name: &'static str,
        bus: &Arc<SignalBus<S>>,
        sig: S,
        period: Duration,
    ) -> PeriodicTimer {
        PeriodicTimer {
            handle: self.create(name, bus.clone(), sig.num(), period, true),
        }
    }

    /// Create a stopped one-shot timer bound to `(bus, sig)`.
    pub fn create_one_shot<S: SignalKind>(
        &self,
        name: &'static str,
        bus: &Arc<SignalBus<S>>,
        sig: S,
        period: Duration,
    ) -> OneShotTimer {
        OneShotTimer {
            handle: self.create(name, bus.clone(), sig.num(), period, false),
        }
    }

    /// Number of timers currently registered.
    pub fn timer_count(&self) -> usize {
        self.shared.lock().slots.len()
    }

    fn create(
        &self,
        name: &'static str,
        target: Arc<dyn SignalTarget>,
        sig_num: u32,
        period: Duration,
        periodic: bool,
    ) -> Arc<TimerHandle> {
        let mut registry = self.shared.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.slots.insert(
            id,
            TimerSlot {
                name,
                target,
                sig_num,
                period,
                periodic,
                deadline: None,
                last_triggered: Instant::now(),
                postponed_due: None,
            },
        );
        debug!("timer '{}' created (period {:?})", name, period);
        Arc::new(TimerHandle {
            id,
            name,
            shared: self.shared.clone(),
        })
    }

    fn run(shared: Arc<TimerShared>) {
        let mut registry = shared.lock();
        loop {
            if registry.shutdown {
                debug!("Timer service shutting down");
                break;
            }

            let now = Instant::now();
            let mut fired = Vec::new();
            for slot in registry.slots.values_mut() {
                if matches!(slot.deadline, Some(deadline) if deadline <= now) {
                    slot.fire(now);
                    fired.push((slot.target.clone(), slot.sig_num, slot.name));
                }
            }

            if !fired.is_empty() {
                // Post outside the registry lock.
                drop(registry);
                for (target, sig_num, name) in fired {
                    if let Err(e) = target.post(sig_num) {
                        error!("timer '{}': failed to post to '{}': {}", name, target.name(), e);
                    }
                }
                registry = shared.lock();
                continue;
            }

            let next = registry.slots.values().filter_map(|slot| slot.deadline).min();
            registry = match next {
                Some(deadline) => {
                    match shared
                        .wakeup
                        .wait_timeout(registry, deadline.saturating_duration_since(now))
                    {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => shared
                    .wakeup
                    .wait(registry)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Shared handle to one registry slot. The slot is removed when the last
/// clone is dropped or [`TimerHandle::delete`] is called.
struct TimerHandle {
    id: u64,
    name: &'static str,
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    fn update<R>(&self, f: impl FnOnce(&mut TimerSlot, Instant) -> R) -> Option<R> {
        let mut registry = self.shared.lock();
        let result = match registry.slots.get_mut(&self.id) {
            Some(slot) => Some(f(slot, Instant::now())),
            None => {
                debug!("timer '{}' was deleted", self.name);
                None
            }
        };
        drop(registry);
        self.shared.wakeup.notify_all();
        result
    }

    fn read<R>(&self, f: impl FnOnce(&TimerSlot) -> R) -> Option<R> {
        self.shared.lock().slots.get(&self.id).map(f)
    }

    fn delete(&self) {
        if self.shared.lock().slots.remove(&self.id).is_some() {
            debug!("timer '{}' deleted", self.name);
            self.shared.wakeup.notify_all();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.delete();
    }
}

/// Timer that re-arms itself after each firing.
///
/// Clones refer to the same timer.
#[derive(Clone)]
pub struct PeriodicTimer {
    handle: Arc<TimerHandle>,
}

impl PeriodicTimer {
    /// Arm the timer to fire one period from now.
    ///
    /// A timer with a zero period cannot be started.
    pub fn start(&self) {
        self.handle.update(|slot, now| slot.arm_from(now));
    }

    /// Disarm the timer. Stopping a stopped timer is a no-op.
    pub fn stop(&self) {
        self.handle.update(|slot, _| slot.deadline = None);
    }

    /// Re-arm the timer; see the module docs for the two modes.
    pub fn relaunch(&self, restart_from_now: bool) {
        self.handle
            .update(|slot, now| slot.relaunch(restart_from_now, now));
    }

    /// Change the period used for the next arming. The current fire point
    /// is left as it is.
    pub fn set_period(&self, period: Duration) {
        self.handle.update(|slot, _| slot.period = period);
    }

    /// Set the period and relaunch in one step.
    pub fn restart_with_period(&self, period: Duration, restart_from_now: bool) {
        self.handle.update(|slot, now| {
            slot.period = period;
            slot.relaunch(restart_from_now, now);
        });
    }

    /// Current period.
    pub fn period(&self) -> Duration {
        self.handle.read(|slot| slot.period).unwrap_or_default()
    }

    /// Check whether the timer is armed.
    pub fn is_active(&self) -> bool {
        self.handle
            .read(|slot| slot.deadline.is_some())
            .unwrap_or(false)
    }

    /// Time left until the next firing, if armed.
    pub fn remaining(&self) -> Option<Duration> {
        self.handle
            .read(|slot| slot.deadline)
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Overwrite the moment the timer last fired.
    ///
    /// An armed timer is moved to `at + period` (or now, if that is already
    /// in the past) so the countdown continues from `at`.
    pub fn set_last_triggered(&self, at: Instant) {
        self.handle.update(|slot, now| {
            slot.last_triggered = at;
            slot.postponed_due = None;
            if slot.deadline.is_some() {
                let due = at + slot.period;
                slot.deadline = Some(if due > now { due } else { now });
            }
        });
    }

    /// Make the next firing happen `delay` from now.
    ///
    /// An armed timer is moved right away; a stopped one picks the fire
    /// point up on its next `relaunch(false)`.
    pub fn postpone(&self, delay: Duration) {
        self.handle.update(|slot, now| {
            let due = now + delay;
            slot.postponed_due = Some(due);
            if slot.deadline.is_some() {
                slot.deadline = Some(due);
            }
        });
    }

    /// Remove the timer from the service. Remaining clones become inert.
    pub fn delete(&self) {
        self.handle.delete();
    }
}

/// Timer that fires once per start.
///
/// Clones refer to the same timer.
#[derive(Clone)]
pub struct OneShotTimer {
    handle: Arc<TimerHandle>,
}

impl OneShotTimer {
    /// Arm the timer to fire one period from now, replacing any pending fire point.
    pub fn start(&self) {
        self.handle.update(|slot, now| slot.arm_from(now));
    }

    /// Disarm the timer.
    pub fn stop(&self) {
        self.handle.update(|slot, _| slot.deadline = None);
    }

    /// Re-arm the timer; see the module docs for the two modes.
    pub fn relaunch(&self, restart_from_now: bool) {
        self.handle
            .update(|slot, now| slot.relaunch(restart_from_now, now));
    }

    /// Change the delay used for the next arming.
    pub fn set_period(&self, period: Duration) {
        self.handle.update(|slot, _| slot.period = period);
    }

    /// Current delay.
    pub fn period(&self) -> Duration {
        self.handle.read(|slot| slot.period).unwrap_or_default()
    }

    /// Check whether the timer is armed.
    pub fn is_active(&self) -> bool {
        self.handle
            .read(|slot| slot.deadline.is_some())
            .unwrap_or(false)
    }

    /// Remove the timer from the service. Remaining clones become inert.
    pub fn delete(&self) {
        self.handle.delete();
    }
}
