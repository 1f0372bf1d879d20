//! Task-level OS primitives: signal buses and signal-posting timers.
//!
//! Each gateway task owns one [`SignalBus`] and blocks on it; everything
//! that wants the task to do something (other threads, the event manager,
//! timers) only posts a signal bit.

mod signal;
mod timer;

pub use signal::{
    SignalBus, SignalError, SignalEvents, SignalKind, SignalReceiver, SignalTarget, MAX_SIGNALS,
};
pub use timer::{OneShotTimer, PeriodicTimer, TimerService};
