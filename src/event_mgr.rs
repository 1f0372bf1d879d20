//! Gateway-wide event manager.
//!
//! Domain events (network up, config changed, advertisement received, ...)
//! fan out to the signal buses of every task that subscribed to them. Events
//! carry no payload: a task woken by an event re-reads whatever state it
//! needs.
//!
//! `notify` holds one mutex for the whole fan-out, so concurrent
//! notifications interleave only at whole-event granularity. Posting a
//! signal never waits for the receiving task.
//!
//! # Example
//!
//! ```
//! use ruuvi_gw_esp32::event_mgr::{Event, EventManager};
//! use ruuvi_gw_esp32::os::{SignalBus, SignalKind};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Sig {
//!     NetworkUp,
//! }
//!
//! impl SignalKind for Sig {
//!     const ALL: &'static [Self] = &[Sig::NetworkUp];
//!
//!     fn num(self) -> u32 {
//!         0
//!     }
//! }
//!
//! let events = EventManager::new();
//! let bus = SignalBus::<Sig>::with_all_signals("demo");
//! let rx = bus.register_current_thread().unwrap();
//!
//! events.subscribe(Event::WifiConnected, &bus, Sig::NetworkUp);
//! events.notify(Event::WifiConnected);
//!
//! let got: Vec<Sig> = rx.wait_with_timeout(Duration::from_millis(10)).collect();
//! assert_eq!(got, vec![Sig::NetworkUp]);
//! ```

use crate::os::{SignalBus, SignalKind, SignalTarget};
use log::{debug, error};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Domain events published across the gateway.
///
/// Numbered from 1; 0 and `Event::COUNT + 1` are the out-of-range markers
/// rejected by [`EventManager::notify_num`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Event {
    Reboot = 1,
    WifiApStarted,
    WifiApStopped,
    WifiApStaConnected,
    WifiApStaDisconnected,
    WifiConnected,
    WifiDisconnected,
    EthConnected,
    EthDisconnected,
    TimeSynchronized,
    GwCfgReady,
    GwCfgChangedRuuvi,
    GwCfgChangedEth,
    GwCfgChangedWifi,
    GwCfgChangedRuuviNtpUse,
    GwCfgChangedRuuviNtpUseDhcp,
    RelayingModeChanged,
    CfgModeActivated,
    CfgModeDeactivated,
    CfgBleScanChanged,
    RecvAdv,
    RecvAdvTimeout,
    GreenLedTurnOn,
    GreenLedTurnOff,
    MqttConnected,
}

impl Event {
    /// Every event in numeric order.
    pub const ALL: [Event; 25] = [
        Event::Reboot,
        Event::WifiApStarted,
        Event::WifiApStopped,
        Event::WifiApStaConnected,
        Event::WifiApStaDisconnected,
        Event::WifiConnected,
        Event::WifiDisconnected,
        Event::EthConnected,
        Event::EthDisconnected,
        Event::TimeSynchronized,
        Event::GwCfgReady,
        Event::GwCfgChangedRuuvi,
        Event::GwCfgChangedEth,
        Event::GwCfgChangedWifi,
        Event::GwCfgChangedRuuviNtpUse,
        Event::GwCfgChangedRuuviNtpUseDhcp,
        Event::RelayingModeChanged,
        Event::CfgModeActivated,
        Event::CfgModeDeactivated,
        Event::CfgBleScanChanged,
        Event::RecvAdv,
        Event::RecvAdvTimeout,
        Event::GreenLedTurnOn,
        Event::GreenLedTurnOff,
        Event::MqttConnected,
    ];

    /// Number of real events.
    pub const COUNT: usize = Self::ALL.len();

    /// Event number.
    pub fn num(self) -> u32 {
        self as u32
    }

    /// Look an event up by number.
    pub fn from_num(num: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|ev| ev.num() == num)
    }

    fn index(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Identity of one subscription, returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    target: Arc<dyn SignalTarget>,
    sig_num: u32,
}

/// Registry of `(event -> bus, signal)` subscriptions.
pub struct EventManager {
    subscriptions: Mutex<Vec<Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventManager {
    /// Create a manager with no subscriptions.
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new((0..Event::COUNT).map(|_| Vec::new()).collect()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `sig` on `bus` to `event`. Subscriptions of one event are
    /// notified in the order they were added.
    pub fn subscribe<S: SignalKind>(
        &self,
        event: Event,
        bus: &Arc<SignalBus<S>>,
        sig: S,
    ) -> SubscriptionId {
        self.subscribe_target(event, bus.clone(), sig.num())
    }

    /// Subscribe a type-erased target.
    pub fn subscribe_target(
        &self,
        event: Event,
        target: Arc<dyn SignalTarget>,
        sig_num: u32,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("subscribe {}: {} sig {}", event, target.name(), sig_num);
        self.lock()[event.index()].push(Subscription {
            id,
            target,
            sig_num,
        });
        id
    }

    /// Remove one subscription. Returns false if it was not found.
    pub fn unsubscribe(&self, event: Event, id: SubscriptionId) -> bool {
        let mut subscriptions = self.lock();
        let list = &mut subscriptions[event.index()];
        match list.iter().position(|sub| sub.id == id) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Post the subscribed signal on every bus subscribed to `event`.
    pub fn notify(&self, event: Event) {
        let subscriptions = self.lock();
        for sub in &subscriptions[event.index()] {
            if let Err(e) = sub.target.post(sub.sig_num) {
                error!("notify {}: {}", event, e);
            }
        }
    }

    /// Notify by raw event number. Out-of-range numbers are logged and ignored.
    pub fn notify_num(&self, num: u32) {
        match Event::from_num(num) {
            Some(event) => self.notify(event),
            None => error!("Event number {} is out of range", num),
        }
    }

    /// Number of subscriptions for `event`.
    pub fn subscriber_count(&self, event: Event) -> usize {
        self.lock()[event.index()].len()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        for list in self.lock().iter_mut() {
            list.clear();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<Subscription>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::SignalError;
    use std::sync::Mutex as StdMutex;

    /// Target that records every post it receives.
    struct Recorder {
        name: &'static str,
        log: Arc<StdMutex<Vec<(&'static str, u32)>>>,
    }

    impl SignalTarget for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn post(&self, num: u32) -> Result<(), SignalError> {
            self.log.lock().unwrap().push((self.name, num));
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<StdMutex<Vec<(&'static str, u32)>>>,
    ) -> Arc<dyn SignalTarget> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
        })
    }

    // ==================== Event Numbering Tests ====================

    #[test]
    fn test_event_numbering() {
        assert_eq!(Event::Reboot.num(), 1);
        assert_eq!(Event::MqttConnected.num(), 25);
        assert_eq!(Event::COUNT, 25);
        for (i, ev) in Event::ALL.iter().enumerate() {
            assert_eq!(ev.num() as usize, i + 1);
            assert_eq!(Event::from_num(ev.num()), Some(*ev));
        }
        assert_eq!(Event::from_num(0), None);
        assert_eq!(Event::from_num(26), None);
    }

    // ==================== Notify Tests ====================

    #[test]
    fn test_notify_without_subscribers_is_noop() {
        let mgr = EventManager::new();
        mgr.notify(Event::TimeSynchronized);
        assert_eq!(mgr.subscriber_count(Event::TimeSynchronized), 0);
    }

    #[test]
    fn test_notify_in_subscription_order() {
        let mgr = EventManager::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        mgr.subscribe_target(Event::GwCfgReady, recorder("a", &log), 3);
        mgr.subscribe_target(Event::GwCfgReady, recorder("b", &log), 7);
        mgr.subscribe_target(Event::GwCfgReady, recorder("c", &log), 1);
        mgr.subscribe_target(Event::RecvAdv, recorder("d", &log), 2);

        mgr.notify(Event::GwCfgReady);

        assert_eq!(*log.lock().unwrap(), vec![("a", 3), ("b", 7), ("c", 1)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mgr = EventManager::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        let keep = mgr.subscribe_target(Event::WifiConnected, recorder("keep", &log), 1);
        let removed = mgr.subscribe_target(Event::WifiConnected, recorder("gone", &log), 2);

        assert!(mgr.unsubscribe(Event::WifiConnected, removed));
        assert!(!mgr.unsubscribe(Event::WifiConnected, removed));
        mgr.notify(Event::WifiConnected);

        assert_eq!(*log.lock().unwrap(), vec![("keep", 1)]);
        assert!(mgr.unsubscribe(Event::WifiConnected, keep));
        assert_eq!(mgr.subscriber_count(Event::WifiConnected), 0);
    }

    #[test]
    fn test_unsubscribe_wrong_event_not_found() {
        let mgr = EventManager::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let id = mgr.subscribe_target(Event::EthConnected, recorder("a", &log), 0);
        assert!(!mgr.unsubscribe(Event::WifiConnected, id));
        assert_eq!(mgr.subscriber_count(Event::EthConnected), 1);
    }

    #[test]
    fn test_notify_num_out_of_range_ignored() {
        let mgr = EventManager::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        mgr.subscribe_target(Event::Reboot, recorder("a", &log), 0);

        mgr.notify_num(0);
        mgr.notify_num(26);
        assert!(log.lock().unwrap().is_empty());

        mgr.notify_num(1);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mgr = EventManager::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        mgr.subscribe_target(Event::Reboot, recorder("a", &log), 0);
        mgr.subscribe_target(Event::RecvAdv, recorder("b", &log), 0);
        mgr.clear();
        assert_eq!(mgr.subscriber_count(Event::Reboot), 0);
        assert_eq!(mgr.subscriber_count(Event::RecvAdv), 0);
    }

    #[test]
    fn test_concurrent_notify_whole_fanout() {
        let mgr = Arc::new(EventManager::new());
        let log = Arc::new(StdMutex::new(Vec::new()));
        mgr.subscribe_target(Event::RecvAdv, recorder("x", &log), 0);
        mgr.subscribe_target(Event::RecvAdv, recorder("y", &log), 1);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let mgr = mgr.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        mgr.notify(Event::RecvAdv);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 400);
        for pair in log.chunks(2) {
            assert_eq!(pair, &[("x", 0), ("y", 1)]);
        }
    }
}
