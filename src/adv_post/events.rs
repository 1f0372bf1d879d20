//! Event subscriptions of the adv_post task.

use super::signals::AdvPostSig;
use crate::event_mgr::{Event, EventManager, SubscriptionId};
use crate::os::SignalBus;
use std::sync::Arc;

/// Events routed to the adv_post bus.
pub const ADV_POST_SUBSCRIPTIONS: [(Event, AdvPostSig); 13] = [
    (Event::WifiDisconnected, AdvPostSig::NetworkDisconnected),
    (Event::EthDisconnected, AdvPostSig::NetworkDisconnected),
    (Event::WifiConnected, AdvPostSig::NetworkConnected),
    (Event::EthConnected, AdvPostSig::NetworkConnected),
    (Event::TimeSynchronized, AdvPostSig::TimeSynchronized),
    (Event::GwCfgReady, AdvPostSig::GwCfgReady),
    (Event::GwCfgChangedRuuvi, AdvPostSig::GwCfgChangedRuuvi),
    (Event::RelayingModeChanged, AdvPostSig::RelayingModeChanged),
    (Event::GreenLedTurnOn, AdvPostSig::GreenLedTurnOn),
    (Event::GreenLedTurnOff, AdvPostSig::GreenLedTurnOff),
    (Event::CfgModeActivated, AdvPostSig::CfgModeActivated),
    (Event::CfgModeDeactivated, AdvPostSig::CfgModeDeactivated),
    (Event::CfgBleScanChanged, AdvPostSig::BleScanChanged),
];

/// Live subscriptions, removed again on task exit.
#[derive(Debug, Default)]
pub struct AdvPostEvents {
    subs: Vec<(Event, SubscriptionId)>,
}

impl AdvPostEvents {
    pub fn subscribe(events: &EventManager, bus: &Arc<SignalBus<AdvPostSig>>) -> Self {
        let subs = ADV_POST_SUBSCRIPTIONS
            .iter()
            .map(|&(event, sig)| (event, events.subscribe(event, bus, sig)))
            .collect();
        Self { subs }
    }

    pub fn unsubscribe(self, events: &EventManager) {
        for (event, id) in self.subs {
            events.unsubscribe(event, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_unsubscribe_round_trip() {
        let events = EventManager::new();
        let bus = SignalBus::<AdvPostSig>::with_all_signals("adv_post");

        let subs = AdvPostEvents::subscribe(&events, &bus);
        assert_eq!(events.subscriber_count(Event::WifiConnected), 1);
        assert_eq!(events.subscriber_count(Event::WifiDisconnected), 1);
        assert_eq!(events.subscriber_count(Event::CfgBleScanChanged), 1);
        assert_eq!(events.subscriber_count(Event::RecvAdv), 0);

        events.notify(Event::EthConnected);
        assert!(bus.is_pending(AdvPostSig::NetworkConnected));

        subs.unsubscribe(&events);
        for event in Event::ALL {
            assert_eq!(events.subscriber_count(event), 0);
        }
    }
}
