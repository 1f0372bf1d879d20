//! Event subscriptions of the adv_mqtt task.

use super::signals::AdvMqttSig;
use crate::event_mgr::{Event, EventManager, SubscriptionId};
use crate::os::SignalBus;
use std::sync::Arc;

pub const ADV_MQTT_SUBSCRIPTIONS: [(Event, AdvMqttSig); 7] = [
    (Event::RecvAdv, AdvMqttSig::OnRecvAdv),
    (Event::MqttConnected, AdvMqttSig::MqttConnected),
    (Event::GwCfgReady, AdvMqttSig::GwCfgReady),
    (Event::GwCfgChangedRuuvi, AdvMqttSig::GwCfgChangedRuuvi),
    (Event::RelayingModeChanged, AdvMqttSig::RelayingModeChanged),
    (Event::CfgModeActivated, AdvMqttSig::CfgModeActivated),
    (Event::CfgModeDeactivated, AdvMqttSig::CfgModeDeactivated),
];

#[derive(Debug, Default)]
pub struct AdvMqttEvents {
    subs: Vec<(Event, SubscriptionId)>,
}

impl AdvMqttEvents {
    pub fn subscribe(events: &EventManager, bus: &Arc<SignalBus<AdvMqttSig>>) -> Self {
        let subs = ADV_MQTT_SUBSCRIPTIONS
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
