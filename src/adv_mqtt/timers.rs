//! Timer set of the adv_mqtt task.

use super::signals::AdvMqttSig;
use crate::os::{OneShotTimer, PeriodicTimer, SignalBus, TimerService};
use crate::settings::Timings;
use std::sync::Arc;

pub struct AdvMqttTimers {
    pub watchdog_feed: PeriodicTimer,
    /// Re-posts ON_RECV_ADV once the MQTT buffer may have drained.
    pub retry_sending_advs: OneShotTimer,
}

impl AdvMqttTimers {
    pub fn new(service: &TimerService, bus: &Arc<SignalBus<AdvMqttSig>>, timings: &Timings) -> Self {
        Self {
            watchdog_feed: service.create_periodic(
                "adv_mqtt:wdog",
                bus,
                AdvMqttSig::TaskWatchdogFeed,
                timings.task_watchdog_feed(),
            ),
            retry_sending_advs: service.create_one_shot(
                "adv_mqtt:retry",
                bus,
                AdvMqttSig::OnRecvAdv,
                timings.mqtt_retry(),
            ),
        }
    }

    pub fn delete(&self) {
        self.watchdog_feed.delete();
        self.retry_sending_advs.delete();
    }
}
