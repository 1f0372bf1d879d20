//! adv_mqtt: publishes advertisements to MQTT as they arrive (instant mode).
//!
//! Periodic MQTT relaying is done by the adv_post engine; this task only
//! handles the zero-interval case, one advertisement per ON_RECV_ADV.

pub mod cfg_cache;
mod events;
pub mod signals;
mod task;
pub mod timers;

pub use cfg_cache::AdvMqttCfg;
pub use events::{AdvMqttEvents, ADV_MQTT_SUBSCRIPTIONS};
pub use signals::AdvMqttSig;
pub use task::AdvMqttTask;

use crate::context::{GwContext, TaskError};
use crate::os::{SignalBus, SignalError};
use log::{error, info};
use std::sync::{mpsc, Arc};
use std::thread;

/// Handle to the running adv_mqtt task. Dropping it stops the task.
pub struct AdvMqtt {
    bus: Arc<SignalBus<AdvMqttSig>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AdvMqtt {
    /// Spawn the task and wait until it is registered on its bus.
    pub fn start(ctx: GwContext) -> Result<Self, TaskError> {
        let bus = SignalBus::with_all_signals(task::TASK_NAME);
        let task = AdvMqttTask::new(ctx, bus.clone());

        let (ready_tx, ready_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(task::TASK_NAME.to_string())
            .spawn(move || task.run(ready_tx))
            .map_err(TaskError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                bus,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(TaskError::Register(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(TaskError::Exited(task::TASK_NAME))
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.bus.is_any_thread_registered()
    }

    pub fn send_sig(&self, sig: AdvMqttSig) -> Result<(), SignalError> {
        self.bus.send(sig)
    }

    /// Post STOP and wait for the thread to exit.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!("adv_mqtt_task_stop");
            if let Err(e) = self.bus.send(AdvMqttSig::Stop) {
                error!("{}", e);
            }
            let _ = handle.join();
        }
    }
}

impl Drop for AdvMqtt {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_mgr::Event;
    use crate::gw::{AdvTable, GwCfg};
    use crate::settings::Timings;
    use crate::test_support::{context, context_with_timings, report, wait_until, Mocks};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn instant_cfg() -> GwCfg {
        let mut cfg = GwCfg::default();
        cfg.mqtt.use_mqtt = true;
        cfg
    }

    fn start_ready(ctx: &GwContext) -> AdvMqtt {
        ctx.status.set_mqtt_connected(true);
        let adv_mqtt = AdvMqtt::start(ctx.clone()).unwrap();
        ctx.events.notify(Event::GwCfgReady);
        assert!(wait_until(WAIT, || ctx
            .adv_mqtt_cfg
            .lock()
            .mqtt_instant_mode_active));
        adv_mqtt
    }

    // ==================== Lifecycle Tests ====================

    #[test]
    fn test_start_stop_subscriptions() {
        let mocks = Mocks::new();
        let ctx = context(&mocks, GwCfg::default());
        let mut adv_mqtt = AdvMqtt::start(ctx.clone()).unwrap();

        assert!(adv_mqtt.is_initialized());
        for (event, _) in ADV_MQTT_SUBSCRIPTIONS {
            assert_eq!(ctx.events.subscriber_count(event), 1, "{:?}", event);
        }
        assert_eq!(mocks.watchdog.registered(), vec!["adv_mqtt"]);

        adv_mqtt.stop();
        assert!(!adv_mqtt.is_initialized());
        for (event, _) in ADV_MQTT_SUBSCRIPTIONS {
            assert_eq!(ctx.events.subscriber_count(event), 0, "{:?}", event);
        }
        assert!(mocks.watchdog.registered().is_empty());
        assert_eq!(ctx.timers.timer_count(), 0);
    }

    // ==================== Relay Tests ====================

    #[test]
    fn test_instant_mode_publishes_in_arrival_order() {
        let mocks = Mocks::new();
        let ctx = context(&mocks, instant_cfg());
        let _adv_mqtt = start_ready(&ctx);

        for n in 1..=3 {
            mocks.adv_table.put(report(n));
        }
        ctx.events.notify(Event::RecvAdv);

        assert!(wait_until(WAIT, || mocks.mqtt.published().len() == 3));
        assert_eq!(
            mocks.mqtt.published(),
            vec![report(1).mac, report(2).mac, report(3).mac]
        );
        assert!(mocks.adv_table.is_retransmission_list3_empty());
        assert_eq!(ctx.stats.mqtt_published(), 3);
    }

    #[test]
    fn test_full_buffer_retried_by_timer() {
        let mocks = Mocks::new();
        let timings = Timings {
            mqtt_retry_ms: 20,
            ..Timings::default()
        };
        let ctx = context_with_timings(&mocks, instant_cfg(), timings);
        let _adv_mqtt = start_ready(&ctx);

        mocks.mqtt.set_buffer_available(false);
        mocks.adv_table.put(report(1));
        ctx.events.notify(Event::RecvAdv);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(mocks.mqtt.publish_attempts(), 0);

        mocks.mqtt.set_buffer_available(true);
        assert!(wait_until(WAIT, || mocks.mqtt.published() == vec![report(1).mac]));
    }

    #[test]
    fn test_periodic_mode_leaves_queue_alone() {
        let mocks = Mocks::new();
        let mut cfg = instant_cfg();
        cfg.mqtt.sending_interval_secs = 60;
        let ctx = context(&mocks, cfg);
        ctx.status.set_mqtt_connected(true);
        let _adv_mqtt = AdvMqtt::start(ctx.clone()).unwrap();
        ctx.events.notify(Event::GwCfgReady);

        mocks.adv_table.put(report(1));
        ctx.events.notify(Event::RecvAdv);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(mocks.mqtt.publish_attempts(), 0);
        assert!(!mocks.adv_table.is_retransmission_list3_empty());
    }
}
