//! Timer set of the adv_post task.

use super::async_comm::AdvPostControl;
use super::signals::AdvPostSig;
use crate::gw::HttpTarget;
use crate::os::{OneShotTimer, PeriodicTimer, SignalBus, TimerService};
use crate::settings::Timings;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

pub struct AdvPostTimers {
    pub retransmit: PeriodicTimer,
    pub retransmit2: PeriodicTimer,
    pub mqtt: PeriodicTimer,
    pub send_statistics: PeriodicTimer,
    pub do_async_comm: OneShotTimer,
    pub network_watchdog: PeriodicTimer,
    pub watchdog_feed: PeriodicTimer,
    pub green_led_update: PeriodicTimer,
    pub recv_adv_timeout: OneShotTimer,
    control: Arc<AdvPostControl>,
    timings: Arc<Timings>,
}

impl AdvPostTimers {
    /// Create every timer stopped. The MQTT timer has no period until the
    /// config sets one.
    pub fn new(
        service: &TimerService,
        bus: &Arc<SignalBus<AdvPostSig>>,
        timings: Arc<Timings>,
        control: Arc<AdvPostControl>,
    ) -> Self {
        let advs_period = timings.adv_post_interval();
        Self {
            retransmit: service.create_periodic(
                "adv_post_retransmit",
                bus,
                AdvPostSig::Retransmit,
                advs_period,
            ),
            retransmit2: service.create_periodic(
                "adv_post_retransmit2",
                bus,
                AdvPostSig::Retransmit2,
                advs_period,
            ),
            mqtt: service.create_periodic(
                "adv_post_mqtt",
                bus,
                AdvPostSig::RetransmitMqtt,
                Duration::ZERO,
            ),
            send_statistics: service.create_periodic(
                "adv_post_send_status",
                bus,
                AdvPostSig::SendStatistics,
                timings.stats_interval(),
            ),
            do_async_comm: service.create_one_shot(
                "adv_post_do_async_comm",
                bus,
                AdvPostSig::DoAsyncComm,
                timings.do_async_comm(),
            ),
            network_watchdog: service.create_periodic(
                "adv_post_network_watchdog",
                bus,
                AdvPostSig::NetworkWatchdog,
                timings.network_watchdog_period(),
            ),
            watchdog_feed: service.create_periodic(
                "adv_post_wgod",
                bus,
                AdvPostSig::TaskWatchdogFeed,
                timings.task_watchdog_feed(),
            ),
            green_led_update: service.create_periodic(
                "adv_post_green_led",
                bus,
                AdvPostSig::GreenLedUpdate,
                timings.green_led_update(),
            ),
            recv_adv_timeout: service.create_one_shot(
                "adv_post_recv_adv_timeout",
                bus,
                AdvPostSig::RecvAdvTimeout,
                timings.recv_adv_timeout(),
            ),
            control,
            timings,
        }
    }

    fn retransmit_timer(&self, target: HttpTarget) -> &PeriodicTimer {
        match target {
            HttpTarget::Ruuvi => &self.retransmit,
            HttpTarget::Custom => &self.retransmit2,
        }
    }

    /// Fire one full period from now.
    pub fn relaunch_retransmit(&self, target: HttpTarget) {
        self.retransmit_timer(target).relaunch(true);
    }

    pub fn stop_retransmit(&self, target: HttpTarget) {
        self.retransmit_timer(target).stop();
    }

    pub fn set_default_period(&self, target: HttpTarget, period_ms: u32) {
        self.control.set_default_period_ms(target, period_ms);
    }

    /// Resume the normal cadence after a successful post.
    pub fn relaunch_with_default_period(&self, target: HttpTarget) {
        let period = Duration::from_millis(u64::from(self.control.default_period_ms(target)));
        self.relaunch_if_period_changed(target, period);
    }

    /// Back off after a failed post.
    pub fn relaunch_with_increased_period(&self, target: HttpTarget) {
        self.relaunch_if_period_changed(target, self.timings.retry_after_error());
    }

    /// Restart the countdown from now with the default period.
    pub fn restart_from_current_moment(&self, target: HttpTarget) {
        let period = Duration::from_millis(u64::from(self.control.default_period_ms(target)));
        self.retransmit_timer(target).restart_with_period(period, true);
    }

    fn relaunch_if_period_changed(&self, target: HttpTarget, period: Duration) {
        let timer = self.retransmit_timer(target);
        if !timer.is_active() || timer.period() != period {
            info!(
                "{}: restart timer with period {} ms",
                target,
                period.as_millis()
            );
            timer.restart_with_period(period, false);
        } else {
            debug!("{}: timer is already running", target);
        }
    }

    /// MQTT periodic relaying, restarted from now.
    pub fn restart_mqtt(&self, interval_secs: u32) {
        self.mqtt
            .restart_with_period(Duration::from_secs(u64::from(interval_secs)), true);
    }

    /// Keep the statistics countdown (or a pending postponement).
    pub fn relaunch_send_statistics(&self) {
        self.send_statistics.relaunch(false);
    }

    /// Send the first statistics report shortly after boot or time sync.
    pub fn postpone_sending_statistics(&self) {
        self.send_statistics
            .postpone(self.timings.stats_initial_delay());
    }

    /// Remove every timer from the service.
    pub fn delete(&self) {
        self.retransmit.delete();
        self.retransmit2.delete();
        self.mqtt.delete();
        self.send_statistics.delete();
        self.do_async_comm.delete();
        self.network_watchdog.delete();
        self.watchdog_feed.delete();
        self.green_led_update.delete();
        self.recv_adv_timeout.delete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::HmacKeys;

    fn setup() -> (TimerService, AdvPostTimers) {
        let service = TimerService::start("test").unwrap();
        let bus = SignalBus::<AdvPostSig>::with_all_signals("adv_post");
        let timings = Arc::new(Timings::default());
        let control = Arc::new(AdvPostControl::new(
            u32::try_from(timings.adv_post_interval().as_millis()).unwrap(),
            Arc::new(HmacKeys::new()),
        ));
        let timers = AdvPostTimers::new(&service, &bus, timings, control);
        (service, timers)
    }

    // ==================== Retransmit Period Tests ====================

    #[test]
    fn test_all_timers_created_stopped() {
        let (service, timers) = setup();
        assert_eq!(service.timer_count(), 9);
        assert!(!timers.retransmit.is_active());
        assert!(!timers.mqtt.is_active());
        assert_eq!(timers.mqtt.period(), Duration::ZERO);
        timers.delete();
        assert_eq!(service.timer_count(), 0);
    }

    #[test]
    fn test_increased_then_default_period() {
        let (_service, timers) = setup();
        timers.relaunch_with_increased_period(HttpTarget::Ruuvi);
        assert_eq!(timers.retransmit.period(), Duration::from_millis(67_000));

        timers.relaunch_with_default_period(HttpTarget::Ruuvi);
        assert_eq!(timers.retransmit.period(), Duration::from_secs(10));
        assert!(timers.retransmit.is_active());
        assert!(!timers.retransmit2.is_active());
    }

    #[test]
    fn test_same_period_keeps_running_timer() {
        let (_service, timers) = setup();
        timers.retransmit2.start();
        let before = timers.retransmit2.remaining().unwrap();
        timers.relaunch_with_default_period(HttpTarget::Custom);
        assert!(timers.retransmit2.remaining().unwrap() <= before);
    }

    #[test]
    fn test_set_default_period_applies_on_relaunch() {
        let (_service, timers) = setup();
        timers.set_default_period(HttpTarget::Custom, 30_000);
        timers.relaunch_with_default_period(HttpTarget::Custom);
        assert_eq!(timers.retransmit2.period(), Duration::from_secs(30));

        timers.restart_from_current_moment(HttpTarget::Custom);
        assert!(timers.retransmit2.remaining().unwrap() > Duration::from_secs(29));
    }

    #[test]
    fn test_restart_mqtt() {
        let (_service, timers) = setup();
        timers.restart_mqtt(15);
        assert!(timers.mqtt.is_active());
        assert_eq!(timers.mqtt.period(), Duration::from_secs(15));
    }
}
