//! adv_post: relays scanned advertisements over HTTP and periodic MQTT.
//!
//! This module contains:
//! - [`signals`]: the task's signal set and handlers
//! - [`async_comm`]: the single-flight HTTP/MQTT relay engine
//! - [`timers`]: retransmission, statistics and watchdog timers
//! - [`cfg_cache`]: config values read by the advertisement intake
//!
//! [`AdvPost`] owns the task thread. [`AdvIntake`] is the producer side
//! used by the BLE scanning path.

pub mod async_comm;
pub mod cfg_cache;
mod events;
mod green_led;
pub mod signals;
mod task;
pub mod timers;

pub use async_comm::{AdvPostAction, AdvPostControl};
pub use events::{AdvPostEvents, ADV_POST_SUBSCRIPTIONS};
pub use green_led::GreenLedCmd;
pub use signals::AdvPostSig;
pub use task::{AdvPostState, AdvPostTask};

use crate::context::{GwContext, TaskError};
use crate::event_mgr::Event;
use crate::gw::AdvReport;
use crate::os::{OneShotTimer, SignalBus, SignalError};
use log::{debug, error, info};
use std::sync::{mpsc, Arc};
use std::thread;

/// Handle to the running adv_post task. Dropping it stops the task.
pub struct AdvPost {
    bus: Arc<SignalBus<AdvPostSig>>,
    control: Arc<AdvPostControl>,
    intake: AdvIntake,
    handle: Option<thread::JoinHandle<()>>,
}

impl AdvPost {
    /// Spawn the task and wait until it is registered on its bus.
    pub fn start(ctx: GwContext) -> Result<Self, TaskError> {
        let bus = SignalBus::with_all_signals(task::TASK_NAME);
        let control = Arc::new(AdvPostControl::new(
            ctx.timings.adv_post_interval_secs.saturating_mul(1000),
            ctx.hmac_keys.clone(),
        ));
        let task = AdvPostTask::new(ctx.clone(), bus.clone(), control.clone());
        let intake = AdvIntake {
            ctx,
            recv_adv_timeout: task.timers.recv_adv_timeout.clone(),
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(task::TASK_NAME.to_string())
            .spawn(move || task.run(ready_tx))
            .map_err(TaskError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                bus,
                control,
                intake,
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

    /// Check whether the task thread is registered on its bus.
    pub fn is_initialized(&self) -> bool {
        self.bus.is_any_thread_registered()
    }

    /// Post a signal to the task.
    pub fn send_sig(&self, sig: AdvPostSig) -> Result<(), SignalError> {
        self.bus.send(sig)
    }

    /// Producer side for scanned advertisements.
    pub fn intake(&self) -> AdvIntake {
        self.intake.clone()
    }

    /// Engine accessors for transport response callbacks.
    pub fn control(&self) -> Arc<AdvPostControl> {
        self.control.clone()
    }

    /// Transfer the engine currently has in flight.
    pub fn action(&self) -> AdvPostAction {
        self.control.action()
    }

    /// Post STOP and wait for the thread to exit.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!("adv_post_task_stop");
            if let Err(e) = self.bus.send(AdvPostSig::Stop) {
                error!("{}", e);
            }
            let _ = handle.join();
        }
    }
}

impl Drop for AdvPost {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accepts advertisements from the scanner.
#[derive(Clone)]
pub struct AdvIntake {
    ctx: GwContext,
    recv_adv_timeout: OneShotTimer,
}

impl AdvIntake {
    /// Filter, timestamp and store one advertisement, then notify RECV_ADV.
    ///
    /// Returns false if the report was dropped: the config cache is being
    /// rebuilt, or the scan filter rejects the MAC.
    pub fn on_recv_adv(&self, mut report: AdvReport) -> bool {
        let cache = match self.ctx.adv_post_cfg.try_lock() {
            Ok(cache) => cache,
            Err(e) => {
                debug!("{}, drop adv from {}", e, report.mac);
                return false;
            }
        };
        if !cache.is_mac_allowed(&report.mac) {
            debug!("Adv from {} filtered out", report.mac);
            cache.unlock();
            self.ctx.stats.record_adv_filtered();
            return false;
        }
        let use_ntp = cache.use_ntp;
        cache.unlock();

        report.timestamp = if use_ntp {
            self.ctx.status.timestamp_if_synchronized()
        } else {
            i64::try_from(self.ctx.stats.advs_received()).unwrap_or(i64::MAX)
        };
        self.ctx.adv_table.put(report);
        self.ctx.stats.record_adv_received();
        self.recv_adv_timeout.relaunch(true);
        self.ctx.events.notify(Event::RecvAdv);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gw::{AdvTable, GwCfg, HttpTarget};
    use crate::settings::Timings;
    use crate::test_support::{
        adv_post_task, context, context_with_timings, report, wait_until, Mocks,
    };
    use std::time::Duration;

    fn intake_for(task: &AdvPostTask) -> AdvIntake {
        AdvIntake {
            ctx: task.ctx.clone(),
            recv_adv_timeout: task.timers.recv_adv_timeout.clone(),
        }
    }

    // ==================== Intake Tests ====================

    #[test]
    fn test_intake_stores_and_notifies() {
        let mocks = Mocks::new();
        let task = adv_post_task(&mocks, GwCfg::default());
        let bus = SignalBus::<AdvPostSig>::with_all_signals("listener");
        task.ctx
            .events
            .subscribe(Event::RecvAdv, &bus, AdvPostSig::DoAsyncComm);
        let intake = intake_for(&task);

        assert!(intake.on_recv_adv(report(1)));
        assert_eq!(mocks.adv_table.statistics_count(), 1);
        assert_eq!(task.ctx.stats.advs_received(), 1);
        assert!(task.timers.recv_adv_timeout.is_active());
        assert!(bus.is_pending(AdvPostSig::DoAsyncComm));
    }

    #[test]
    fn test_intake_counter_timestamps_without_ntp() {
        let mocks = Mocks::new();
        let task = adv_post_task(&mocks, GwCfg::default());
        let intake = intake_for(&task);

        intake.on_recv_adv(report(1));
        intake.on_recv_adv(report(2));
        let stored = mocks.adv_table.read_retransmission_list1_and_clear();
        assert_eq!(stored[0].timestamp, 0);
        assert_eq!(stored[1].timestamp, 1);
    }

    #[test]
    fn test_intake_ntp_timestamps_zero_until_synced() {
        let mocks = Mocks::new();
        let task = adv_post_task(&mocks, GwCfg::default());
        task.ctx.adv_post_cfg.lock().use_ntp = true;
        let intake = intake_for(&task);

        intake.on_recv_adv(report(1));
        task.ctx.status.set_time_synchronized(true);
        intake.on_recv_adv(report(2));
        let stored = mocks.adv_table.read_retransmission_list1_and_clear();
        assert_eq!(stored[0].timestamp, 0);
        assert!(stored[1].timestamp > 0);
    }

    #[test]
    fn test_intake_applies_scan_filter() {
        let mocks = Mocks::new();
        let task = adv_post_task(&mocks, GwCfg::default());
        {
            let mut cache = task.ctx.adv_post_cfg.lock();
            cache.scan_filter_allow_listed = true;
            cache.scan_filter = vec![report(1).mac];
        }
        let intake = intake_for(&task);

        assert!(intake.on_recv_adv(report(1)));
        assert!(!intake.on_recv_adv(report(2)));
        assert_eq!(task.ctx.stats.advs_filtered(), 1);
        assert_eq!(mocks.adv_table.statistics_count(), 1);
    }

    #[test]
    fn test_intake_drops_while_cache_locked() {
        let mocks = Mocks::new();
        let task = adv_post_task(&mocks, GwCfg::default());
        let intake = intake_for(&task);

        let guard = task.ctx.adv_post_cfg.lock();
        assert!(!intake.on_recv_adv(report(1)));
        guard.unlock();
        assert!(intake.on_recv_adv(report(1)));
        assert_eq!(mocks.adv_table.statistics_count(), 1);
    }

    // ==================== Lifecycle Tests ====================

    #[test]
    fn test_start_stop() {
        let mocks = Mocks::new();
        let ctx = context(&mocks, GwCfg::default());
        let mut adv_post = AdvPost::start(ctx.clone()).unwrap();

        assert!(adv_post.is_initialized());
        assert_eq!(adv_post.action(), AdvPostAction::None);
        assert_eq!(ctx.events.subscriber_count(Event::WifiConnected), 1);
        assert_eq!(mocks.watchdog.registered(), vec!["adv_post"]);

        adv_post.stop();
        assert!(!adv_post.is_initialized());
        assert_eq!(ctx.events.subscriber_count(Event::WifiConnected), 0);
        assert!(mocks.watchdog.registered().is_empty());
        assert_eq!(ctx.timers.timer_count(), 0);
        assert!(mocks.http.abort_count() >= 1);
    }

    #[test]
    fn test_stop_keeps_server_mutex_held_by_others() {
        let mocks = Mocks::new();
        let ctx = context(&mocks, GwCfg::default());
        ctx.http_server_mutex.activate();
        let server = ctx.http_server_mutex.try_lock().unwrap();
        let mut adv_post = AdvPost::start(ctx.clone()).unwrap();

        adv_post.stop();
        assert!(ctx.http_server_mutex.is_locked());
        assert!(server.is_held());
        drop(server);
        assert!(!ctx.http_server_mutex.is_locked());
    }

    #[test]
    fn test_send_sig_after_stop_is_harmless() {
        let mocks = Mocks::new();
        let ctx = context(&mocks, GwCfg::default());
        let timers = ctx.timers.clone();
        let mut adv_post = AdvPost::start(ctx).unwrap();
        adv_post.stop();
        adv_post.stop();
        assert!(adv_post.send_sig(AdvPostSig::GwCfgReady).is_ok());
        assert_eq!(timers.timer_count(), 0);
    }

    // ==================== Relay Tests ====================

    #[test]
    fn test_http_relay_end_to_end() {
        let mocks = Mocks::new();
        let mut cfg = GwCfg::default();
        cfg.ntp_use = false;
        cfg.http_stat.use_http_stat = false;
        let timings = Timings {
            adv_post_interval_secs: 1,
            do_async_comm_ms: 10,
            ..Timings::default()
        };
        let ctx = context_with_timings(&mocks, cfg, timings);
        let adv_post = AdvPost::start(ctx.clone()).unwrap();

        ctx.events.notify(Event::GwCfgReady);
        ctx.events.notify(Event::WifiConnected);
        // The first post drains the table cleared by GW_CFG_READY.
        assert!(wait_until(Duration::from_secs(5), || !mocks
            .http
            .posts()
            .is_empty()));
        let intake = adv_post.intake();
        assert!(intake.on_recv_adv(report(1)));
        assert!(intake.on_recv_adv(report(2)));

        assert!(wait_until(Duration::from_secs(5), || mocks
            .http
            .posts()
            .iter()
            .map(|p| p.num_reports)
            .sum::<usize>()
            == 2));
        let posts = mocks.http.posts();
        assert!(posts.iter().all(|p| p.target == HttpTarget::Ruuvi));
        assert!(wait_until(Duration::from_secs(5), || !ctx.session.is_busy()));
        assert!(!mocks.leds.oks().is_empty());
        assert!(mocks.leds.fails().is_empty());
    }
}
