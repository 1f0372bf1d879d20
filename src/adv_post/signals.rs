//! adv_post signals and their handlers.

use super::green_led::GreenLedCmd;
use super::task::AdvPostTask;
use crate::event_mgr::Event;
use crate::gw::HttpTarget;
use crate::os::SignalKind;
use log::{debug, error, info};

/// Reasons for the adv_post task to wake up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AdvPostSig {
    Stop = 0,
    NetworkDisconnected,
    NetworkConnected,
    TimeSynchronized,
    Retransmit,
    Retransmit2,
    RetransmitMqtt,
    SendStatistics,
    DoAsyncComm,
    RelayingModeChanged,
    NetworkWatchdog,
    TaskWatchdogFeed,
    GwCfgReady,
    GwCfgChangedRuuvi,
    BleScanChanged,
    CfgModeActivated,
    CfgModeDeactivated,
    GreenLedTurnOn,
    GreenLedTurnOff,
    GreenLedUpdate,
    RecvAdvTimeout,
}

impl SignalKind for AdvPostSig {
    const ALL: &'static [Self] = &[
        Self::Stop,
        Self::NetworkDisconnected,
        Self::NetworkConnected,
        Self::TimeSynchronized,
        Self::Retransmit,
        Self::Retransmit2,
        Self::RetransmitMqtt,
        Self::SendStatistics,
        Self::DoAsyncComm,
        Self::RelayingModeChanged,
        Self::NetworkWatchdog,
        Self::TaskWatchdogFeed,
        Self::GwCfgReady,
        Self::GwCfgChangedRuuvi,
        Self::BleScanChanged,
        Self::CfgModeActivated,
        Self::CfgModeDeactivated,
        Self::GreenLedTurnOn,
        Self::GreenLedTurnOff,
        Self::GreenLedUpdate,
        Self::RecvAdvTimeout,
    ];

    fn num(self) -> u32 {
        self as u32
    }
}

impl AdvPostTask {
    /// Run the handler for one signal. Returns true once the task must stop.
    pub(crate) fn handle_sig(&mut self, sig: AdvPostSig) -> bool {
        match sig {
            AdvPostSig::Stop => self.handle_stop(),
            AdvPostSig::NetworkDisconnected => self.handle_network_disconnected(),
            AdvPostSig::NetworkConnected => self.handle_network_connected(),
            AdvPostSig::TimeSynchronized => self.handle_time_synchronized(),
            AdvPostSig::Retransmit => self.handle_retransmit(),
            AdvPostSig::Retransmit2 => self.handle_retransmit2(),
            AdvPostSig::RetransmitMqtt => self.handle_retransmit_mqtt(),
            AdvPostSig::SendStatistics => self.handle_send_statistics(),
            AdvPostSig::DoAsyncComm => self.do_async_comm(),
            AdvPostSig::RelayingModeChanged => self.handle_relaying_mode_changed(),
            AdvPostSig::NetworkWatchdog => self.handle_network_watchdog(),
            AdvPostSig::TaskWatchdogFeed => self.handle_task_watchdog_feed(),
            AdvPostSig::GwCfgReady => self.handle_gw_cfg_ready(),
            AdvPostSig::GwCfgChangedRuuvi => self.handle_gw_cfg_changed_ruuvi(),
            AdvPostSig::BleScanChanged => self.handle_ble_scan_changed(),
            AdvPostSig::CfgModeActivated => self.handle_cfg_mode_activated(),
            AdvPostSig::CfgModeDeactivated => self.handle_cfg_mode_deactivated(),
            AdvPostSig::GreenLedTurnOn => self.on_green_led_update(GreenLedCmd::On),
            AdvPostSig::GreenLedTurnOff => self.on_green_led_update(GreenLedCmd::Off),
            AdvPostSig::GreenLedUpdate => self.on_green_led_update(GreenLedCmd::Update),
            AdvPostSig::RecvAdvTimeout => self.ctx.events.notify(Event::RecvAdvTimeout),
        }
        self.state.stop
    }

    /// Post a signal to this task's own bus.
    pub(crate) fn send_sig(&self, sig: AdvPostSig) {
        if let Err(e) = self.bus.send(sig) {
            error!("send {:?} failed: {}", sig, e);
        }
    }

    fn restart_pending_retransmissions(&self) {
        debug!("restart pending retransmissions");
        if self.state.need_to_send_advs1 {
            info!("Force pending advs1 retransmission");
            self.timers.relaunch_retransmit(HttpTarget::Ruuvi);
        }
        if self.state.need_to_send_advs2 {
            info!("Force pending advs2 retransmission");
            self.timers.relaunch_retransmit(HttpTarget::Custom);
        }
        if self.state.need_to_send_statistics {
            info!("Force pending statistics retransmission");
            self.timers.relaunch_send_statistics();
        }
    }

    fn handle_stop(&mut self) {
        info!("Got STOP");
        self.state.stop = true;
    }

    fn handle_network_disconnected(&mut self) {
        info!("Handle event: NETWORK_DISCONNECTED");
        self.state.network_connected = false;
    }

    fn handle_network_connected(&mut self) {
        info!("Handle event: NETWORK_CONNECTED");
        self.state.network_connected = true;
        self.restart_pending_retransmissions();
    }

    fn handle_time_synchronized(&mut self) {
        if !self.state.primary_time_sync_is_done {
            self.state.primary_time_sync_is_done = true;
            info!("Remove all accumulated data with zero timestamps");
            self.ctx.adv_table.clear();
            if self.ctx.cfg.lock_ro().http_stat.use_http_stat {
                self.timers.postpone_sending_statistics();
            }
        }
        self.restart_pending_retransmissions();
    }

    fn handle_retransmit(&mut self) {
        info!("Got RETRANSMIT");
        if self.state.relaying_enabled && self.ctx.cfg.lock_ro().http_ruuvi.use_http_ruuvi {
            self.state.need_to_send_advs1 = true;
            self.send_sig(AdvPostSig::DoAsyncComm);
        }
    }

    fn handle_retransmit2(&mut self) {
        info!("Got RETRANSMIT2");
        if self.state.relaying_enabled && self.ctx.cfg.lock_ro().http.use_http {
            self.state.need_to_send_advs2 = true;
            self.send_sig(AdvPostSig::DoAsyncComm);
        }
    }

    fn handle_retransmit_mqtt(&mut self) {
        info!("Got RETRANSMIT_MQTT");
        if self.state.relaying_enabled && self.ctx.cfg.lock_ro().mqtt.use_mqtt {
            self.state.need_to_send_mqtt_periodic = true;
            self.send_sig(AdvPostSig::DoAsyncComm);
        }
    }

    fn handle_send_statistics(&mut self) {
        info!("Got SEND_STATISTICS");
        if self.state.relaying_enabled && self.ctx.cfg.lock_ro().http_stat.use_http_stat {
            self.state.need_to_send_statistics = true;
            self.send_sig(AdvPostSig::DoAsyncComm);
        }
    }

    fn handle_relaying_mode_changed(&mut self) {
        self.state.relaying_enabled = self.ctx.status.is_relaying_via_http_enabled();
        info!(
            "RELAYING_MODE_CHANGED: relaying_enabled={}",
            self.state.relaying_enabled
        );
        if !self.state.relaying_enabled {
            if self.state.async_comm_in_progress {
                self.abort_async_comm();
            }
            let cfg = self.ctx.cfg.lock_ro();
            if cfg.http_ruuvi.use_http_ruuvi {
                self.ctx.leds.notify_data_sent_fail(HttpTarget::Ruuvi);
            }
            if cfg.http.use_http {
                self.ctx.leds.notify_data_sent_fail(HttpTarget::Custom);
            }
        }
        self.ctx.status.clear_http_relaying_cmd();
    }

    fn handle_network_watchdog(&mut self) {
        let timeout = self.ctx.timings.network_watchdog_timeout();
        if self.ctx.network_timeout.check(timeout) {
            info!(
                "No networking for {} seconds - reboot the gateway",
                timeout.as_secs()
            );
            self.ctx.restarter.gateway_restart("Network watchdog");
        }
    }

    fn handle_task_watchdog_feed(&mut self) {
        debug!("Feed watchdog");
        info!("Advs cnt: {}", self.ctx.stats.advs_cnt_get_and_clear());
        if let Err(e) = self.ctx.watchdog.feed() {
            error!("{}", e);
        }
    }

    /// Re-derive timers, flags and the intake cache from the current config.
    fn on_gw_cfg_change(&mut self) {
        let cfg = self.ctx.cfg.lock_ro();
        self.state.use_timestamps = cfg.ntp_use;

        let mut cache = self.ctx.adv_post_cfg.lock();
        if let Err(e) = cache.rebuild(cfg.ntp_use, &cfg.scan_filter) {
            error!("{}", e);
            cache.clear_scan_filter();
            cache.unlock();
            self.ctx
                .restarter
                .gateway_restart("Low memory on gw_cfg_change");
            return;
        }

        if cfg.http_ruuvi.use_http_ruuvi {
            info!("Start timer for advs1 retransmission");
            self.timers.relaunch_with_default_period(HttpTarget::Ruuvi);
            self.state.need_to_send_advs1 = true;
        } else {
            info!("Stop timer for advs1 retransmission");
            self.timers.stop_retransmit(HttpTarget::Ruuvi);
            self.state.need_to_send_advs1 = false;
        }

        if cfg.http.use_http {
            info!("Start timer for advs2 retransmission");
            self.timers
                .set_default_period(HttpTarget::Custom, cfg.http.period_secs.saturating_mul(1000));
            self.timers.relaunch_with_default_period(HttpTarget::Custom);
            self.state.need_to_send_advs2 = true;
        } else {
            info!("Stop timer for advs2 retransmission");
            self.timers.stop_retransmit(HttpTarget::Custom);
            self.state.need_to_send_advs2 = false;
        }

        if cfg.mqtt.use_mqtt && cfg.mqtt.sending_interval_secs != 0 {
            info!("Start timer for relaying to MQTT");
            self.timers.restart_mqtt(cfg.mqtt.sending_interval_secs);
        } else {
            info!("Stop timer for relaying to MQTT");
            self.timers.mqtt.stop();
        }

        if cfg.http_stat.use_http_stat {
            info!("Relaunch timer to send statistics");
            self.timers.relaunch_send_statistics();
            self.state.need_to_send_statistics = true;
        } else {
            info!("Stop timer to send statistics");
            self.timers.send_statistics.stop();
            self.state.need_to_send_statistics = false;
        }

        cache.unlock();

        info!("Clear adv_table");
        self.ctx.adv_table.clear();
        self.timers.do_async_comm.start();
    }

    /// The HTTP server mutex is only needed when MQTT over TLS competes with
    /// an HTTP target for TLS buffers.
    fn update_http_server_mutex(&self) {
        let cfg = self.ctx.cfg.lock_ro();
        if cfg.mqtt_over_ssl_or_wss() && cfg.any_http_target() {
            self.ctx.http_server_mutex.activate();
        } else {
            self.ctx.http_server_mutex.deactivate();
        }
    }

    fn handle_gw_cfg_ready(&mut self) {
        info!("Got GW_CFG_READY");
        let cfg = self.ctx.cfg.lock_ro();
        self.ctx.coprocessor.send_settings(&cfg);
        if cfg.http_stat.use_http_stat {
            self.timers.postpone_sending_statistics();
        }
        drop(cfg);
        self.on_gw_cfg_change();
        self.update_http_server_mutex();
    }

    fn handle_gw_cfg_changed_ruuvi(&mut self) {
        info!("Got GW_CFG_CHANGED_RUUVI");
        self.ctx.coprocessor.send_settings(&self.ctx.cfg.lock_ro());
        self.on_gw_cfg_change();
        self.update_http_server_mutex();
    }

    fn handle_ble_scan_changed(&mut self) {
        info!("Got BLE_SCAN_CHANGED");
        info!("Clear adv_table");
        self.ctx.adv_table.clear();
    }

    fn handle_cfg_mode_activated(&mut self) {
        info!("Got CFG_MODE_ACTIVATED");
        info!("Stop network watchdog timer");
        self.timers.network_watchdog.stop();
        self.ctx.adv_post_cfg.lock().clear_scan_filter();
        info!("Clear adv_table");
        self.ctx.adv_table.clear();
    }

    fn handle_cfg_mode_deactivated(&mut self) {
        info!("Got CFG_MODE_DEACTIVATED");
        info!("Start network watchdog timer");
        self.ctx.network_timeout.update_timestamp();
        self.timers.network_watchdog.start();
        self.ctx.coprocessor.send_settings(&self.ctx.cfg.lock_ro());
        self.on_gw_cfg_change();
    }
}
