//! adv_mqtt signals and their handlers.

use super::task::AdvMqttTask;
use crate::gw::unix_time;
use crate::os::SignalKind;
use log::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AdvMqttSig {
    Stop = 0,
    OnRecvAdv,
    MqttConnected,
    TaskWatchdogFeed,
    GwCfgReady,
    GwCfgChangedRuuvi,
    RelayingModeChanged,
    CfgModeActivated,
    CfgModeDeactivated,
}

impl SignalKind for AdvMqttSig {
    const ALL: &'static [Self] = &[
        Self::Stop,
        Self::OnRecvAdv,
        Self::MqttConnected,
        Self::TaskWatchdogFeed,
        Self::GwCfgReady,
        Self::GwCfgChangedRuuvi,
        Self::RelayingModeChanged,
        Self::CfgModeActivated,
        Self::CfgModeDeactivated,
    ];

    fn num(self) -> u32 {
        self as u32
    }
}

impl AdvMqttTask {
    /// Run the handler for one signal. Returns true once the task must stop.
    pub(crate) fn handle_sig(&mut self, sig: AdvMqttSig) -> bool {
        match sig {
            AdvMqttSig::Stop => {
                info!("Got ADV_MQTT_SIG_STOP");
                self.stop = true;
            }
            AdvMqttSig::OnRecvAdv => self.handle_recv_adv(),
            AdvMqttSig::MqttConnected => {
                if let Err(e) = self.ctx.mqtt.publish_connect() {
                    error!("mqtt_publish_connect failed: {}", e);
                }
            }
            AdvMqttSig::TaskWatchdogFeed => {
                debug!("Feed watchdog");
                if let Err(e) = self.ctx.watchdog.feed() {
                    error!("{}", e);
                }
            }
            AdvMqttSig::GwCfgReady => {
                info!("Got ADV_MQTT_SIG_GW_CFG_READY");
                self.on_gw_cfg_change();
            }
            AdvMqttSig::GwCfgChangedRuuvi => {
                info!("Got ADV_MQTT_SIG_GW_CFG_CHANGED_RUUVI");
                self.on_gw_cfg_change();
            }
            AdvMqttSig::RelayingModeChanged => info!("Got ADV_MQTT_SIG_RELAYING_MODE_CHANGED"),
            AdvMqttSig::CfgModeActivated => info!("Got ADV_MQTT_SIG_CFG_MODE_ACTIVATED"),
            AdvMqttSig::CfgModeDeactivated => {
                info!("Got ADV_MQTT_SIG_CFG_MODE_DEACTIVATED");
                self.on_gw_cfg_change();
            }
        }
        self.stop
    }

    /// Post a signal to this task's own bus.
    pub(crate) fn send_sig(&self, sig: AdvMqttSig) {
        if let Err(e) = self.bus.send(sig) {
            error!("send {:?} failed: {}", sig, e);
        }
    }

    /// Publish the oldest queued advertisement in instant mode. Re-posts
    /// itself while more are queued.
    fn handle_recv_adv(&mut self) {
        debug!("Got ADV_MQTT_SIG_RECV_ADV");
        let status = &self.ctx.status;
        if !status.is_mqtt_connected() || !status.is_relaying_via_mqtt_enabled() {
            return;
        }
        let cache = self.ctx.adv_mqtt_cfg.lock();
        if !cache.mqtt_instant_mode_active {
            return;
        }
        if !self.ctx.mqtt.is_buffer_available_for_publish() {
            debug!("MQTT buffer is full - postpone sending advs to MQTT");
            self.timers.retry_sending_advs.start();
            return;
        }

        if let Some(report) = self.ctx.adv_table.read_retransmission_list3_head() {
            let timestamp = if cache.use_ntp {
                if status.is_time_synchronized() {
                    unix_time()
                } else {
                    0
                }
            } else {
                i64::try_from(self.ctx.stats.advs_received()).unwrap_or(i64::MAX)
            };
            match self.ctx.mqtt.publish_adv(&report, cache.use_ntp, timestamp) {
                Ok(()) => {
                    self.ctx.stats.record_mqtt_published();
                    self.ctx.network_timeout.update_timestamp();
                }
                Err(e) => {
                    error!("mqtt_publish_adv failed: {}", e);
                    self.ctx.stats.record_mqtt_failed();
                }
            }
        }
        if !self.ctx.adv_table.is_retransmission_list3_empty() {
            self.send_sig(AdvMqttSig::OnRecvAdv);
        }
        cache.unlock();
    }

    fn on_gw_cfg_change(&mut self) {
        let cfg = self.ctx.cfg.lock_ro();
        let mut cache = self.ctx.adv_mqtt_cfg.lock();
        cache.rebuild(&cfg);
        info!(
            "adv_mqtt: use_ntp={}, instant_mode={}",
            cache.use_ntp, cache.mqtt_instant_mode_active
        );
    }
}
