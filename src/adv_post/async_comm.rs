//! Single-flight HTTP/MQTT relay engine of the adv_post task.
//!
//! Driven by the DO_ASYNC_COMM signal. Each tick either advances the
//! transfer in flight (polls HTTP, or publishes the next MQTT item) or, when
//! idle, starts at most one new transfer in the fixed priority order
//! advs1, advs2, statistics, periodic MQTT.
//!
//! HTTP transfers hold the [`AsyncSession`](crate::comm::AsyncSession)
//! permit and the HTTP server mutex until the poll reports completion.
//! Nothing here ever blocks; every "not now" outcome leaves the need flag
//! set and waits for the next timer tick.

use super::signals::AdvPostSig;
use super::task::AdvPostTask;
use crate::comm::{HmacKeys, HmacTarget, HttpServerLock, SessionPermit};
use crate::gw::{unix_time, AdvReport, HttpPoll, HttpResponse, HttpTarget, StatsReport};
use crate::stats_server::TargetStats;
use log::{debug, error, info, warn};
use rand_core::{OsRng, RngCore};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Transfer currently owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvPostAction {
    #[default]
    None,
    PostAdvsToRuuvi,
    PostAdvsToCustom,
    PostStats,
    PostAdvsToMqtt,
}

impl From<HttpTarget> for AdvPostAction {
    fn from(target: HttpTarget) -> Self {
        match target {
            HttpTarget::Ruuvi => Self::PostAdvsToRuuvi,
            HttpTarget::Custom => Self::PostAdvsToCustom,
        }
    }
}

/// Engine state shared with the transport layer.
///
/// Response callbacks use it to route server hints (sending rate, HMAC key)
/// to the target whose transfer is in flight.
pub struct AdvPostControl {
    action: Mutex<AdvPostAction>,
    adv1_period_ms: AtomicU32,
    adv2_period_ms: AtomicU32,
    hmac_keys: Arc<HmacKeys>,
}

impl AdvPostControl {
    pub fn new(default_period_ms: u32, hmac_keys: Arc<HmacKeys>) -> Self {
        Self {
            action: Mutex::new(AdvPostAction::None),
            adv1_period_ms: AtomicU32::new(default_period_ms),
            adv2_period_ms: AtomicU32::new(default_period_ms),
            hmac_keys,
        }
    }

    /// Transfer in flight.
    pub fn action(&self) -> AdvPostAction {
        *self.action.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_action(&self, action: AdvPostAction) {
        *self.action.lock().unwrap_or_else(PoisonError::into_inner) = action;
    }

    /// Mark an HTTP advertisement post as in flight.
    pub fn set_http_action(&self, to_ruuvi: bool) {
        self.set_action(if to_ruuvi {
            AdvPostAction::PostAdvsToRuuvi
        } else {
            AdvPostAction::PostAdvsToCustom
        });
    }

    /// Apply a server-requested sending period to the target in flight.
    /// Ignored for statistics, MQTT and when idle.
    pub fn set_default_period(&self, period_ms: u32) {
        let (num, slot) = match self.action() {
            AdvPostAction::PostAdvsToRuuvi => (1, &self.adv1_period_ms),
            AdvPostAction::PostAdvsToCustom => (2, &self.adv2_period_ms),
            AdvPostAction::None | AdvPostAction::PostStats | AdvPostAction::PostAdvsToMqtt => {
                return
            }
        };
        let prev = slot.swap(period_ms, Ordering::AcqRel);
        if prev != period_ms {
            info!(
                "X-Ruuvi-Gateway-Rate: adv{}: Change period from {} ms to {} ms",
                num, prev, period_ms
            );
        }
    }

    /// Store a server-provided HMAC key for the target in flight.
    pub fn set_hmac_sha256_key(&self, key: &str) -> bool {
        let target = match self.action() {
            AdvPostAction::PostAdvsToRuuvi => HmacTarget::HttpRuuvi,
            AdvPostAction::PostAdvsToCustom => HmacTarget::HttpCustom,
            AdvPostAction::PostStats => HmacTarget::Stats,
            AdvPostAction::None | AdvPostAction::PostAdvsToMqtt => return false,
        };
        info!("Ruuvi-HMAC-KEY: Server updated HMAC_SHA256 key for {:?}", target);
        self.hmac_keys.set_key(target, key)
    }

    /// Current default sending period of an HTTP target.
    pub fn default_period_ms(&self, target: HttpTarget) -> u32 {
        match target {
            HttpTarget::Ruuvi => self.adv1_period_ms.load(Ordering::Acquire),
            HttpTarget::Custom => self.adv2_period_ms.load(Ordering::Acquire),
        }
    }

    pub(crate) fn set_default_period_ms(&self, target: HttpTarget, period_ms: u32) {
        info!("{}: Set default period: {} ms", target, period_ms);
        match target {
            HttpTarget::Ruuvi => self.adv1_period_ms.store(period_ms, Ordering::Release),
            HttpTarget::Custom => self.adv2_period_ms.store(period_ms, Ordering::Release),
        }
    }
}

impl std::fmt::Debug for AdvPostControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvPostControl")
            .field("action", &self.action())
            .field("adv1_period_ms", &self.adv1_period_ms)
            .field("adv2_period_ms", &self.adv2_period_ms)
            .finish_non_exhaustive()
    }
}

/// Snapshot of MQTT list 3 being published one item per tick.
#[derive(Debug)]
struct MqttDrain {
    reports: Vec<AdvReport>,
    idx: usize,
    timestamp: i64,
    use_ntp: bool,
}

/// Task-private engine state.
#[derive(Debug)]
pub(crate) struct AsyncComm {
    pub(crate) nonce: u32,
    pub(crate) stats_nonce: u32,
    permit: Option<SessionPermit>,
    server_lock: Option<HttpServerLock>,
    mqtt: Option<MqttDrain>,
}

impl AsyncComm {
    pub(crate) fn new() -> Self {
        Self {
            nonce: OsRng.next_u32(),
            stats_nonce: OsRng.next_u32(),
            permit: None,
            server_lock: None,
            mqtt: None,
        }
    }
}

fn log_reports(reports: &[AdvReport], use_timestamps: bool, target: &str) {
    info!(
        "Advertisements in table for target={} (num={}):",
        target,
        reports.len()
    );
    for (i, adv) in reports.iter().enumerate() {
        debug!(
            "i: {}, tag: {}, rssi: {}, {}: {}",
            i,
            adv.mac,
            adv.rssi,
            if use_timestamps { "timestamp" } else { "counter" },
            adv.timestamp
        );
    }
}

impl AdvPostTask {
    /// DO_ASYNC_COMM handler.
    pub(crate) fn do_async_comm(&mut self) {
        debug!(
            "async_comm_in_progress={}",
            self.state.async_comm_in_progress
        );
        if self.state.async_comm_in_progress {
            if !self.async_comm_in_progress() {
                return;
            }
            self.state.async_comm_in_progress = false;
        }
        if !self.state.relaying_enabled {
            return;
        }
        if self.state.need_to_send_advs1 {
            self.send_advs(HttpTarget::Ruuvi);
        } else if self.state.need_to_send_advs2 {
            self.send_advs(HttpTarget::Custom);
        } else if self.state.need_to_send_statistics {
            self.send_statistics();
        } else if self.state.need_to_send_mqtt_periodic {
            self.start_sending_periodic_mqtt();
        } else {
            return;
        }
        self.timers.do_async_comm.start();
    }

    /// Force the engine idle: abort the transfer, drop the MQTT snapshot and
    /// release what the engine holds of the session and the HTTP server mutex.
    /// Safe when idle.
    pub(crate) fn abort_async_comm(&mut self) {
        self.timers.do_async_comm.stop();
        self.ctx.http.abort();
        self.state.async_comm_in_progress = false;
        self.comm.mqtt = None;
        self.comm.permit = None;
        self.control.set_action(AdvPostAction::None);
        self.release_http_server_mutex();
    }

    /// Release the HTTP server mutex if this engine holds it.
    fn release_http_server_mutex(&mut self) {
        if let Some(lock) = self.comm.server_lock.take() {
            debug!("http_server_mutex_unlock");
            lock.unlock();
        }
    }

    fn need_to_send(&mut self, target: HttpTarget) -> &mut bool {
        match target {
            HttpTarget::Ruuvi => &mut self.state.need_to_send_advs1,
            HttpTarget::Custom => &mut self.state.need_to_send_advs2,
        }
    }

    fn target_stats(&self, target: HttpTarget) -> &TargetStats {
        match target {
            HttpTarget::Ruuvi => &self.ctx.stats.http_ruuvi,
            HttpTarget::Custom => &self.ctx.stats.http_custom,
        }
    }

    /// Common preconditions of an HTTP transfer. On success the engine holds
    /// the HTTP server mutex and the returned session permit.
    fn acquire_http(&mut self, what: &str) -> Option<SessionPermit> {
        if !self.state.network_connected {
            debug!("Can't send {}, no network connection", what);
            return None;
        }
        if self.state.use_timestamps && !self.ctx.status.is_time_synchronized() {
            debug!("Can't send {}, the time is not yet synchronized", what);
            return None;
        }
        let Ok(lock) = self.ctx.http_server_mutex.try_lock() else {
            debug!(
                "Wait until incoming HTTP connection is handled, postpone sending {}",
                what
            );
            return None;
        };
        match self.ctx.session.try_acquire() {
            Ok(permit) => {
                self.comm.server_lock = Some(lock);
                Some(permit)
            }
            Err(busy) => {
                debug!("{}, postpone sending {}", busy, what);
                self.ctx.stats.record_session_busy();
                None
            }
        }
    }

    fn send_advs(&mut self, target: HttpTarget) {
        let what = match target {
            HttpTarget::Ruuvi => "advs1",
            HttpTarget::Custom => "advs2",
        };
        let Some(permit) = self.acquire_http(what) else {
            return;
        };
        self.control.set_action(target.into());

        let reports = match target {
            HttpTarget::Ruuvi => self.ctx.adv_table.read_retransmission_list1_and_clear(),
            HttpTarget::Custom => self.ctx.adv_table.read_retransmission_list2_and_clear(),
        };
        let target_name = target.to_string();
        log_reports(&reports, self.state.use_timestamps, &target_name);

        let cfg = self.ctx.cfg.lock_ro();
        self.target_stats(target).record_started();
        let res = self.ctx.http.post_advs(
            target,
            &reports,
            self.comm.nonce,
            self.state.use_timestamps,
            &cfg,
        );
        match res {
            Ok(()) => {
                self.comm.nonce = self.comm.nonce.wrapping_add(1);
                self.comm.permit = Some(permit);
                self.state.async_comm_in_progress = true;
                *self.need_to_send(target) = false;
            }
            Err(e) => {
                error!("{}: {}", target_name, e);
                self.target_stats(target).record_failed();
                self.control.set_action(AdvPostAction::None);
                self.ctx.leds.notify_data_sent_fail(target);
                *self.need_to_send(target) = false;
                drop(permit);
                self.release_http_server_mutex();
            }
        }
    }

    fn send_statistics(&mut self) {
        let cfg = self.ctx.cfg.lock_ro();
        if !cfg.http_stat.use_http_stat {
            warn!("Can't send statistics, it was disabled in gw_cfg");
            self.state.need_to_send_statistics = false;
            return;
        }
        let Some(permit) = self.acquire_http("statistics") else {
            return;
        };
        self.control.set_action(AdvPostAction::PostStats);

        let report = StatsReport {
            nonce: self.comm.stats_nonce,
            uptime_secs: self.ctx.stats.uptime_secs(),
            advs_in_table: self.ctx.adv_table.statistics_count(),
            advs_received: self.ctx.stats.advs_received(),
            advs_filtered: self.ctx.stats.advs_filtered(),
            network_connected: self.state.network_connected,
        };
        self.comm.stats_nonce = self.comm.stats_nonce.wrapping_add(1);

        self.ctx.stats.http_stats.record_started();
        match self.ctx.http.post_stats(&report, &cfg) {
            Ok(()) => {
                self.comm.permit = Some(permit);
                self.state.need_to_send_statistics = false;
                self.state.async_comm_in_progress = true;
            }
            Err(e) => {
                error!("Failed to send statistics: {}", e);
                self.ctx.stats.http_stats.record_failed();
                self.control.set_action(AdvPostAction::None);
                self.state.need_to_send_statistics = false;
                drop(permit);
                self.release_http_server_mutex();
            }
        }
    }

    fn start_sending_periodic_mqtt(&mut self) {
        let cfg = self.ctx.cfg.lock_ro();
        if !cfg.mqtt.use_mqtt {
            debug!("Can't send advs via MQTT, it was disabled in gw_cfg");
            self.state.need_to_send_mqtt_periodic = false;
            return;
        }
        if !self.state.network_connected {
            debug!("Can't send advs via MQTT, no network connection");
            self.state.need_to_send_mqtt_periodic = false;
            return;
        }
        if !self.ctx.status.is_mqtt_connected() {
            debug!("Can't send advs via MQTT, MQTT is not connected");
            self.state.need_to_send_mqtt_periodic = false;
            return;
        }
        if self.state.use_timestamps && !self.ctx.status.is_time_synchronized() {
            debug!("Can't send advs via MQTT, the time is not yet synchronized");
            return;
        }
        self.control.set_action(AdvPostAction::PostAdvsToMqtt);

        let reports = self.ctx.adv_table.read_retransmission_list3_and_clear();
        log_reports(&reports, self.state.use_timestamps, "MQTT");
        self.comm.mqtt = Some(MqttDrain {
            reports,
            idx: 0,
            timestamp: if cfg.ntp_use { unix_time() } else { 0 },
            use_ntp: cfg.ntp_use,
        });

        self.state.need_to_send_mqtt_periodic = false;
        self.state.async_comm_in_progress = true;
        self.send_sig(AdvPostSig::DoAsyncComm);
    }

    /// Advance the transfer in flight. Returns true once it has finished.
    fn async_comm_in_progress(&mut self) -> bool {
        if self.control.action() == AdvPostAction::PostAdvsToMqtt {
            if !self.mqtt_publish_next() {
                self.timers.do_async_comm.start();
                return false;
            }
            self.control.set_action(AdvPostAction::None);
            return true;
        }

        match self.ctx.http.poll() {
            HttpPoll::InProgress => {
                self.timers.do_async_comm.start();
                false
            }
            HttpPoll::Done(response) => {
                self.on_http_done(response);
                true
            }
        }
    }

    fn on_http_done(&mut self, response: HttpResponse) {
        if let Some(period_ms) = response.rate_hint_ms {
            self.control.set_default_period(period_ms);
        }
        if let Some(key) = response.hmac_key.as_deref() {
            if !self.control.set_hmac_sha256_key(key) {
                warn!("HMAC key from server rejected");
            }
        }

        match self.control.action() {
            AdvPostAction::PostAdvsToRuuvi | AdvPostAction::PostAdvsToCustom => {
                let target = if self.control.action() == AdvPostAction::PostAdvsToRuuvi {
                    HttpTarget::Ruuvi
                } else {
                    HttpTarget::Custom
                };
                if response.is_success() {
                    self.ctx.network_timeout.update_timestamp();
                    self.ctx.leds.notify_data_sent_ok(target);
                    self.timers.relaunch_with_default_period(target);
                } else {
                    error!("{}: HTTP response status {}", target, response.status);
                    self.target_stats(target).record_failed();
                    self.ctx.leds.notify_data_sent_fail(target);
                    self.timers.relaunch_with_increased_period(target);
                }
                *self.need_to_send(target) = false;
            }
            AdvPostAction::PostStats => {
                if response.is_success() {
                    self.ctx.network_timeout.update_timestamp();
                } else {
                    error!("Statistics: HTTP response status {}", response.status);
                    self.ctx.stats.http_stats.record_failed();
                }
                self.state.need_to_send_statistics = false;
            }
            AdvPostAction::None | AdvPostAction::PostAdvsToMqtt => {}
        }
        self.control.set_action(AdvPostAction::None);
        self.comm.permit = None;
        self.release_http_server_mutex();
        debug!("Relay stats: {}", self.ctx.stats.to_json());
    }

    /// Publish the item at the cursor. Returns true once the snapshot is done.
    fn mqtt_publish_next(&mut self) -> bool {
        let finished = match self.comm.mqtt.as_mut() {
            None => {
                error!("MQTT relaying in progress without a snapshot");
                true
            }
            Some(drain) => match drain.reports.get(drain.idx) {
                None => true,
                Some(report) => {
                    match self
                        .ctx
                        .mqtt
                        .publish_adv(report, drain.use_ntp, drain.timestamp)
                    {
                        Ok(()) => {
                            self.ctx.stats.record_mqtt_published();
                            drain.idx += 1;
                            drain.idx >= drain.reports.len()
                        }
                        Err(e) => {
                            error!("mqtt_publish_adv failed: {}", e);
                            self.ctx.stats.record_mqtt_failed();
                            true
                        }
                    }
                }
            },
        };
        if finished {
            self.comm.mqtt = None;
        }
        finished
    }
}
