//! Host-side collaborators.
//!
//! Log-only LEDs and coprocessor, a software task watchdog, and simulated
//! HTTP/MQTT transports with a fixed request latency. Used by the `gateway`
//! binary to run both relay tasks without hardware.

use crate::comm::{HmacKeys, HmacTarget};
use crate::gw::{
    AdvReport, BleCoprocessor, GwCfg, HttpClient, HttpPoll, HttpResponse, HttpTarget, Leds,
    MqttClient, PlatformError, Restarter, StatsReport, TaskWatchdog, TransportError,
};
use log::{debug, error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}

fn adv_json(adv: &AdvReport, use_timestamps: bool) -> serde_json::Value {
    let mut value = json!({
        "rssi": adv.rssi,
        "data": hex(&adv.data),
    });
    value[if use_timestamps { "timestamp" } else { "counter" }] = json!(adv.timestamp);
    value
}

#[derive(Debug, Default)]
pub struct LogLeds;

impl Leds for LogLeds {
    fn notify_data_sent_ok(&self, target: HttpTarget) {
        debug!("LED: {} data sent", target);
    }

    fn notify_data_sent_fail(&self, target: HttpTarget) {
        warn!("LED: {} data sending failed", target);
    }
}

#[derive(Debug, Default)]
pub struct LogCoprocessor;

impl BleCoprocessor for LogCoprocessor {
    fn send_settings(&self, cfg: &GwCfg) {
        info!(
            "BLE coprocessor: scan filter {} ({} MACs)",
            if cfg.scan_filter.allow_listed { "allow" } else { "deny" },
            cfg.scan_filter.list.len()
        );
    }

    fn send_led_ctrl(&self, on_interval_ms: u32) -> Result<(), PlatformError> {
        debug!("BLE coprocessor: LED on_interval={} ms", on_interval_ms);
        Ok(())
    }
}

/// Task watchdog that only checks registration and remembers the last feed.
#[derive(Debug, Default)]
pub struct SoftWatchdog {
    tasks: Mutex<HashMap<ThreadId, (&'static str, Instant)>>,
}

impl SoftWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of tasks whose last feed is older than `timeout`.
    pub fn starving(&self, timeout: Duration) -> Vec<&'static str> {
        lock(&self.tasks)
            .values()
            .filter(|(_, fed)| fed.elapsed() > timeout)
            .map(|(name, _)| *name)
            .collect()
    }
}

impl TaskWatchdog for SoftWatchdog {
    fn register_current_thread(&self, task: &'static str) -> Result<(), PlatformError> {
        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(&thread::current().id()) {
            return Err(PlatformError {
                op: "task_wdt_add",
                code: -1,
            });
        }
        tasks.insert(thread::current().id(), (task, Instant::now()));
        Ok(())
    }

    fn feed(&self) -> Result<(), PlatformError> {
        match lock(&self.tasks).get_mut(&thread::current().id()) {
            Some((_, fed)) => {
                *fed = Instant::now();
                Ok(())
            }
            None => Err(PlatformError {
                op: "task_wdt_reset",
                code: -1,
            }),
        }
    }

    fn unregister_current_thread(&self, task: &'static str) {
        if lock(&self.tasks).remove(&thread::current().id()).is_none() {
            warn!("TaskWatchdog: {} was not registered", task);
        }
    }
}

/// Records the restart request instead of rebooting.
#[derive(Debug, Default)]
pub struct HostRestarter {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl HostRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_restart_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        lock(&self.reason).clone()
    }
}

impl Restarter for HostRestarter {
    fn gateway_restart(&self, reason: &str) {
        error!("Gateway restart requested: {}", reason);
        *lock(&self.reason) = Some(reason.to_string());
        self.requested.store(true, Ordering::Release);
    }
}

#[derive(Debug)]
struct Transfer {
    what: String,
    started: Instant,
}

/// HTTP client that completes every request after a fixed latency.
///
/// Bodies are built and signed the way the device does it, then only logged.
pub struct SimHttpClient {
    latency: Duration,
    hmac_keys: Arc<HmacKeys>,
    transfer: Mutex<Option<Transfer>>,
    requests: AtomicU64,
}

impl SimHttpClient {
    pub fn new(latency: Duration, hmac_keys: Arc<HmacKeys>) -> Self {
        Self {
            latency,
            hmac_keys,
            transfer: Mutex::new(None),
            requests: AtomicU64::new(0),
        }
    }

    /// Requests started so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn start(&self, what: String, target: HmacTarget, body: &str) -> Result<(), TransportError> {
        let mut transfer = lock(&self.transfer);
        if let Some(active) = transfer.as_ref() {
            return Err(TransportError::Send(format!(
                "request '{}' still in progress",
                active.what
            )));
        }
        let signature = self.hmac_keys.calc(target, body.as_bytes());
        debug!(
            "{}: POST {} bytes, signature='{}'",
            what,
            body.len(),
            signature
        );
        self.requests.fetch_add(1, Ordering::Relaxed);
        *transfer = Some(Transfer {
            what,
            started: Instant::now(),
        });
        Ok(())
    }
}

impl HttpClient for SimHttpClient {
    fn post_advs(
        &self,
        target: HttpTarget,
        reports: &[AdvReport],
        nonce: u32,
        use_timestamps: bool,
        cfg: &GwCfg,
    ) -> Result<(), TransportError> {
        let (url, key) = match target {
            HttpTarget::Ruuvi => (&cfg.http_ruuvi.url, HmacTarget::HttpRuuvi),
            HttpTarget::Custom => (&cfg.http.url, HmacTarget::HttpCustom),
        };
        let tags: serde_json::Map<String, serde_json::Value> = reports
            .iter()
            .map(|adv| (adv.mac.to_string(), adv_json(adv, use_timestamps)))
            .collect();
        let body = json!({ "data": { "nonce": nonce, "tags": tags } }).to_string();
        self.start(format!("{} {}", target, url), key, &body)
    }

    fn post_stats(&self, report: &StatsReport, cfg: &GwCfg) -> Result<(), TransportError> {
        let body = json!({
            "NONCE": report.nonce,
            "UPTIME": report.uptime_secs,
            "NUM_ADVS": report.advs_in_table,
            "RECEIVED_ADVS": report.advs_received,
            "FILTERED_ADVS": report.advs_filtered,
            "NETWORK_CONNECTED": report.network_connected,
        })
        .to_string();
        self.start(
            format!("HTTP(Stats) {}", cfg.http_stat.url),
            HmacTarget::Stats,
            &body,
        )
    }

    fn poll(&self) -> HttpPoll {
        let mut transfer = lock(&self.transfer);
        match transfer.as_ref() {
            None => HttpPoll::Done(HttpResponse::default()),
            Some(active) if active.started.elapsed() < self.latency => HttpPoll::InProgress,
            Some(_) => {
                if let Some(done) = transfer.take() {
                    debug!("{}: 200 OK", done.what);
                }
                HttpPoll::Done(HttpResponse::ok())
            }
        }
    }

    fn abort(&self) {
        if let Some(active) = lock(&self.transfer).take() {
            info!("{}: aborted", active.what);
        }
    }
}

/// MQTT client that is always connected and never runs out of buffer space.
#[derive(Debug, Default)]
pub struct SimMqttClient {
    published: AtomicU64,
}

impl SimMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl MqttClient for SimMqttClient {
    fn is_buffer_available_for_publish(&self) -> bool {
        true
    }

    fn publish_adv(
        &self,
        report: &AdvReport,
        use_ntp: bool,
        timestamp: i64,
    ) -> Result<(), TransportError> {
        let mut payload = adv_json(report, use_ntp);
        payload["gwts"] = json!(timestamp);
        debug!("MQTT publish {}: {}", report.mac, payload);
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn publish_connect(&self) -> Result<(), TransportError> {
        info!("MQTT publish: gw_status online");
        Ok(())
    }
}
