//! Gateway status flags shared between tasks and the network layer.

use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Connectivity and relaying flags.
///
/// Writers are the network/MQTT/web-UI collaborators; the relay tasks only
/// read them after being woken by the matching event.
#[derive(Debug)]
pub struct GwStatus {
    mqtt_connected: AtomicBool,
    relaying_via_http: AtomicBool,
    relaying_via_mqtt: AtomicBool,
    http_relaying_cmd_pending: AtomicBool,
    time_synchronized: AtomicBool,
}

impl GwStatus {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            relaying_via_http: AtomicBool::new(true),
            relaying_via_mqtt: AtomicBool::new(true),
            http_relaying_cmd_pending: AtomicBool::new(false),
            time_synchronized: AtomicBool::new(false),
        }
    }

    pub fn is_mqtt_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Acquire)
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Release);
    }

    pub fn is_relaying_via_http_enabled(&self) -> bool {
        self.relaying_via_http.load(Ordering::Acquire)
    }

    pub fn is_relaying_via_mqtt_enabled(&self) -> bool {
        self.relaying_via_mqtt.load(Ordering::Acquire)
    }

    /// Switch HTTP relaying and latch the command as pending until the
    /// adv_post task has handled it.
    pub fn set_relaying_via_http(&self, enabled: bool) {
        info!("Relaying via HTTP: {}", if enabled { "on" } else { "off" });
        self.relaying_via_http.store(enabled, Ordering::Release);
        self.http_relaying_cmd_pending.store(true, Ordering::Release);
    }

    pub fn set_relaying_via_mqtt(&self, enabled: bool) {
        info!("Relaying via MQTT: {}", if enabled { "on" } else { "off" });
        self.relaying_via_mqtt.store(enabled, Ordering::Release);
    }

    pub fn is_http_relaying_cmd_pending(&self) -> bool {
        self.http_relaying_cmd_pending.load(Ordering::Acquire)
    }

    pub fn clear_http_relaying_cmd(&self) {
        self.http_relaying_cmd_pending.store(false, Ordering::Release);
    }

    pub fn is_time_synchronized(&self) -> bool {
        self.time_synchronized.load(Ordering::Acquire)
    }

    pub fn set_time_synchronized(&self, synced: bool) {
        self.time_synchronized.store(synced, Ordering::Release);
    }

    /// Wall-clock time if it is synchronized, otherwise 0.
    pub fn timestamp_if_synchronized(&self) -> i64 {
        if self.is_time_synchronized() {
            unix_time()
        } else {
            0
        }
    }
}

impl Default for GwStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Current Unix time in seconds (0 if the clock is before the epoch).
pub fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
