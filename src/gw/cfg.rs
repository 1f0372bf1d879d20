//! Gateway configuration snapshot and its provider.
//!
//! The configuration itself is owned by the storage/web-UI side of the
//! firmware. Tasks only see immutable [`GwCfg`] snapshots handed out by
//! [`GwCfgStore::lock_ro`]; one snapshot gives a consistent view across
//! several reads in one handler.

use super::adv::MacAddr;
use log::info;
use serde::Deserialize;
use std::sync::{Arc, PoisonError, RwLock};

/// Ruuvi cloud HTTP target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpRuuviCfg {
    pub use_http_ruuvi: bool,
    pub url: String,
}

impl Default for HttpRuuviCfg {
    fn default() -> Self {
        Self {
            use_http_ruuvi: true,
            url: "https://network.ruuvi.com/record".to_string(),
        }
    }
}

/// Custom HTTP target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpCustomCfg {
    pub use_http: bool,
    pub url: String,
    /// Sending period in seconds.
    pub period_secs: u32,
}

impl Default for HttpCustomCfg {
    fn default() -> Self {
        Self {
            use_http: false,
            url: String::new(),
            period_secs: 10,
        }
    }
}

/// HTTP statistics target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpStatCfg {
    pub use_http_stat: bool,
    pub url: String,
}

impl Default for HttpStatCfg {
    fn default() -> Self {
        Self {
            use_http_stat: true,
            url: "https://network.ruuvi.com/status".to_string(),
        }
    }
}

/// MQTT transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqttTransportKind {
    #[default]
    Tcp,
    Ssl,
    Ws,
    Wss,
}

/// MQTT target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttCfg {
    pub use_mqtt: bool,
    pub transport: MqttTransportKind,
    pub server: String,
    pub port: u16,
    pub prefix: String,
    /// Periodic relay interval in seconds; 0 means relay every report
    /// as soon as it arrives.
    pub sending_interval_secs: u32,
}

impl Default for MqttCfg {
    fn default() -> Self {
        Self {
            use_mqtt: false,
            transport: MqttTransportKind::Tcp,
            server: "test.mosquitto.org".to_string(),
            port: 1883,
            prefix: "ruuvi/".to_string(),
            sending_interval_secs: 0,
        }
    }
}

/// Scan filter: allow-list or deny-list of tag MACs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ScanFilterCfg {
    /// `true`: only listed MACs pass. `false`: listed MACs are dropped.
    pub allow_listed: bool,
    pub list: Vec<MacAddr>,
}

/// One immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GwCfg {
    pub ntp_use: bool,
    pub http_ruuvi: HttpRuuviCfg,
    pub http: HttpCustomCfg,
    pub http_stat: HttpStatCfg,
    pub mqtt: MqttCfg,
    pub scan_filter: ScanFilterCfg,
}

impl Default for GwCfg {
    fn default() -> Self {
        Self {
            ntp_use: true,
            http_ruuvi: HttpRuuviCfg::default(),
            http: HttpCustomCfg::default(),
            http_stat: HttpStatCfg::default(),
            mqtt: MqttCfg::default(),
            scan_filter: ScanFilterCfg::default(),
        }
    }
}

impl GwCfg {
    /// Parse a (possibly partial) JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// MQTT is enabled and runs over TLS (`ssl` or `wss`).
    pub fn mqtt_over_ssl_or_wss(&self) -> bool {
        self.mqtt.use_mqtt
            && matches!(
                self.mqtt.transport,
                MqttTransportKind::Ssl | MqttTransportKind::Wss
            )
    }

    /// At least one HTTP advertisement target is enabled.
    pub fn any_http_target(&self) -> bool {
        self.http_ruuvi.use_http_ruuvi || self.http.use_http
    }

    /// MQTT relays each report as it arrives instead of periodically.
    pub fn mqtt_instant_mode(&self) -> bool {
        self.mqtt.use_mqtt && self.mqtt.sending_interval_secs == 0
    }
}

/// Config provider: hands out read-only snapshots and swaps them atomically.
#[derive(Debug, Default)]
pub struct GwCfgStore {
    current: RwLock<Arc<GwCfg>>,
}

impl GwCfgStore {
    pub fn new(cfg: GwCfg) -> Self {
        Self {
            current: RwLock::new(Arc::new(cfg)),
        }
    }

    /// Consistent read-only snapshot. Released when the `Arc` is dropped.
    pub fn lock_ro(&self) -> Arc<GwCfg> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration. Existing snapshots keep the old values.
    ///
    /// Callers notify `GW_CFG_CHANGED_RUUVI` (or `GW_CFG_READY` on first
    /// load) afterwards so the tasks re-read it.
    pub fn update(&self, cfg: GwCfg) {
        info!("Gateway configuration updated");
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(cfg);
    }
}
