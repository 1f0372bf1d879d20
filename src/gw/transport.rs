//! Transport contracts for HTTP and MQTT relaying.
//!
//! Implementations own the wire protocol (TLS, sockets, JSON encoding).
//! The relay engine only starts a transfer, polls it to completion and
//! applies the hints the server returned.

use super::adv::AdvReport;
use super::cfg::GwCfg;
use std::fmt;

/// HTTP advertisement target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpTarget {
    Ruuvi,
    Custom,
}

impl fmt::Display for HttpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ruuvi => write!(f, "HTTP(Ruuvi)"),
            Self::Custom => write!(f, "HTTP(Custom)"),
        }
    }
}

/// Statistics report posted to the HTTP statistics target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    pub nonce: u32,
    pub uptime_secs: u64,
    /// Reports seen by the advertisement table since it was last cleared.
    pub advs_in_table: usize,
    pub advs_received: u64,
    pub advs_filtered: u64,
    pub network_connected: bool,
}

/// Errors reported by a transport when a transfer cannot be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The client could not be initialised (allocation, TLS setup).
    Init(String),
    /// The request could not be sent.
    Send(String),
    /// The MQTT client is not connected.
    NotConnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(msg) => write!(f, "transport init failed: {}", msg),
            Self::Send(msg) => write!(f, "send failed: {}", msg),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Result of a finished HTTP transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code; 0 if no response was received.
    pub status: u16,
    /// Server-requested sending period (`X-Ruuvi-Gateway-Rate`) in ms.
    pub rate_hint_ms: Option<u32>,
    /// Server-provided HMAC-SHA256 key (`Ruuvi-HMAC-KEY`).
    pub hmac_key: Option<String>,
}

impl HttpResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Progress of the in-flight HTTP transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "an unfinished transfer must be polled again later"]
pub enum HttpPoll {
    InProgress,
    Done(HttpResponse),
}

/// Asynchronous HTTP client with one transfer in flight at a time.
pub trait HttpClient: Send + Sync {
    /// Start posting `reports` to `target`. Returns once the transfer has
    /// started, not when it completes.
    fn post_advs(
        &self,
        target: HttpTarget,
        reports: &[AdvReport],
        nonce: u32,
        use_timestamps: bool,
        cfg: &GwCfg,
    ) -> Result<(), TransportError>;

    /// Start posting a statistics report.
    fn post_stats(&self, report: &StatsReport, cfg: &GwCfg) -> Result<(), TransportError>;

    /// Poll the in-flight transfer.
    fn poll(&self) -> HttpPoll;

    /// Abort whatever transfer is in flight. Safe to call when idle.
    fn abort(&self);
}

/// Synchronous MQTT publisher.
pub trait MqttClient: Send + Sync {
    /// Check whether the outgoing buffer can take another message.
    fn is_buffer_available_for_publish(&self) -> bool;

    /// Publish one advertisement.
    fn publish_adv(
        &self,
        report: &AdvReport,
        use_ntp: bool,
        timestamp: i64,
    ) -> Result<(), TransportError>;

    /// Publish the gateway connect/status message.
    fn publish_connect(&self) -> Result<(), TransportError>;
}
