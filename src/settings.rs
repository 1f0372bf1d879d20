//! Runtime settings: timing policy and the initial gateway config.
//!
//! Every delay the relay tasks use lives in [`Timings`]. The defaults match
//! the firmware's long-standing behaviour; a JSON settings file may override
//! any subset of them.
//!
//! # Example
//!
//! ```
//! use ruuvi_gw_esp32::settings::Settings;
//! use std::time::Duration;
//!
//! let settings = Settings::from_json_str(r#"{ "timings": { "do_async_comm_ms": 50 } }"#).unwrap();
//! assert_eq!(settings.timings.do_async_comm(), Duration::from_millis(50));
//! assert_eq!(settings.timings.stats_interval(), Duration::from_secs(3600));
//! ```

use crate::gw::cfg::GwCfg;
use crate::stats_server::DEFAULT_STATS_PORT;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Errors from loading or validating settings.
#[derive(Debug)]
pub enum SettingsError {
    /// A value is out of its valid range.
    InvalidConfig(&'static str),
    /// The settings file is not valid JSON for [`Settings`].
    Json(serde_json::Error),
    /// The settings file could not be read.
    Io(std::io::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid settings: {}", msg),
            Self::Json(e) => write!(f, "settings parse error: {}", e),
            Self::Io(e) => write!(f, "settings read error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Timing policy of the relay tasks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Default HTTP advertisement sending interval.
    pub adv_post_interval_secs: u32,
    /// Retry period after a failed HTTP post.
    pub retry_after_error_ms: u32,
    /// HTTP statistics interval.
    pub stats_interval_secs: u32,
    /// Delay of the first statistics report after boot or time sync.
    pub stats_initial_delay_secs: u32,
    /// Poll period of an in-flight transfer (DO_ASYNC_COMM one-shot).
    pub do_async_comm_ms: u32,
    pub network_watchdog_period_secs: u32,
    /// Silence after which the network watchdog reboots the gateway.
    pub network_watchdog_timeout_secs: u32,
    pub task_watchdog_feed_ms: u32,
    pub green_led_update_ms: u32,
    /// Green LED on-interval sent to the BLE coprocessor.
    pub green_led_on_interval_ms: u32,
    /// Silence after which RECV_ADV_TIMEOUT is raised.
    pub recv_adv_timeout_secs: u32,
    /// Retry delay when the MQTT publish buffer is full.
    pub mqtt_retry_ms: u32,
    /// Upper bound of one signal-bus wait.
    pub bus_wait_ms: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            adv_post_interval_secs: 10,
            retry_after_error_ms: 67_000,
            stats_interval_secs: 3600,
            stats_initial_delay_secs: 60,
            do_async_comm_ms: 100,
            network_watchdog_period_secs: 1,
            network_watchdog_timeout_secs: 3600,
            task_watchdog_feed_ms: 1000,
            green_led_update_ms: 1000,
            green_led_on_interval_ms: 1500,
            recv_adv_timeout_secs: 10,
            mqtt_retry_ms: 50,
            bus_wait_ms: 1000,
        }
    }
}

impl Timings {
    /// Check that every period can be used by a timer.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.adv_post_interval_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "adv_post_interval_secs must be > 0",
            ));
        }
        if self.retry_after_error_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "retry_after_error_ms must be > 0",
            ));
        }
        if self.stats_interval_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "stats_interval_secs must be > 0",
            ));
        }
        if self.stats_initial_delay_secs > self.stats_interval_secs {
            return Err(SettingsError::InvalidConfig(
                "stats_initial_delay_secs must not exceed stats_interval_secs",
            ));
        }
        if self.do_async_comm_ms == 0 {
            return Err(SettingsError::InvalidConfig("do_async_comm_ms must be > 0"));
        }
        if self.network_watchdog_period_secs == 0 || self.network_watchdog_timeout_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "network watchdog period and timeout must be > 0",
            ));
        }
        if self.task_watchdog_feed_ms == 0 || self.green_led_update_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "watchdog feed and green LED update periods must be > 0",
            ));
        }
        if self.recv_adv_timeout_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "recv_adv_timeout_secs must be > 0",
            ));
        }
        if self.mqtt_retry_ms == 0 {
            return Err(SettingsError::InvalidConfig("mqtt_retry_ms must be > 0"));
        }
        if self.bus_wait_ms == 0 {
            return Err(SettingsError::InvalidConfig("bus_wait_ms must be > 0"));
        }
        Ok(())
    }

    pub fn adv_post_interval(&self) -> Duration {
        Duration::from_secs(self.adv_post_interval_secs.into())
    }

    pub fn retry_after_error(&self) -> Duration {
        Duration::from_millis(self.retry_after_error_ms.into())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.into())
    }

    pub fn stats_initial_delay(&self) -> Duration {
        Duration::from_secs(self.stats_initial_delay_secs.into())
    }

    pub fn do_async_comm(&self) -> Duration {
        Duration::from_millis(self.do_async_comm_ms.into())
    }

    pub fn network_watchdog_period(&self) -> Duration {
        Duration::from_secs(self.network_watchdog_period_secs.into())
    }

    pub fn network_watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.network_watchdog_timeout_secs.into())
    }

    pub fn task_watchdog_feed(&self) -> Duration {
        Duration::from_millis(self.task_watchdog_feed_ms.into())
    }

    pub fn green_led_update(&self) -> Duration {
        Duration::from_millis(self.green_led_update_ms.into())
    }

    pub fn recv_adv_timeout(&self) -> Duration {
        Duration::from_secs(self.recv_adv_timeout_secs.into())
    }

    pub fn mqtt_retry(&self) -> Duration {
        Duration::from_millis(self.mqtt_retry_ms.into())
    }

    pub fn bus_wait(&self) -> Duration {
        Duration::from_millis(self.bus_wait_ms.into())
    }
}

/// Everything the host binary reads from its settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timings: Timings,
    pub gw_cfg: GwCfg,
    pub stats_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            gw_cfg: GwCfg::default(),
            stats_port: DEFAULT_STATS_PORT,
        }
    }
}

impl Settings {
    /// Parse and validate settings from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.timings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Timings Tests ====================

    #[test]
    fn test_default_timings() {
        let t = Timings::default();
        assert!(t.validate().is_ok());
        assert_eq!(t.adv_post_interval(), Duration::from_secs(10));
        assert_eq!(t.retry_after_error(), Duration::from_secs(67));
        assert_eq!(t.stats_interval(), Duration::from_secs(3600));
        assert_eq!(t.stats_initial_delay(), Duration::from_secs(60));
        assert_eq!(t.do_async_comm(), Duration::from_millis(100));
        assert_eq!(t.network_watchdog_period(), Duration::from_secs(1));
        assert_eq!(t.network_watchdog_timeout(), Duration::from_secs(3600));
        assert_eq!(t.task_watchdog_feed(), Duration::from_millis(1000));
        assert_eq!(t.green_led_update(), Duration::from_millis(1000));
        assert_eq!(t.green_led_on_interval_ms, 1500);
        assert_eq!(t.recv_adv_timeout(), Duration::from_secs(10));
        assert_eq!(t.mqtt_retry(), Duration::from_millis(50));
        assert_eq!(t.bus_wait(), Duration::from_millis(1000));
    }

    #[test]
    fn test_validate_rejects_zero_periods() {
        let mut t = Timings::default();
        t.do_async_comm_ms = 0;
        assert!(matches!(t.validate(), Err(SettingsError::InvalidConfig(_))));

        let mut t = Timings::default();
        t.stats_initial_delay_secs = 4000;
        assert!(t.validate().is_err());

        let mut t = Timings::default();
        t.bus_wait_ms = 0;
        assert!(t.validate().is_err());
    }

    // ==================== Settings Tests ====================

    #[test]
    fn test_partial_settings_file() {
        let s = Settings::from_json_str(
            r#"{ "stats_port": 9000, "timings": { "mqtt_retry_ms": 20 }, "gw_cfg": { "ntp_use": false } }"#,
        )
        .unwrap();
        assert_eq!(s.stats_port, 9000);
        assert_eq!(s.timings.mqtt_retry_ms, 20);
        assert_eq!(s.timings.adv_post_interval_secs, 10);
        assert!(!s.gw_cfg.ntp_use);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(matches!(
            Settings::from_json_str("{ not json"),
            Err(SettingsError::Json(_))
        ));
        assert!(matches!(
            Settings::from_json_str(r#"{ "timings": { "bus_wait_ms": 0 } }"#),
            Err(SettingsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/ruuvi-gw.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Io(_)));
    }
}
