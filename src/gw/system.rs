//! Platform collaborators: LEDs, BLE coprocessor, task watchdog, restart.

use super::cfg::GwCfg;
use super::transport::HttpTarget;
use std::fmt;

/// Error reported by a platform call (ESP-IDF error code on the device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    pub op: &'static str,
    pub code: i32,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed (err={})", self.op, self.code)
    }
}

impl std::error::Error for PlatformError {}

/// User-visible delivery indication.
pub trait Leds: Send + Sync {
    fn notify_data_sent_ok(&self, target: HttpTarget);
    fn notify_data_sent_fail(&self, target: HttpTarget);
}

/// The BLE scanning coprocessor.
pub trait BleCoprocessor: Send + Sync {
    /// Push the scan settings derived from `cfg`.
    fn send_settings(&self, cfg: &GwCfg);

    /// Drive the coprocessor's green LED; `on_interval_ms == 0` turns it off.
    fn send_led_ctrl(&self, on_interval_ms: u32) -> Result<(), PlatformError>;
}

/// OS task watchdog. Each task registers its own thread and feeds it.
pub trait TaskWatchdog: Send + Sync {
    fn register_current_thread(&self, task: &'static str) -> Result<(), PlatformError>;
    fn feed(&self) -> Result<(), PlatformError>;
    fn unregister_current_thread(&self, task: &'static str);
}

/// Fatal recovery paths.
pub trait Restarter: Send + Sync {
    /// Reboot the gateway. Does not return on the device.
    fn gateway_restart(&self, reason: &str);
}
