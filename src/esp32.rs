//! ESP-IDF implementations of the platform contracts.

use crate::gw::{PlatformError, Restarter, TaskWatchdog};
use esp_idf_sys::{esp, EspError};
use log::{error, info};

fn platform_error(op: &'static str) -> impl FnOnce(EspError) -> PlatformError {
    move |e| PlatformError { op, code: e.code() }
}

/// Link the ESP-IDF runtime patches and route `log` to the ESP-IDF logger.
pub fn init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
}

/// The ESP-IDF task watchdog.
#[derive(Debug, Default)]
pub struct EspTaskWatchdog;

impl TaskWatchdog for EspTaskWatchdog {
    fn register_current_thread(&self, task: &'static str) -> Result<(), PlatformError> {
        info!("TaskWatchdog: register {}", task);
        esp!(unsafe { esp_idf_sys::esp_task_wdt_add(esp_idf_sys::xTaskGetCurrentTaskHandle()) })
            .map_err(platform_error("esp_task_wdt_add"))
    }

    fn feed(&self) -> Result<(), PlatformError> {
        esp!(unsafe { esp_idf_sys::esp_task_wdt_reset() })
            .map_err(platform_error("esp_task_wdt_reset"))
    }

    fn unregister_current_thread(&self, task: &'static str) {
        let res = esp!(unsafe {
            esp_idf_sys::esp_task_wdt_delete(esp_idf_sys::xTaskGetCurrentTaskHandle())
        });
        if let Err(e) = res {
            error!("TaskWatchdog: unregister {} failed: {}", task, e);
        }
    }
}

/// Reboots the chip.
#[derive(Debug, Default)]
pub struct EspRestarter;

impl Restarter for EspRestarter {
    fn gateway_restart(&self, reason: &str) {
        error!("Restart gateway: {}", reason);
        unsafe { esp_idf_sys::esp_restart() }
    }
}
