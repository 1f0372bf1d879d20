//! Green LED mirroring on the BLE coprocessor.
//!
//! The coprocessor's LED blinks for `green_led_on_interval_ms` after each
//! command and goes dark on its own, so the task re-sends the current state
//! periodically.

use super::task::AdvPostTask;
use log::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreenLedCmd {
    On,
    Off,
    /// Periodic refresh of the last state.
    Update,
}

#[derive(Debug, Default)]
pub(crate) struct GreenLed {
    pub(crate) on: bool,
}

impl AdvPostTask {
    pub(crate) fn on_green_led_update(&mut self, cmd: GreenLedCmd) {
        match cmd {
            GreenLedCmd::On => self.green_led.on = true,
            GreenLedCmd::Off => self.green_led.on = false,
            GreenLedCmd::Update => {}
        }
        if !self.timers.green_led_update.is_active() {
            self.timers.green_led_update.start();
        }
        let interval_ms = if self.green_led.on {
            self.ctx.timings.green_led_on_interval_ms
        } else {
            0
        };
        debug!("green LED: {:?}, on_interval={} ms", cmd, interval_ms);
        if let Err(e) = self.ctx.coprocessor.send_led_ctrl(interval_ms) {
            error!("{}", e);
        }
    }
}
