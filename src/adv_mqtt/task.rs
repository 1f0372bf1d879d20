//! adv_mqtt task state and main loop.

use super::events::AdvMqttEvents;
use super::signals::AdvMqttSig;
use super::timers::AdvMqttTimers;
use crate::context::GwContext;
use crate::os::{SignalBus, SignalError, SignalEvents};
use log::{error, info};
use std::sync::mpsc;
use std::sync::Arc;

pub(crate) const TASK_NAME: &str = "adv_mqtt";

/// Everything the adv_mqtt thread owns.
pub struct AdvMqttTask {
    pub(crate) ctx: GwContext,
    pub(crate) bus: Arc<SignalBus<AdvMqttSig>>,
    pub(crate) timers: AdvMqttTimers,
    pub(crate) stop: bool,
}

impl AdvMqttTask {
    pub fn new(ctx: GwContext, bus: Arc<SignalBus<AdvMqttSig>>) -> Self {
        let timers = AdvMqttTimers::new(&ctx.timers, &bus, &ctx.timings);
        Self {
            ctx,
            bus,
            timers,
            stop: false,
        }
    }

    pub(crate) fn run_cycle(&mut self, events: SignalEvents<AdvMqttSig>) -> bool {
        for sig in events {
            if self.handle_sig(sig) {
                return true;
            }
        }
        false
    }

    pub(crate) fn run(mut self, ready: mpsc::Sender<Result<(), SignalError>>) {
        let subs = AdvMqttEvents::subscribe(&self.ctx.events, &self.bus);

        let bus = self.bus.clone();
        let rx = match bus.register_current_thread() {
            Ok(rx) => rx,
            Err(e) => {
                error!("register_current_thread failed: {}", e);
                self.timers.delete();
                subs.unsubscribe(&self.ctx.events);
                let _ = ready.send(Err(e));
                return;
            }
        };

        info!("{} started", TASK_NAME);
        info!("TaskWatchdog: Register current thread");
        if let Err(e) = self.ctx.watchdog.register_current_thread(TASK_NAME) {
            error!("{}", e);
        }
        info!("TaskWatchdog: Start timer");
        self.timers.watchdog_feed.start();

        let _ = ready.send(Ok(()));

        let wait = self.ctx.timings.bus_wait();
        loop {
            let events = rx.wait_with_timeout(wait);
            if self.run_cycle(events) {
                break;
            }
        }
        info!("Stop task {}", TASK_NAME);

        info!("TaskWatchdog: Unregister current thread");
        self.ctx.watchdog.unregister_current_thread(TASK_NAME);

        self.timers.delete();
        subs.unsubscribe(&self.ctx.events);
        rx.unregister();
    }
}
