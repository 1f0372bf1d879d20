//! adv_post task state and main loop.

use super::async_comm::{AdvPostControl, AsyncComm};
use super::events::AdvPostEvents;
use super::green_led::GreenLed;
use super::signals::AdvPostSig;
use super::timers::AdvPostTimers;
use crate::context::GwContext;
use crate::os::{SignalBus, SignalError, SignalEvents};
use log::{error, info};
use std::sync::mpsc;
use std::sync::Arc;

pub(crate) const TASK_NAME: &str = "adv_post";

/// Flags owned by the task thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvPostState {
    pub primary_time_sync_is_done: bool,
    pub network_connected: bool,
    pub async_comm_in_progress: bool,
    pub need_to_send_advs1: bool,
    pub need_to_send_advs2: bool,
    pub need_to_send_statistics: bool,
    pub need_to_send_mqtt_periodic: bool,
    pub relaying_enabled: bool,
    pub use_timestamps: bool,
    pub stop: bool,
}

impl Default for AdvPostState {
    fn default() -> Self {
        Self {
            primary_time_sync_is_done: false,
            network_connected: false,
            async_comm_in_progress: false,
            need_to_send_advs1: false,
            need_to_send_advs2: false,
            need_to_send_statistics: false,
            need_to_send_mqtt_periodic: false,
            relaying_enabled: true,
            use_timestamps: false,
            stop: false,
        }
    }
}

/// Everything the adv_post thread owns.
pub struct AdvPostTask {
    pub(crate) ctx: GwContext,
    pub(crate) bus: Arc<SignalBus<AdvPostSig>>,
    pub(crate) timers: AdvPostTimers,
    pub(crate) state: AdvPostState,
    pub(crate) comm: AsyncComm,
    pub(crate) green_led: GreenLed,
    pub(crate) control: Arc<AdvPostControl>,
}

impl AdvPostTask {
    /// Create the task with all timers stopped.
    pub fn new(
        ctx: GwContext,
        bus: Arc<SignalBus<AdvPostSig>>,
        control: Arc<AdvPostControl>,
    ) -> Self {
        let timers = AdvPostTimers::new(&ctx.timers, &bus, ctx.timings.clone(), control.clone());
        Self {
            ctx,
            bus,
            timers,
            state: AdvPostState::default(),
            comm: AsyncComm::new(),
            green_led: GreenLed::default(),
            control,
        }
    }

    pub fn state(&self) -> &AdvPostState {
        &self.state
    }

    /// Handle one drained batch in ascending signal order. Signals after
    /// STOP are dropped. Returns true once the task must stop.
    pub(crate) fn run_cycle(&mut self, events: SignalEvents<AdvPostSig>) -> bool {
        for sig in events {
            if self.handle_sig(sig) {
                return true;
            }
        }
        false
    }

    /// Task body. `ready` receives the registration outcome before the
    /// loop starts.
    pub(crate) fn run(mut self, ready: mpsc::Sender<Result<(), SignalError>>) {
        let subs = AdvPostEvents::subscribe(&self.ctx.events, &self.bus);

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
        self.timers.network_watchdog.start();
        self.timers.recv_adv_timeout.start();

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
        self.abort_async_comm();
        rx.unregister();
    }
}
