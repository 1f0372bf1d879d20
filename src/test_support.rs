//! Recording collaborators and task builders for unit tests.

use crate::adv_mqtt::{AdvMqttSig, AdvMqttTask};
use crate::adv_post::{AdvPostControl, AdvPostSig, AdvPostTask};
use crate::comm::HmacKeys;
use crate::context::{Collaborators, GwContext};
use crate::gw::{
    AdvReport, BleCoprocessor, GwCfg, HttpClient, HttpPoll, HttpResponse, HttpTarget, Leds,
    MacAddr, MemAdvTable, MqttClient, PlatformError, Restarter, StatsReport, TaskWatchdog,
    TransportError,
};
use crate::os::SignalBus;
use crate::settings::Timings;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One advertisement post seen by [`MockHttp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub target: HttpTarget,
    pub num_reports: usize,
    pub nonce: u32,
}

#[derive(Default)]
pub struct MockHttp {
    posts: Mutex<Vec<PostRecord>>,
    stats: Mutex<Vec<u32>>,
    polls: Mutex<VecDeque<HttpPoll>>,
    next_error: Mutex<Option<TransportError>>,
    aborts: Mutex<usize>,
}

impl MockHttp {
    /// Queue the result of the next `poll`. An empty queue completes with 200.
    pub fn push_poll(&self, poll: HttpPoll) {
        lock(&self.polls).push_back(poll);
    }

    pub fn fail_next_post(&self, err: TransportError) {
        *lock(&self.next_error) = Some(err);
    }

    pub fn posts(&self) -> Vec<PostRecord> {
        lock(&self.posts).clone()
    }

    pub fn stats_posts(&self) -> usize {
        lock(&self.stats).len()
    }

    pub fn stats_nonces(&self) -> Vec<u32> {
        lock(&self.stats).clone()
    }

    pub fn abort_count(&self) -> usize {
        *lock(&self.aborts)
    }

    fn take_error(&self) -> Result<(), TransportError> {
        match lock(&self.next_error).take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl HttpClient for MockHttp {
    fn post_advs(
        &self,
        target: HttpTarget,
        reports: &[AdvReport],
        nonce: u32,
        _use_timestamps: bool,
        _cfg: &GwCfg,
    ) -> Result<(), TransportError> {
        self.take_error()?;
        lock(&self.posts).push(PostRecord {
            target,
            num_reports: reports.len(),
            nonce,
        });
        Ok(())
    }

    fn post_stats(&self, report: &StatsReport, _cfg: &GwCfg) -> Result<(), TransportError> {
        self.take_error()?;
        lock(&self.stats).push(report.nonce);
        Ok(())
    }

    fn poll(&self) -> HttpPoll {
        lock(&self.polls)
            .pop_front()
            .unwrap_or_else(|| HttpPoll::Done(HttpResponse::ok()))
    }

    fn abort(&self) {
        *lock(&self.aborts) += 1;
    }
}

pub struct MockMqtt {
    buffer_available: Mutex<bool>,
    successes_left: Mutex<Option<usize>>,
    published: Mutex<Vec<MacAddr>>,
    timestamps: Mutex<Vec<(bool, i64)>>,
    attempts: Mutex<usize>,
    connects: Mutex<usize>,
}

impl Default for MockMqtt {
    fn default() -> Self {
        Self {
            buffer_available: Mutex::new(true),
            successes_left: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            timestamps: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            connects: Mutex::new(0),
        }
    }
}

impl MockMqtt {
    pub fn set_buffer_available(&self, available: bool) {
        *lock(&self.buffer_available) = available;
    }

    /// Let `n` more publishes succeed, then fail every one after that.
    pub fn fail_publish_after(&self, n: usize) {
        *lock(&self.successes_left) = Some(n);
    }

    /// MACs of the successful publishes, in order.
    pub fn published(&self) -> Vec<MacAddr> {
        lock(&self.published).clone()
    }

    pub fn publish_attempts(&self) -> usize {
        *lock(&self.attempts)
    }

    pub fn timestamps(&self) -> Vec<(bool, i64)> {
        lock(&self.timestamps).clone()
    }

    pub fn connect_count(&self) -> usize {
        *lock(&self.connects)
    }
}

impl MqttClient for MockMqtt {
    fn is_buffer_available_for_publish(&self) -> bool {
        *lock(&self.buffer_available)
    }

    fn publish_adv(
        &self,
        report: &AdvReport,
        use_ntp: bool,
        timestamp: i64,
    ) -> Result<(), TransportError> {
        *lock(&self.attempts) += 1;
        lock(&self.timestamps).push((use_ntp, timestamp));
        let mut left = lock(&self.successes_left);
        match left.as_mut() {
            Some(0) => return Err(TransportError::Send("publish refused".to_string())),
            Some(n) => *n -= 1,
            None => {}
        }
        lock(&self.published).push(report.mac);
        Ok(())
    }

    fn publish_connect(&self) -> Result<(), TransportError> {
        *lock(&self.connects) += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct MockLeds {
    oks: Mutex<Vec<HttpTarget>>,
    fails: Mutex<Vec<HttpTarget>>,
}

impl MockLeds {
    pub fn oks(&self) -> Vec<HttpTarget> {
        lock(&self.oks).clone()
    }

    pub fn fails(&self) -> Vec<HttpTarget> {
        lock(&self.fails).clone()
    }
}

impl Leds for MockLeds {
    fn notify_data_sent_ok(&self, target: HttpTarget) {
        lock(&self.oks).push(target);
    }

    fn notify_data_sent_fail(&self, target: HttpTarget) {
        lock(&self.fails).push(target);
    }
}

#[derive(Default)]
pub struct MockCoprocessor {
    settings: Mutex<usize>,
    led_ctrl: Mutex<Vec<u32>>,
}

impl MockCoprocessor {
    pub fn settings_sent(&self) -> usize {
        *lock(&self.settings)
    }

    pub fn led_ctrl(&self) -> Vec<u32> {
        lock(&self.led_ctrl).clone()
    }
}

impl BleCoprocessor for MockCoprocessor {
    fn send_settings(&self, _cfg: &GwCfg) {
        *lock(&self.settings) += 1;
    }

    fn send_led_ctrl(&self, on_interval_ms: u32) -> Result<(), PlatformError> {
        lock(&self.led_ctrl).push(on_interval_ms);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockWatchdog {
    registered: Mutex<Vec<&'static str>>,
    feeds: Mutex<usize>,
}

impl MockWatchdog {
    pub fn registered(&self) -> Vec<&'static str> {
        lock(&self.registered).clone()
    }

    pub fn feeds(&self) -> usize {
        *lock(&self.feeds)
    }
}

impl TaskWatchdog for MockWatchdog {
    fn register_current_thread(&self, task: &'static str) -> Result<(), PlatformError> {
        lock(&self.registered).push(task);
        Ok(())
    }

    fn feed(&self) -> Result<(), PlatformError> {
        *lock(&self.feeds) += 1;
        Ok(())
    }

    fn unregister_current_thread(&self, task: &'static str) {
        lock(&self.registered).retain(|t| *t != task);
    }
}

#[derive(Default)]
pub struct MockRestarter {
    reasons: Mutex<Vec<String>>,
}

impl MockRestarter {
    pub fn reasons(&self) -> Vec<String> {
        lock(&self.reasons).clone()
    }
}

impl Restarter for MockRestarter {
    fn gateway_restart(&self, reason: &str) {
        lock(&self.reasons).push(reason.to_string());
    }
}

/// Every collaborator of a context, kept concrete so tests can inspect them.
pub struct Mocks {
    pub adv_table: Arc<MemAdvTable>,
    pub http: Arc<MockHttp>,
    pub mqtt: Arc<MockMqtt>,
    pub leds: Arc<MockLeds>,
    pub coprocessor: Arc<MockCoprocessor>,
    pub watchdog: Arc<MockWatchdog>,
    pub restarter: Arc<MockRestarter>,
}

impl Mocks {
    pub fn new() -> Self {
        init_logging();
        Self {
            adv_table: Arc::new(MemAdvTable::default()),
            http: Arc::new(MockHttp::default()),
            mqtt: Arc::new(MockMqtt::default()),
            leds: Arc::new(MockLeds::default()),
            coprocessor: Arc::new(MockCoprocessor::default()),
            watchdog: Arc::new(MockWatchdog::default()),
            restarter: Arc::new(MockRestarter::default()),
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            adv_table: self.adv_table.clone(),
            http: self.http.clone(),
            mqtt: self.mqtt.clone(),
            leds: self.leds.clone(),
            coprocessor: self.coprocessor.clone(),
            watchdog: self.watchdog.clone(),
            restarter: self.restarter.clone(),
            hmac_keys: Arc::new(HmacKeys::new()),
        }
    }
}

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init()
        .ok();
}

/// Timings for handler tests: one-shot retries never fire on their own
/// while a test inspects the timers.
pub fn test_timings() -> Timings {
    Timings {
        do_async_comm_ms: 60_000,
        mqtt_retry_ms: 60_000,
        network_watchdog_timeout_secs: 2,
        ..Timings::default()
    }
}

pub fn context(mocks: &Mocks, cfg: GwCfg) -> GwContext {
    context_with_timings(mocks, cfg, test_timings())
}

pub fn context_with_timings(mocks: &Mocks, cfg: GwCfg, timings: Timings) -> GwContext {
    GwContext::new(timings, cfg, mocks.collaborators()).unwrap()
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// An adv_post task that is not running; tests drive its handlers directly.
pub fn adv_post_task(mocks: &Mocks, cfg: GwCfg) -> AdvPostTask {
    let ctx = context(mocks, cfg);
    let bus = SignalBus::<AdvPostSig>::with_all_signals("adv_post");
    let control = Arc::new(AdvPostControl::new(
        ctx.timings.adv_post_interval_secs * 1000,
        ctx.hmac_keys.clone(),
    ));
    AdvPostTask::new(ctx, bus, control)
}

pub fn adv_mqtt_task(mocks: &Mocks, cfg: GwCfg) -> AdvMqttTask {
    let ctx = context(mocks, cfg);
    let bus = SignalBus::<AdvMqttSig>::with_all_signals("adv_mqtt");
    AdvMqttTask::new(ctx, bus)
}

/// A report from a MAC ending in `n`.
pub fn report(n: u8) -> AdvReport {
    AdvReport {
        mac: MacAddr([0xC0, 0x00, 0x00, 0x00, 0x00, n]),
        rssi: -70,
        timestamp: 0,
        data: vec![0x02, 0x01, 0x06, n],
    }
}
