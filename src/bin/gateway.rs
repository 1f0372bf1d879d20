//! Ruuvi Gateway relay core running with simulated collaborators.
//!
//! Starts both relay tasks, feeds them synthetic advertisements and serves
//! relay statistics at http://localhost:8080/stats.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin gateway -- [settings.json]
//! ```

use log::{error, info, warn};
use ruuvi_gw_esp32::comm::HmacKeys;
use ruuvi_gw_esp32::gw::{AdvReport, MacAddr, MemAdvTable, Restarter, TaskWatchdog};
use ruuvi_gw_esp32::host::{LogCoprocessor, LogLeds, SimHttpClient, SimMqttClient};
use ruuvi_gw_esp32::{
    AdvIntake, AdvMqtt, AdvPost, Collaborators, Event, GwContext, Settings, StatsServer,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Simulated request latency of the HTTP transport.
const HTTP_LATENCY: Duration = Duration::from_millis(300);

/// Interval between synthetic advertisements.
const ADV_INTERVAL: Duration = Duration::from_millis(250);

/// Number of distinct simulated tags.
const NUM_TAGS: u8 = 5;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    ruuvi_gw_esp32::esp32::init();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(feature = "esp32")]
fn platform_services() -> (Arc<dyn TaskWatchdog>, Arc<dyn Restarter>, RestartProbe) {
    use ruuvi_gw_esp32::esp32::{EspRestarter, EspTaskWatchdog};
    (
        Arc::new(EspTaskWatchdog),
        Arc::new(EspRestarter),
        RestartProbe::default(),
    )
}

#[cfg(not(feature = "esp32"))]
fn platform_services() -> (Arc<dyn TaskWatchdog>, Arc<dyn Restarter>, RestartProbe) {
    use ruuvi_gw_esp32::host::{HostRestarter, SoftWatchdog};
    let restarter = Arc::new(HostRestarter::new());
    (
        Arc::new(SoftWatchdog::new()),
        restarter.clone(),
        RestartProbe(Some(restarter)),
    )
}

/// Lets the host main loop notice a restart request.
#[derive(Default)]
struct RestartProbe(Option<Arc<ruuvi_gw_esp32::host::HostRestarter>>);

impl RestartProbe {
    fn reason(&self) -> Option<String> {
        self.0
            .as_ref()
            .filter(|r| r.is_restart_requested())
            .map(|r| r.reason().unwrap_or_default())
    }
}

fn load_settings() -> Settings {
    match std::env::args().nth(1) {
        Some(path) => match Settings::load(Path::new(&path)) {
            Ok(settings) => {
                info!("Settings loaded from {}", path);
                settings
            }
            Err(e) => {
                error!("Failed to load settings from {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => {
            info!("No settings file given, using defaults");
            Settings::default()
        }
    }
}

fn synthetic_adv(seq: u32) -> AdvReport {
    let tag = (seq % u32::from(NUM_TAGS)) as u8;
    let [b0, b1, b2, b3] = seq.to_be_bytes();
    AdvReport {
        mac: MacAddr([0xC0, 0xFF, 0xEE, 0x00, 0x00, tag]),
        rssi: -50 - tag as i8 * 5,
        timestamp: 0,
        data: vec![0x02, 0x01, 0x06, 0x05, 0xFF, 0x99, 0x04, b0, b1, b2, b3],
    }
}

#[cfg(not(feature = "esp32"))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(feature = "esp32")]
async fn shutdown_signal() {
    std::future::pending::<()>().await;
}

async fn run_scanner(intake: AdvIntake, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ADV_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut seq = 0u32;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Scanner shutting down");
                break;
            }
            _ = ticker.tick() => {
                intake.on_recv_adv(synthetic_adv(seq));
                seq = seq.wrapping_add(1);
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== Ruuvi Gateway starting ===");

    let settings = load_settings();
    let (watchdog, restarter, restart_probe) = platform_services();

    let hmac_keys = Arc::new(HmacKeys::new());
    let collab = Collaborators {
        adv_table: Arc::new(MemAdvTable::default()),
        http: Arc::new(SimHttpClient::new(HTTP_LATENCY, hmac_keys.clone())),
        mqtt: Arc::new(SimMqttClient::new()),
        leds: Arc::new(LogLeds),
        coprocessor: Arc::new(LogCoprocessor),
        watchdog,
        restarter,
        hmac_keys,
    };
    let ctx = match GwContext::new(settings.timings.clone(), settings.gw_cfg.clone(), collab) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to create gateway context: {}", e);
            std::process::exit(1);
        }
    };

    let _stats_server = match StatsServer::start(None, settings.stats_port, ctx.stats.clone()) {
        Ok(server) => {
            info!(
                "Stats server at http://localhost:{}/stats",
                settings.stats_port
            );
            Some(server)
        }
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            None
        }
    };

    let adv_post = match AdvPost::start(ctx.clone()) {
        Ok(task) => task,
        Err(e) => {
            error!("Failed to start adv_post: {}", e);
            std::process::exit(1);
        }
    };
    let adv_mqtt = match AdvMqtt::start(ctx.clone()) {
        Ok(task) => task,
        Err(e) => {
            error!("Failed to start adv_mqtt: {}", e);
            std::process::exit(1);
        }
    };

    // Bring-up sequence of a connected gateway
    ctx.events.notify(Event::GwCfgReady);
    ctx.events.notify(Event::WifiConnected);
    ctx.status.set_time_synchronized(true);
    ctx.events.notify(Event::TimeSynchronized);
    if settings.gw_cfg.mqtt.use_mqtt {
        ctx.status.set_mqtt_connected(true);
        ctx.events.notify(Event::MqttConnected);
    }

    let cancel = CancellationToken::new();
    let scanner = tokio::spawn(run_scanner(adv_post.intake(), cancel.clone()));

    info!("Entering main loop (Ctrl+C to exit)...");
    let mut restart_check = tokio::time::interval(Duration::from_secs(1));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            _ = restart_check.tick() => {
                if let Some(reason) = restart_probe.reason() {
                    warn!("Restart requested ({}), exiting", reason);
                    break;
                }
            }
        }
    }

    cancel.cancel();
    if let Err(e) = scanner.await {
        error!("Scanner task error: {}", e);
    }
    drop(adv_mqtt);
    drop(adv_post);
    info!("Shutdown complete");
}
