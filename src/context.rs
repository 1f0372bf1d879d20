//! Process-wide gateway context.
//!
//! Holds every shared resource the relay tasks use: the event manager, the
//! timer service, config and status providers, the collaborators and the
//! single-flight comm resources. Tasks receive a clone at start; cloning
//! only bumps reference counts.

use crate::adv_mqtt::cfg_cache::AdvMqttCfg;
use crate::adv_post::cfg_cache::AdvPostCfg;
use crate::cfg_cache::CfgCache;
use crate::comm::{AsyncSession, HmacKeys, HttpServerMutex};
use crate::event_mgr::EventManager;
use crate::gw::{
    AdvTable, BleCoprocessor, GwCfg, GwCfgStore, GwStatus, HttpClient, Leds, MqttClient,
    NetworkTimeout, Restarter, TaskWatchdog,
};
use crate::os::{SignalError, TimerService};
use crate::settings::{SettingsError, Timings};
use crate::stats_server::RelayStats;
use log::info;
use std::fmt;
use std::sync::Arc;

/// Errors creating the context.
#[derive(Debug)]
pub enum ContextError {
    Settings(SettingsError),
    /// The timer service thread could not be spawned.
    TimerService(std::io::Error),
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settings(e) => write!(f, "{}", e),
            Self::TimerService(e) => write!(f, "can't start timer service: {}", e),
        }
    }
}

impl std::error::Error for ContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Settings(e) => Some(e),
            Self::TimerService(e) => Some(e),
        }
    }
}

impl From<SettingsError> for ContextError {
    fn from(e: SettingsError) -> Self {
        Self::Settings(e)
    }
}

/// Errors starting a relay task.
#[derive(Debug)]
pub enum TaskError {
    /// The task thread could not be spawned.
    Spawn(std::io::Error),
    /// The task could not register on its signal bus.
    Register(SignalError),
    /// The task thread exited before reporting readiness.
    Exited(&'static str),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "can't spawn task thread: {}", e),
            Self::Register(e) => write!(f, "{}", e),
            Self::Exited(task) => write!(f, "task '{}' exited during start-up", task),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            Self::Register(e) => Some(e),
            Self::Exited(_) => None,
        }
    }
}

/// Platform implementations plugged into the context.
pub struct Collaborators {
    pub adv_table: Arc<dyn AdvTable>,
    pub http: Arc<dyn HttpClient>,
    pub mqtt: Arc<dyn MqttClient>,
    pub leds: Arc<dyn Leds>,
    pub coprocessor: Arc<dyn BleCoprocessor>,
    pub watchdog: Arc<dyn TaskWatchdog>,
    pub restarter: Arc<dyn Restarter>,
    /// Key store shared with the HTTP client that signs the payloads.
    pub hmac_keys: Arc<HmacKeys>,
}

/// Shared state of the gateway core.
#[derive(Clone)]
pub struct GwContext {
    pub timings: Arc<Timings>,
    pub cfg: Arc<GwCfgStore>,
    pub status: Arc<GwStatus>,
    pub events: Arc<EventManager>,
    pub timers: Arc<TimerService>,
    pub adv_table: Arc<dyn AdvTable>,
    pub http: Arc<dyn HttpClient>,
    pub mqtt: Arc<dyn MqttClient>,
    pub leds: Arc<dyn Leds>,
    pub coprocessor: Arc<dyn BleCoprocessor>,
    pub watchdog: Arc<dyn TaskWatchdog>,
    pub restarter: Arc<dyn Restarter>,
    pub session: Arc<AsyncSession>,
    pub http_server_mutex: Arc<HttpServerMutex>,
    pub hmac_keys: Arc<HmacKeys>,
    pub network_timeout: Arc<NetworkTimeout>,
    pub stats: Arc<RelayStats>,
    pub adv_post_cfg: Arc<CfgCache<AdvPostCfg>>,
    pub adv_mqtt_cfg: Arc<CfgCache<AdvMqttCfg>>,
}

impl GwContext {
    /// Validate `timings`, start the timer service and wire everything up.
    pub fn new(
        timings: Timings,
        gw_cfg: GwCfg,
        collab: Collaborators,
    ) -> Result<Self, ContextError> {
        timings.validate()?;
        let timers = TimerService::start("gw").map_err(ContextError::TimerService)?;
        info!("Gateway context created");
        Ok(Self {
            timings: Arc::new(timings),
            cfg: Arc::new(GwCfgStore::new(gw_cfg)),
            status: Arc::new(GwStatus::new()),
            events: Arc::new(EventManager::new()),
            timers: Arc::new(timers),
            adv_table: collab.adv_table,
            http: collab.http,
            mqtt: collab.mqtt,
            leds: collab.leds,
            coprocessor: collab.coprocessor,
            watchdog: collab.watchdog,
            restarter: collab.restarter,
            session: AsyncSession::new(),
            http_server_mutex: Arc::new(HttpServerMutex::new()),
            hmac_keys: collab.hmac_keys,
            network_timeout: Arc::new(NetworkTimeout::new()),
            stats: Arc::new(RelayStats::new()),
            adv_post_cfg: Arc::new(CfgCache::new("adv_post")),
            adv_mqtt_cfg: Arc::new(CfgCache::new("adv_mqtt")),
        })
    }
}
