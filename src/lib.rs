//! Ruuvi Gateway ESP32 orchestration library.
//!
//! The relay core of the gateway: a signal bus and event manager, software
//! timers, config caches, the adv_post and adv_mqtt relay tasks and the
//! single-flight HTTP/MQTT comm engine. Everything except `esp32` is
//! platform-independent and can be tested on the host.

pub mod adv_mqtt;
pub mod adv_post;
pub mod cfg_cache;
pub mod comm;
pub mod context;
#[cfg(feature = "esp32")]
pub mod esp32;
pub mod event_mgr;
pub mod gw;
pub mod host;
pub mod os;
pub mod settings;
pub mod stats_server;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used items
pub use adv_mqtt::{AdvMqtt, AdvMqttSig};
pub use adv_post::{AdvIntake, AdvPost, AdvPostAction, AdvPostControl, AdvPostSig};
pub use context::{Collaborators, ContextError, GwContext, TaskError};
pub use event_mgr::{Event, EventManager, SubscriptionId};
pub use gw::{AdvReport, GwCfg, MacAddr};
pub use settings::{Settings, SettingsError, Timings};
pub use stats_server::{RelayStats, StatsServer, DEFAULT_STATS_PORT};
