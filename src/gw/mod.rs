//! Contracts and shared state of the collaborators around the relay tasks.
//!
//! Everything here is either plain shared state (config snapshots, status
//! flags, the advertisement table) or a trait the platform implements
//! (transports, LEDs, watchdog, restart). The host binary plugs in the
//! implementations from [`crate::host`].

pub mod adv;
pub mod cfg;
pub mod network_timeout;
pub mod status;
pub mod system;
pub mod transport;

pub use adv::{AdvReport, AdvTable, MacAddr, MemAdvTable};
pub use cfg::{GwCfg, GwCfgStore, MqttTransportKind};
pub use network_timeout::NetworkTimeout;
pub use status::{unix_time, GwStatus};
pub use system::{BleCoprocessor, Leds, PlatformError, Restarter, TaskWatchdog};
pub use transport::{
    HttpClient, HttpPoll, HttpResponse, HttpTarget, MqttClient, StatsReport, TransportError,
};
