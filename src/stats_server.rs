//! Relay counters and the `/stats` HTTP endpoint.
//!
//! Uses `tiny_http`, which runs on both the host and ESP32 (via std::net).
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "advs": { "received": 1520, "filtered": 12 },
//!   "http": {
//!     "ruuvi": { "started": 360, "failed": 2 },
//!     "custom": { "started": 0, "failed": 0 },
//!     "stats": { "started": 1, "failed": 0 }
//!   },
//!   "mqtt": { "published": 1400, "failed": 3 },
//!   "session_busy": 4
//! }
//! ```

use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Started/failed counters of one HTTP target.
#[derive(Debug, Default)]
pub struct TargetStats {
    pub started: AtomicU64,
    pub failed: AtomicU64,
}

impl TargetStats {
    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn to_json(&self) -> String {
        format!(
            r#"{{"started":{},"failed":{}}}"#,
            self.started.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed)
        )
    }
}

/// Relay statistics shared by the tasks and the intake path.
///
/// All fields are atomics; no locking.
#[derive(Debug)]
pub struct RelayStats {
    start_time: Instant,
    /// Reports accepted by the scan filter since boot. Also used as the
    /// MQTT timestamp when NTP is off.
    advs_received: AtomicU64,
    /// Reports accepted since the last task-watchdog feed.
    advs_cnt: AtomicU64,
    advs_filtered: AtomicU64,
    pub http_ruuvi: TargetStats,
    pub http_custom: TargetStats,
    pub http_stats: TargetStats,
    mqtt_published: AtomicU64,
    mqtt_failed: AtomicU64,
    session_busy: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            advs_received: AtomicU64::new(0),
            advs_cnt: AtomicU64::new(0),
            advs_filtered: AtomicU64::new(0),
            http_ruuvi: TargetStats::default(),
            http_custom: TargetStats::default(),
            http_stats: TargetStats::default(),
            mqtt_published: AtomicU64::new(0),
            mqtt_failed: AtomicU64::new(0),
            session_busy: AtomicU64::new(0),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_adv_received(&self) {
        self.advs_received.fetch_add(1, Ordering::Relaxed);
        self.advs_cnt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_adv_filtered(&self) {
        self.advs_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn advs_received(&self) -> u64 {
        self.advs_received.load(Ordering::Relaxed)
    }

    pub fn advs_filtered(&self) -> u64 {
        self.advs_filtered.load(Ordering::Relaxed)
    }

    /// Reports accepted since the previous call.
    pub fn advs_cnt_get_and_clear(&self) -> u64 {
        self.advs_cnt.swap(0, Ordering::Relaxed)
    }

    pub fn record_mqtt_published(&self) {
        self.mqtt_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mqtt_failed(&self) {
        self.mqtt_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_published(&self) -> u64 {
        self.mqtt_published.load(Ordering::Relaxed)
    }

    pub fn mqtt_failed(&self) -> u64 {
        self.mqtt_failed.load(Ordering::Relaxed)
    }

    pub fn record_session_busy(&self) {
        self.session_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_busy(&self) -> u64 {
        self.session_busy.load(Ordering::Relaxed)
    }

    /// Serialize all counters to JSON.
    pub fn to_json(&self) -> String {
        format!(
            r#"{{"uptime_secs":{},"advs":{{"received":{},"filtered":{}}},"http":{{"ruuvi":{},"custom":{},"stats":{}}},"mqtt":{{"published":{},"failed":{}}},"session_busy":{}}}"#,
            self.uptime_secs(),
            self.advs_received(),
            self.advs_filtered(),
            self.http_ruuvi.to_json(),
            self.http_custom.to_json(),
            self.http_stats.to_json(),
            self.mqtt_published(),
            self.mqtt_failed(),
            self.session_busy()
        )
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP stats server.
///
/// Runs in a background thread and serves relay statistics as JSON.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatsServer {
    /// Start the stats server on `bind_addr:port` (`None` binds 0.0.0.0).
    ///
    /// Drop the returned handle to stop the server.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<RelayStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("stats-server".to_string())
            .spawn(move || Self::run_server(server, stats, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn run_server(server: Server, stats: Arc<RelayStats>, shutdown: Arc<AtomicBool>) {
        let headers = (
            Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]),
            Header::from_bytes(&b"Location"[..], &b"/stats"[..]),
            Header::from_bytes(&b"Allow"[..], &b"GET"[..]),
        );
        let (content_type, location, allow_get) = match headers {
            (Ok(c), Ok(l), Ok(a)) => (c, l, a),
            _ => {
                error!("Stats server: invalid static headers");
                return;
            }
        };

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Stats server error: {}", e);
                    break;
                }
            };

            let response = if request.method() != &Method::Get {
                Response::from_string("Method Not Allowed")
                    .with_status_code(405)
                    .with_header(allow_get.clone())
            } else {
                match request.url() {
                    "/stats" | "/stats/" => Response::from_string(stats.to_json())
                        .with_header(content_type.clone())
                        .with_status_code(200),
                    "/" => Response::from_string("See /stats for relay statistics")
                        .with_status_code(302)
                        .with_header(location.clone()),
                    _ => Response::from_string("Not Found").with_status_code(404),
                }
            };

            if let Err(e) = request.respond(response) {
                warn!("Failed to send response: {}", e);
            }
        }
    }

    /// Stop the server. May take up to 100ms due to the polling interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    // ==================== RelayStats Tests ====================

    #[test]
    fn test_advs_cnt_get_and_clear() {
        let stats = RelayStats::new();
        stats.record_adv_received();
        stats.record_adv_received();
        assert_eq!(stats.advs_cnt_get_and_clear(), 2);
        assert_eq!(stats.advs_cnt_get_and_clear(), 0);
        assert_eq!(stats.advs_received(), 2);
    }

    #[test]
    fn test_relay_stats_json() {
        let stats = RelayStats::new();
        stats.record_adv_filtered();
        stats.http_ruuvi.record_started();
        stats.http_ruuvi.record_failed();
        stats.record_mqtt_published();
        stats.record_session_busy();

        let json = stats.to_json();
        assert!(json.contains(r#""advs":{"received":0,"filtered":1}"#));
        assert!(json.contains(r#""ruuvi":{"started":1,"failed":1}"#));
        assert!(json.contains(r#""mqtt":{"published":1,"failed":0}"#));
        assert!(json.contains(r#""session_busy":1"#));
        assert!(serde_json::from_str::<serde_json::Value>(&json).is_ok());
    }

    // ==================== StatsServer Tests ====================

    fn http_get(port: u16, method: &str, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(
            stream,
            "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            method, path
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_server_routes() {
        let stats = Arc::new(RelayStats::new());
        let port = 38471;
        let mut server =
            StatsServer::start(Some("127.0.0.1".parse().unwrap()), port, stats.clone()).unwrap();

        let ok = http_get(port, "GET", "/stats");
        assert!(ok.starts_with("HTTP/1.1 200"));
        assert!(ok.contains("\"uptime_secs\":"));

        assert!(http_get(port, "GET", "/").starts_with("HTTP/1.1 302"));
        assert!(http_get(port, "GET", "/nope").starts_with("HTTP/1.1 404"));
        assert!(http_get(port, "POST", "/stats").starts_with("HTTP/1.1 405"));

        server.stop();
    }
}
