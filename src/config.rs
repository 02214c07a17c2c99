use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Application-level constants
pub const APP_NAME: &str = "CareQueue";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Appointment list refresh interval.
pub const APPOINTMENT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Per-appointment live queue refresh interval.
pub const LIVE_QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Countdown tick for break / delay / emergency banners.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Header carrying the session token on every REST call.
pub const DEFAULT_AUTH_HEADER: &str = "x-auth-token";

const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000/ws";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "carequeue_lib=info,carequeue=info"
}

/// Get the application data directory
/// ~/CareQueue/ on all platforms. Falls back to the working directory
/// when no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the local storage directory (token, cached banners, reminders)
pub fn storage_dir() -> PathBuf {
    app_data_dir().join("storage")
}

/// Backoff the push connection follows after a drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconnectionPolicy {
    /// Initial delay before first reconnection attempt (ms).
    pub initial_delay_ms: u32,
    /// Maximum delay cap (ms).
    pub max_delay_ms: u32,
    /// Maximum number of consecutive failed attempts before giving up.
    pub max_retries: u32,
    /// Maximum random jitter added to each delay (ms).
    pub jitter_ms: u32,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries: 10,
            jitter_ms: 500,
        }
    }
}

impl ReconnectionPolicy {
    /// Delay before attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = u64::from(self.initial_delay_ms).saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(u64::from(self.max_delay_ms)))
    }
}

/// Everything a session needs to reach the backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, without trailing slash.
    pub api_base_url: String,
    /// Push channel WebSocket URL.
    pub socket_url: String,
    /// Header name for the session token.
    pub auth_header: String,
    /// Directory standing in for browser local storage.
    pub storage_dir: PathBuf,
    pub appointment_poll_interval: Duration,
    pub live_queue_poll_interval: Duration,
    pub request_timeout: Duration,
    pub reconnect: ReconnectionPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            storage_dir: storage_dir(),
            appointment_poll_interval: APPOINTMENT_POLL_INTERVAL,
            live_queue_poll_interval: LIVE_QUEUE_POLL_INTERVAL,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            reconnect: ReconnectionPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Build from `CAREQUEUE_*` environment variables, defaults elsewhere.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("CAREQUEUE_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = lookup("CAREQUEUE_SOCKET_URL") {
            config.socket_url = url;
        }
        if let Some(header) = lookup("CAREQUEUE_AUTH_HEADER") {
            config.auth_header = header;
        }
        if let Some(dir) = lookup("CAREQUEUE_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("CAREQUEUE_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn storage_dir_under_app_data() {
        let storage = storage_dir();
        assert!(storage.starts_with(app_data_dir()));
        assert!(storage.ends_with("storage"));
    }

    #[test]
    fn poll_intervals() {
        assert_eq!(APPOINTMENT_POLL_INTERVAL, Duration::from_secs(30));
        assert_eq!(LIVE_QUEUE_POLL_INTERVAL, Duration::from_secs(15));
        assert_eq!(COUNTDOWN_TICK, Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CAREQUEUE_API_URL", "https://clinic.example/api/"),
            ("CAREQUEUE_AUTH_HEADER", "authorization"),
            ("CAREQUEUE_STORAGE_DIR", "/tmp/cq"),
            ("CAREQUEUE_REQUEST_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_base_url, "https://clinic.example/api");
        assert_eq!(config.socket_url, DEFAULT_SOCKET_URL);
        assert_eq!(config.auth_header, "authorization");
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/cq"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn unparsable_timeout_keeps_default() {
        let config = ClientConfig::from_lookup(|k| {
            (k == "CAREQUEUE_REQUEST_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert_eq!(config.request_timeout, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = ReconnectionPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.base_delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.base_delay(4), Duration::from_millis(8_000));
        assert_eq!(policy.base_delay(6), Duration::from_millis(30_000));
        assert_eq!(policy.base_delay(40), Duration::from_millis(30_000));
    }
}
