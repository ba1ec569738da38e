//! Environment-driven configuration

use crate::session::SessionContext;
use std::time::Duration;

/// Runtime settings, all overridable through `ATENDE_*` variables.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Backend root, without a trailing slash.
    pub base_url: String,
    /// Upper bound on one whole response.
    pub watchdog_timeout: Duration,
    /// Quiet period after a completion hint before the stream is closed.
    pub completion_grace: Duration,
    /// Availability probe cadence.
    pub probe_interval: Duration,
    /// Timeout for one-shot requests (auth, feedback, probe). The chat
    /// stream itself only honors the connect timeout.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Accept the offline development login when the auth server is down.
    pub dev_login_fallback: bool,
}

impl ChatConfig {
    pub fn from_env() -> Self {
        let base_url = env_string("ATENDE_BASE_URL", "http://localhost:5001");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            watchdog_timeout: env_secs("ATENDE_WATCHDOG_SECS", 30),
            completion_grace: env_millis("ATENDE_GRACE_MS", 1000),
            probe_interval: env_secs("ATENDE_PROBE_SECS", 5),
            request_timeout: env_secs("ATENDE_REQUEST_TIMEOUT_SECS", 10),
            connect_timeout: env_secs("ATENDE_CONNECT_TIMEOUT_SECS", 10),
            dev_login_fallback: env_flag("ATENDE_DEV_LOGIN"),
        }
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext::new(self.watchdog_timeout, self.completion_grace)
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

fn env_millis(name: &str, default: u64) -> Duration {
    let millis = std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default);
    Duration::from_millis(millis)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
