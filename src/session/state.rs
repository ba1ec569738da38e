//! Session configuration types

use std::time::Duration;

/// Ceiling on how long a stream may stay open once live.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between a completion hint in the token stream and closing it.
pub const DEFAULT_COMPLETION_GRACE: Duration = Duration::from_secs(1);

/// Context for a streaming session (immutable configuration)
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub watchdog_timeout: Duration,
    pub completion_grace: Duration,
}

impl SessionContext {
    pub fn new(watchdog_timeout: Duration, completion_grace: Duration) -> Self {
        Self {
            watchdog_timeout,
            completion_grace,
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHDOG_TIMEOUT, DEFAULT_COMPLETION_GRACE)
    }
}
