//! Effects produced by exchange transitions

use std::time::Duration;

/// Effects to be executed after a transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Tear down the transport for this exchange
    CloseTransport,

    /// Start the no-response watchdog
    ArmWatchdog { timeout: Duration },

    /// Close the stream after a delay, unless a terminal record lands first
    ScheduleGraceClose { delay: Duration },
}
