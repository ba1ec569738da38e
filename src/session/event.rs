//! Events that drive an exchange through its lifecycle

use crate::protocol::ChatRecord;

/// Events that trigger exchange transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Transport events
    /// Connection established, the stream is live
    Opened,
    /// One decoded protocol record arrived
    Record(ChatRecord),
    /// Transport failed before or during the stream
    TransportError { message: String },
    /// Transport closed without an explicit end record
    TransportClosed,

    // Timer events
    /// No-response ceiling elapsed
    WatchdogFired,
    /// Completion-hint grace delay elapsed
    GraceElapsed,

    // User events
    /// User abandoned the in-flight exchange
    Cancelled,
}
