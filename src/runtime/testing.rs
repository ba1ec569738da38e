//! Mock implementations for testing
//!
//! Scripted transports and feedback sinks, no real I/O.

use super::traits::{ChatTransport, FeedbackSink};
use crate::feedback::{FeedbackError, FeedbackSubmission};
use crate::transport::{ChatRequest, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

// ============================================================================
// Mock Transport
// ============================================================================

/// One scripted wire session.
struct Script {
    events: Vec<TransportEvent>,
    /// Keep the stream open after the last event instead of returning.
    hold_open: bool,
}

/// Transport that replays scripted sessions, one per `stream_chat` call.
pub struct MockTransport {
    scripts: Mutex<VecDeque<Script>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a session that delivers `events` and then returns.
    pub fn queue_session(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().unwrap().push_back(Script {
            events,
            hold_open: false,
        });
    }

    /// Queue a session that delivers `events` and then stays open until the
    /// stream is dropped. For cancellation and timer tests.
    pub fn queue_stalled_session(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().unwrap().push_back(Script {
            events,
            hold_open: true,
        });
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn stream_chat(&self, request: ChatRequest, events: mpsc::Sender<TransportEvent>) {
        self.requests.lock().unwrap().push(request);

        let script = self.scripts.lock().unwrap().pop_front();
        let Some(script) = script else {
            let _ = events
                .send(TransportEvent::Failed(TransportError::connect(
                    "no scripted session queued",
                )))
                .await;
            return;
        };

        for event in script.events {
            if events.send(event).await.is_err() {
                return;
            }
        }

        if script.hold_open {
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Mock Feedback Sink
// ============================================================================

/// Feedback sink that returns queued outcomes, defaulting to success when
/// the queue is empty.
pub struct MockFeedbackSink {
    outcomes: Mutex<VecDeque<Result<(), FeedbackError>>>,
    /// Record of all submissions made
    pub submissions: Mutex<Vec<FeedbackSubmission>>,
}

impl MockFeedbackSink {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome of the next submission.
    pub fn queue_outcome(&self, outcome: Result<(), FeedbackError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Get recorded submissions
    pub fn recorded_submissions(&self) -> Vec<FeedbackSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

impl Default for MockFeedbackSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackSink for MockFeedbackSink {
    async fn submit(&self, submission: FeedbackSubmission) -> Result<(), FeedbackError> {
        self.submissions.lock().unwrap().push(submission);
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

// ============================================================================
// Wire unit helpers
// ============================================================================

pub fn token_unit(text: &str) -> TransportEvent {
    TransportEvent::Unit(format!("data: {}", serde_json::json!({ "token": text })))
}

pub fn sources_unit(entries: &[(&str, &str)]) -> TransportEvent {
    let sources: Vec<_> = entries
        .iter()
        .map(|(title, file)| serde_json::json!({ "title": title, "source_file": file }))
        .collect();
    TransportEvent::Unit(format!("data: {}", serde_json::json!({ "sources": sources })))
}

pub fn answer_unit(text: &str) -> TransportEvent {
    TransportEvent::Unit(format!("data: {}", serde_json::json!({ "answer": text })))
}

pub fn error_unit(message: &str) -> TransportEvent {
    TransportEvent::Unit(format!("data: {}", serde_json::json!({ "error": message })))
}

pub fn end_unit() -> TransportEvent {
    TransportEvent::Unit("event: end\ndata: {}".to_string())
}
