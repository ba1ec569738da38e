//! Session runtime
//!
//! Wires the pure state machine to real I/O. A single executor task owns the
//! conversation store, receives every event through one channel, and spawns
//! background tasks for the stream, the timers, and feedback submissions.
//! Callers hold a [`SessionHandle`] and watch progress on a broadcast
//! channel.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;

use crate::conversation::{ConversationError, Exchange, ExchangeId, FeedbackRating};
use crate::feedback::FeedbackError;
use crate::protocol::SourceRef;
use crate::transport::TransportEvent;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("feedback for exchange {0} is already being sent")]
    FeedbackPending(ExchangeId),
    #[error("session is shut down")]
    Terminated,
}

/// Progress notifications broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// A question was accepted and its exchange created.
    ExchangeStarted { id: ExchangeId, user_text: String },
    /// New answer text. `delta` is the appended suffix only.
    AssistantDelta { id: ExchangeId, delta: String },
    /// The citation list changed.
    SourcesUpdated {
        id: ExchangeId,
        sources: Vec<SourceRef>,
    },
    /// The exchange reached `Complete` or `Failed`. Carries the final value,
    /// which is the place to look when the answer text was replaced rather
    /// than appended to.
    ExchangeFinished { exchange: Exchange },
    /// The server accepted a rating and the store recorded it.
    FeedbackRecorded {
        id: ExchangeId,
        rating: FeedbackRating,
    },
}

/// Requests from a [`SessionHandle`] to the executor.
#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<ExchangeId, SessionError>>,
    },
    SubmitFeedback {
        id: ExchangeId,
        rating: FeedbackRating,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    CancelActive,
    Snapshot {
        reply: oneshot::Sender<Vec<Exchange>>,
    },
    Shutdown,
}

/// Everything the executor reacts to, merged into one event stream so the
/// loop never races itself.
#[derive(Debug)]
pub(crate) enum RuntimeEvent {
    Command(Command),
    /// Wire activity on one exchange's stream.
    Transport {
        id: ExchangeId,
        event: TransportEvent,
    },
    WatchdogFired {
        id: ExchangeId,
    },
    GraceElapsed {
        id: ExchangeId,
    },
    /// A background feedback submission finished.
    FeedbackResolved {
        id: ExchangeId,
        rating: FeedbackRating,
        outcome: Result<(), FeedbackError>,
    },
}

/// Cheap cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    event_tx: mpsc::Sender<RuntimeEvent>,
    update_tx: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    /// Submit a question. Resolves once the exchange is accepted or
    /// rejected; the answer itself arrives through [`SessionHandle::subscribe`].
    pub async fn submit(&self, text: impl Into<String>) -> Result<ExchangeId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Terminated)?
    }

    /// Rate a finished exchange. Resolves once the submission is accepted
    /// for delivery; [`SessionUpdate::FeedbackRecorded`] confirms it stuck.
    pub async fn submit_feedback(
        &self,
        id: ExchangeId,
        rating: FeedbackRating,
    ) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitFeedback { id, rating, reply })
            .await?;
        rx.await.map_err(|_| SessionError::Terminated)?
    }

    /// Abandon the active exchange, keeping any text already received.
    pub async fn cancel_active(&self) -> Result<(), SessionError> {
        self.send(Command::CancelActive).await
    }

    /// Current value of every exchange, in creation order.
    pub async fn snapshot(&self) -> Result<Vec<Exchange>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| SessionError::Terminated)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.update_tx.subscribe()
    }

    /// Stop the executor once queued events are drained. Idempotent.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.event_tx
            .send(RuntimeEvent::Command(command))
            .await
            .map_err(|_| SessionError::Terminated)
    }
}
