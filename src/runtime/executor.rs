//! Session executor loop
//!
//! One task owns all mutable session state. Wire events, timer expirations,
//! commands, and feedback outcomes arrive through a single channel, feed the
//! pure transition function, and the resulting effects become spawned
//! background work.

use super::traits::{ChatTransport, FeedbackSink};
use super::{Command, RuntimeEvent, SessionError, SessionHandle, SessionUpdate};

use crate::conversation::{Conversation, ConversationError, Exchange, ExchangeId, FeedbackRating};
use crate::feedback::{FeedbackError, FeedbackSubmission};
use crate::protocol::parse_unit;
use crate::session::{transition, Effect, Event, SessionContext};
use crate::transport::{ChatRequest, TransportEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Generic session runtime that can work with any transport and feedback
/// implementations.
pub struct SessionRuntime<T, F>
where
    T: ChatTransport + 'static,
    F: FeedbackSink + 'static,
{
    context: SessionContext,
    conversation: Conversation,
    transport: Arc<T>,
    feedback: Arc<F>,
    /// Session token forwarded with every chat request.
    auth_token: Option<String>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    update_tx: broadcast::Sender<SessionUpdate>,
    /// Cancels the stream task and timers of the active exchange.
    stream_cancel: Option<CancellationToken>,
    /// Exchange with a pending grace timer. Keeps back-to-back completion
    /// hints from stacking timers.
    grace_armed: Option<ExchangeId>,
    /// Exchanges with a feedback submission in flight.
    feedback_in_flight: HashSet<ExchangeId>,
}

impl<T, F> SessionRuntime<T, F>
where
    T: ChatTransport + 'static,
    F: FeedbackSink + 'static,
{
    pub fn new(
        context: SessionContext,
        transport: T,
        feedback: F,
        auth_token: Option<String>,
    ) -> (Self, SessionHandle) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (update_tx, _) = broadcast::channel(128);

        let handle = SessionHandle {
            event_tx: event_tx.clone(),
            update_tx: update_tx.clone(),
        };

        let runtime = Self {
            context,
            conversation: Conversation::new(),
            transport: Arc::new(transport),
            feedback: Arc::new(feedback),
            auth_token,
            event_rx,
            event_tx,
            update_tx,
            stream_cancel: None,
            grace_armed: None,
            feedback_in_flight: HashSet::new(),
        };

        (runtime, handle)
    }

    pub async fn run(mut self) {
        tracing::info!("Session runtime started");

        // Process events in a loop - no recursion
        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.process_event(event);
                }
                else => break,
            }
        }

        if let Some(token) = self.stream_cancel.take() {
            token.cancel();
        }
        tracing::info!("Session runtime stopped");
    }

    fn process_event(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Command(command) => self.process_command(command),

            RuntimeEvent::Transport { id, event } => {
                let machine_event = match event {
                    TransportEvent::Opened => Event::Opened,
                    TransportEvent::Unit(unit) => match parse_unit(&unit) {
                        Some(record) => Event::Record(record),
                        None => {
                            tracing::debug!(%id, unit, "Skipping malformed unit");
                            return;
                        }
                    },
                    TransportEvent::Failed(error) => {
                        tracing::warn!(%id, error = %error, "Stream transport failed");
                        Event::TransportError {
                            message: error.to_string(),
                        }
                    }
                    TransportEvent::Closed => Event::TransportClosed,
                };
                self.drive(id, machine_event);
            }

            RuntimeEvent::WatchdogFired { id } => {
                tracing::warn!(%id, "Response watchdog fired");
                self.drive(id, Event::WatchdogFired);
            }

            RuntimeEvent::GraceElapsed { id } => {
                if self.grace_armed == Some(id) {
                    self.grace_armed = None;
                }
                self.drive(id, Event::GraceElapsed);
            }

            RuntimeEvent::FeedbackResolved {
                id,
                rating,
                outcome,
            } => self.finish_feedback(id, rating, outcome),
        }
    }

    fn process_command(&mut self, command: Command) {
        match command {
            Command::Submit { text, reply } => {
                let _ = reply.send(self.start_exchange(text));
            }
            Command::SubmitFeedback { id, rating, reply } => {
                let _ = reply.send(self.start_feedback(id, rating));
            }
            Command::CancelActive => {
                if let Some(id) = self.conversation.active().map(|e| e.id) {
                    tracing::info!(%id, "Cancelling active exchange");
                    self.drive(id, Event::Cancelled);
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.conversation.snapshot());
            }
            Command::Shutdown => {
                tracing::info!("Session runtime shutting down");
                // A still-streaming exchange finalizes like an unexpected
                // close, so subscribers see it finish before the loop ends.
                if let Some(id) = self.conversation.active().map(|e| e.id) {
                    self.drive(id, Event::Cancelled);
                }
                if let Some(token) = self.stream_cancel.take() {
                    token.cancel();
                }
                // Already queued events still drain, then the loop ends.
                self.event_rx.close();
            }
        }
    }

    /// Accept a question, open its stream, and wire the plumbing: one task
    /// drives the transport until the exchange's cancellation scope fires,
    /// another tags wire events with the exchange id.
    fn start_exchange(&mut self, text: String) -> Result<ExchangeId, SessionError> {
        let id = self.conversation.begin(text.clone())?;

        let scope = CancellationToken::new();
        self.stream_cancel = Some(scope.clone());
        self.grace_armed = None;

        let request = ChatRequest::new(text.clone(), self.auth_token.clone());
        let (unit_tx, mut unit_rx) = mpsc::channel(32);

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            tokio::select! {
                biased;

                () = scope.cancelled() => {
                    tracing::debug!(%id, "Stream dropped by cancellation");
                }
                () = transport.stream_chat(request, unit_tx) => {}
            }
        });

        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = unit_rx.recv().await {
                if event_tx
                    .send(RuntimeEvent::Transport { id, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let _ = self.update_tx.send(SessionUpdate::ExchangeStarted {
            id,
            user_text: text,
        });
        tracing::info!(%id, "Exchange started");
        Ok(id)
    }

    /// Validate a rating and send it in the background. The store is only
    /// written once the server accepts, so a failed submission stays
    /// retryable.
    fn start_feedback(
        &mut self,
        id: ExchangeId,
        rating: FeedbackRating,
    ) -> Result<(), SessionError> {
        let Some(exchange) = self.conversation.get(id) else {
            return Err(ConversationError::ExchangeNotFound(id).into());
        };
        if !exchange.is_terminal() {
            return Err(ConversationError::NotTerminal(id).into());
        }
        if exchange.feedback.is_some() {
            return Err(ConversationError::FeedbackAlreadySet(id).into());
        }
        if self.feedback_in_flight.contains(&id) {
            return Err(SessionError::FeedbackPending(id));
        }

        let submission = FeedbackSubmission {
            question: exchange.user_text.clone(),
            answer: exchange.assistant_text.clone(),
            feedback: rating,
        };
        self.feedback_in_flight.insert(id);

        let sink = Arc::clone(&self.feedback);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let outcome = sink.submit(submission).await;
            let _ = event_tx
                .send(RuntimeEvent::FeedbackResolved {
                    id,
                    rating,
                    outcome,
                })
                .await;
        });

        tracing::info!(%id, ?rating, "Feedback submission started");
        Ok(())
    }

    fn finish_feedback(
        &mut self,
        id: ExchangeId,
        rating: FeedbackRating,
        outcome: Result<(), FeedbackError>,
    ) {
        self.feedback_in_flight.remove(&id);

        match outcome {
            Ok(()) => match self.conversation.record_feedback(id, rating) {
                Ok(()) => {
                    tracing::info!(%id, ?rating, "Feedback recorded");
                    let _ = self
                        .update_tx
                        .send(SessionUpdate::FeedbackRecorded { id, rating });
                }
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Server accepted feedback the store rejects");
                }
            },
            Err(e) => {
                // The exchange keeps feedback unset, so a retry is allowed.
                tracing::warn!(%id, error = %e, "Feedback submission failed");
            }
        }
    }

    /// Feed one event through the pure transition and apply the result.
    fn drive(&mut self, id: ExchangeId, event: Event) {
        let Some(before) = self.conversation.get(id).cloned() else {
            tracing::warn!(%id, ?event, "Event for unknown exchange");
            return;
        };

        let result = transition(&before, &self.context, event);

        if result.exchange != before {
            match self.conversation.commit(result.exchange.clone()) {
                Ok(()) => self.publish_changes(&before, &result.exchange),
                Err(e) => {
                    tracing::error!(%id, error = %e, "Dropping exchange update");
                    return;
                }
            }
        }

        for effect in result.effects {
            self.run_effect(id, effect);
        }
    }

    /// Broadcast the difference between two versions of an exchange.
    fn publish_changes(&self, before: &Exchange, after: &Exchange) {
        if after.assistant_text.len() > before.assistant_text.len()
            && after.assistant_text.starts_with(before.assistant_text.as_str())
        {
            if let Some(delta) = after.assistant_text.get(before.assistant_text.len()..) {
                let _ = self.update_tx.send(SessionUpdate::AssistantDelta {
                    id: after.id,
                    delta: delta.to_string(),
                });
            }
        }

        if after.sources != before.sources {
            let _ = self.update_tx.send(SessionUpdate::SourcesUpdated {
                id: after.id,
                sources: after.sources.clone(),
            });
        }

        if after.is_terminal() {
            let _ = self.update_tx.send(SessionUpdate::ExchangeFinished {
                exchange: after.clone(),
            });
        }
    }

    fn run_effect(&mut self, id: ExchangeId, effect: Effect) {
        match effect {
            Effect::CloseTransport => {
                if let Some(token) = self.stream_cancel.take() {
                    token.cancel();
                }
                if self.grace_armed == Some(id) {
                    self.grace_armed = None;
                }
            }

            Effect::ArmWatchdog { timeout } => {
                let event_tx = self.event_tx.clone();
                let scope = self.exchange_scope();
                tokio::spawn(async move {
                    tokio::select! {
                        () = scope.cancelled() => {}
                        () = tokio::time::sleep(timeout) => {
                            let _ = event_tx.send(RuntimeEvent::WatchdogFired { id }).await;
                        }
                    }
                });
            }

            Effect::ScheduleGraceClose { delay } => {
                if self.grace_armed == Some(id) {
                    return;
                }
                self.grace_armed = Some(id);

                let event_tx = self.event_tx.clone();
                let scope = self.exchange_scope();
                tokio::spawn(async move {
                    tokio::select! {
                        () = scope.cancelled() => {}
                        () = tokio::time::sleep(delay) => {
                            let _ = event_tx.send(RuntimeEvent::GraceElapsed { id }).await;
                        }
                    }
                });
            }
        }
    }

    /// Cancellation scope of the active exchange. A timer spawned after the
    /// stream already closed gets a detached token and its event is absorbed
    /// as stale.
    fn exchange_scope(&self) -> CancellationToken {
        self.stream_cancel.clone().unwrap_or_default()
    }
}
