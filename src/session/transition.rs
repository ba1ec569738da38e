//! Pure exchange transition function
//!
//! The only place exchange state changes. Given the same inputs this always
//! produces the same outputs, with no I/O side effects; the effects list
//! tells the runtime what to do next.

use super::{Effect, Event, SessionContext};
use crate::conversation::{Exchange, ExchangeStatus};
use crate::protocol::ChatRecord;

/// Shown when a stream dies with nothing to display.
pub const CONNECTION_ERROR_TEXT: &str = "Erro de conexão com o servidor de streaming.";

/// Shown when the watchdog fires on an empty exchange.
pub const TIMEOUT_ERROR_TEXT: &str = "Tempo limite de resposta excedido.";

/// Prefix for backend-reported errors, rendered verbatim after it.
pub const BACKEND_ERROR_PREFIX: &str = "Erro: ";

/// Result of an exchange transition
#[derive(Debug)]
pub struct TransitionResult {
    pub exchange: Exchange,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Pure transition function
///
/// Total over every (status, event) pair: a finished exchange absorbs any
/// late event unchanged, so transport callbacks racing past close are safe
/// to deliver. Every arm that reaches a terminal status leaves a non-empty
/// answer text behind.
pub fn transition(exchange: &Exchange, context: &SessionContext, event: Event) -> TransitionResult {
    match (exchange.status, event) {
        // ============================================================
        // Terminal absorption
        // ============================================================

        // Finished exchanges never change again, whatever arrives
        (ExchangeStatus::Complete | ExchangeStatus::Failed, _) => {
            TransitionResult::new(exchange.clone())
        }

        // ============================================================
        // Stream open
        // ============================================================

        (ExchangeStatus::Pending, Event::Opened) => enter_streaming(exchange, context),

        // A second open notification carries no new information
        (ExchangeStatus::Streaming, Event::Opened) => TransitionResult::new(exchange.clone()),

        // ============================================================
        // Protocol records
        // ============================================================

        // A record ahead of the open notification means the stream is live
        (ExchangeStatus::Pending, Event::Record(record)) => {
            let opened = enter_streaming(exchange, context);
            let applied = apply_record(&opened.exchange, context, record);
            if applied.exchange.is_terminal() {
                // The record settled the stream on arrival, nothing to watch
                applied
            } else {
                let mut effects = opened.effects;
                effects.extend(applied.effects);
                TransitionResult {
                    exchange: applied.exchange,
                    effects,
                }
            }
        }

        (ExchangeStatus::Streaming, Event::Record(record)) => {
            apply_record(exchange, context, record)
        }

        // ============================================================
        // Transport failure and close
        // ============================================================

        // Failure keeps whatever already streamed; partial content is never
        // thrown away
        (_, Event::TransportError { .. }) => {
            let mut next = exchange.clone();
            if next.assistant_text.is_empty() {
                next.assistant_text = CONNECTION_ERROR_TEXT.to_string();
            }
            next.status = ExchangeStatus::Failed;
            TransitionResult::new(next).with_effect(Effect::CloseTransport)
        }

        // A silent close and a user cancel settle the same way: streamed
        // content completes the exchange, an empty one fails
        (_, Event::TransportClosed | Event::Cancelled) => {
            complete_or_fail(exchange.clone(), CONNECTION_ERROR_TEXT)
        }

        // ============================================================
        // Timers
        // ============================================================

        (_, Event::WatchdogFired) => complete_or_fail(exchange.clone(), TIMEOUT_ERROR_TEXT),

        (ExchangeStatus::Streaming, Event::GraceElapsed)
            if !exchange.assistant_text.is_empty() =>
        {
            let mut next = exchange.clone();
            next.status = ExchangeStatus::Complete;
            TransitionResult::new(next).with_effect(Effect::CloseTransport)
        }

        // A grace timer with nothing shown is stale noise
        (_, Event::GraceElapsed) => TransitionResult::new(exchange.clone()),
    }
}

/// Move a pending exchange onto the live stream and arm its watchdog.
fn enter_streaming(exchange: &Exchange, context: &SessionContext) -> TransitionResult {
    let mut next = exchange.clone();
    next.status = ExchangeStatus::Streaming;
    TransitionResult::new(next).with_effect(Effect::ArmWatchdog {
        timeout: context.watchdog_timeout,
    })
}

/// Apply one protocol record to a streaming exchange.
fn apply_record(
    exchange: &Exchange,
    context: &SessionContext,
    record: ChatRecord,
) -> TransitionResult {
    match record {
        ChatRecord::Token(fragment) => {
            let hinted = completion_hint(&fragment);
            let mut next = exchange.clone();
            next.assistant_text.push_str(&fragment);
            let result = TransitionResult::new(next);
            if hinted {
                result.with_effect(Effect::ScheduleGraceClose {
                    delay: context.completion_grace,
                })
            } else {
                result
            }
        }

        ChatRecord::Sources(sources) => {
            let mut next = exchange.clone();
            // An empty update never clears sources already shown
            if !sources.is_empty() {
                next.sources = sources;
            }
            TransitionResult::new(next)
        }

        ChatRecord::Answer(answer) => {
            let mut next = exchange.clone();
            // The complete answer replaces streamed fragments wholesale, but
            // an empty one cannot erase content already shown
            if !answer.is_empty() {
                next.assistant_text = answer;
            }
            complete_or_fail(next, CONNECTION_ERROR_TEXT)
        }

        ChatRecord::Error(message) => {
            let mut next = exchange.clone();
            next.assistant_text = format!("{BACKEND_ERROR_PREFIX}{message}");
            next.status = ExchangeStatus::Failed;
            TransitionResult::new(next).with_effect(Effect::CloseTransport)
        }

        ChatRecord::End => complete_or_fail(exchange.clone(), CONNECTION_ERROR_TEXT),
    }
}

/// Settle a stream: streamed content completes the exchange, an empty one
/// fails with `fallback_text` as the answer.
fn complete_or_fail(mut exchange: Exchange, fallback_text: &str) -> TransitionResult {
    if exchange.assistant_text.is_empty() {
        exchange.assistant_text = fallback_text.to_string();
        exchange.status = ExchangeStatus::Failed;
    } else {
        exchange.status = ExchangeStatus::Complete;
    }
    TransitionResult::new(exchange).with_effect(Effect::CloseTransport)
}

/// The backends that never send an explicit end marker signal completion in
/// the text itself: a separator line or a paragraph-final fragment.
fn completion_hint(fragment: &str) -> bool {
    fragment.contains("---") || fragment.ends_with("\n\n")
}
