//! Property-based tests for the exchange state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::transition::*;
use super::*;
use crate::conversation::{Exchange, ExchangeId, ExchangeStatus};
use crate::protocol::{ChatRecord, SourceRef};
use proptest::prelude::*;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> SessionContext {
    SessionContext::new(Duration::from_secs(30), Duration::from_secs(1))
}

fn exchange_with(status: ExchangeStatus, text: &str) -> Exchange {
    let mut exchange = Exchange::new(ExchangeId(1), "pergunta");
    exchange.status = status;
    exchange.assistant_text = text.to_string();
    exchange
}

/// Fold a sequence of events over a fresh pending exchange, returning every
/// intermediate value (index 0 is the initial exchange).
fn run_events(events: Vec<Event>) -> Vec<Exchange> {
    let context = test_context();
    let mut exchange = Exchange::new(ExchangeId(1), "pergunta");
    let mut history = vec![exchange.clone()];
    for event in events {
        exchange = transition(&exchange, &context, event).exchange;
        history.push(exchange.clone());
    }
    history
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_source_ref() -> impl Strategy<Value = SourceRef> {
    ("[A-Za-z ]{1,20}", "[a-z_]{1,12}").prop_map(|(title, stem)| SourceRef {
        title,
        source_file: format!("{stem}.md"),
    })
}

fn arb_token_text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z é!,\\.]{0,20}",
        Just("---".to_string()),
        Just("fim.\n\n".to_string()),
    ]
}

fn arb_record() -> impl Strategy<Value = ChatRecord> {
    prop_oneof![
        arb_token_text().prop_map(ChatRecord::Token),
        proptest::collection::vec(arb_source_ref(), 0..3).prop_map(ChatRecord::Sources),
        "[a-z ]{0,20}".prop_map(ChatRecord::Answer),
        "[a-z ]{1,20}".prop_map(ChatRecord::Error),
        Just(ChatRecord::End),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Opened),
        arb_record().prop_map(Event::Record),
        "[a-z ]{1,20}".prop_map(|message| Event::TransportError { message }),
        Just(Event::TransportClosed),
        Just(Event::WatchdogFired),
        Just(Event::GraceElapsed),
        Just(Event::Cancelled),
    ]
}

fn arb_terminal_exchange() -> impl Strategy<Value = Exchange> {
    (
        prop_oneof![
            Just(ExchangeStatus::Complete),
            Just(ExchangeStatus::Failed)
        ],
        "[a-z ]{1,20}",
    )
        .prop_map(|(status, text)| exchange_with(status, &text))
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Invariant 1: Finished exchanges absorb every event unchanged
    #[test]
    fn prop_terminal_absorbs_all_events(
        exchange in arb_terminal_exchange(),
        event in arb_event()
    ) {
        let result = transition(&exchange, &test_context(), event);
        prop_assert_eq!(result.exchange, exchange);
        prop_assert!(result.effects.is_empty(), "Terminal exchange produced effects");
    }

    // Invariant 2: Identity fields never change across any event sequence
    #[test]
    fn prop_identity_fields_are_immutable(
        events in proptest::collection::vec(arb_event(), 0..25)
    ) {
        let history = run_events(events);
        let initial = &history[0];
        for exchange in &history {
            prop_assert_eq!(exchange.id, initial.id);
            prop_assert_eq!(&exchange.user_text, &initial.user_text);
            prop_assert_eq!(exchange.created_at, initial.created_at);
            prop_assert_eq!(exchange.feedback, None, "Transitions must not set feedback");
        }
    }

    // Invariant 3: A terminal exchange always carries a non-empty answer
    #[test]
    fn prop_terminal_implies_nonempty_text(
        events in proptest::collection::vec(arb_event(), 0..25)
    ) {
        for exchange in run_events(events) {
            if exchange.is_terminal() {
                prop_assert!(
                    !exchange.assistant_text.is_empty(),
                    "Terminal exchange with empty answer: {:?}",
                    exchange
                );
            }
        }
    }

    // Invariant 4: Status only moves forward
    #[test]
    fn prop_status_is_forward_only(
        events in proptest::collection::vec(arb_event(), 0..25)
    ) {
        let history = run_events(events);
        for pair in history.windows(2) {
            let (before, after) = (&pair[0], &pair[1]);
            if before.is_terminal() {
                prop_assert_eq!(after.status, before.status);
            }
            if before.status == ExchangeStatus::Streaming {
                prop_assert_ne!(after.status, ExchangeStatus::Pending);
            }
        }
    }

    // Invariant 5: Sources never go back to empty once shown
    #[test]
    fn prop_sources_never_cleared(
        events in proptest::collection::vec(arb_event(), 0..25)
    ) {
        let history = run_events(events);
        for pair in history.windows(2) {
            if !pair[0].sources.is_empty() {
                prop_assert!(
                    !pair[1].sources.is_empty(),
                    "Sources were cleared: {:?} -> {:?}",
                    pair[0].sources,
                    pair[1].sources
                );
            }
        }
    }

    // Invariant 6: Effects agree with the produced status
    #[test]
    fn prop_effects_match_status(
        events in proptest::collection::vec(arb_event(), 0..25)
    ) {
        let context = test_context();
        let mut exchange = Exchange::new(ExchangeId(1), "pergunta");
        for event in events {
            let was_terminal = exchange.is_terminal();
            let result = transition(&exchange, &context, event);

            for effect in &result.effects {
                match effect {
                    Effect::CloseTransport => prop_assert!(
                        result.exchange.is_terminal(),
                        "CloseTransport without terminal status"
                    ),
                    Effect::ArmWatchdog { .. } => prop_assert!(
                        exchange.status == ExchangeStatus::Pending
                            && result.exchange.status == ExchangeStatus::Streaming,
                        "Watchdog armed outside the pending-to-streaming edge"
                    ),
                    Effect::ScheduleGraceClose { .. } => prop_assert!(
                        result.exchange.status == ExchangeStatus::Streaming,
                        "Grace close scheduled off-stream"
                    ),
                }
            }
            if !was_terminal && result.exchange.is_terminal() {
                prop_assert!(
                    result
                        .effects
                        .iter()
                        .any(|e| matches!(e, Effect::CloseTransport)),
                    "Terminalizing transition did not close the transport"
                );
            }
            exchange = result.exchange;
        }
    }

    // Invariant 7: Token records append exactly, in order
    #[test]
    fn prop_tokens_append_in_order(
        fragments in proptest::collection::vec("[a-zé ]{0,10}", 0..10)
    ) {
        let context = test_context();
        let mut exchange = exchange_with(ExchangeStatus::Streaming, "");
        for fragment in &fragments {
            let before = exchange.assistant_text.clone();
            let event = Event::Record(ChatRecord::Token(fragment.clone()));
            exchange = transition(&exchange, &context, event).exchange;
            prop_assert!(exchange.assistant_text.starts_with(&before));
        }
        prop_assert_eq!(exchange.assistant_text, fragments.concat());
    }

    // Invariant 8: The watchdog always settles a live exchange
    #[test]
    fn prop_watchdog_always_settles(text in "[a-z ]{0,20}") {
        let exchange = exchange_with(ExchangeStatus::Streaming, &text);
        let result = transition(&exchange, &test_context(), Event::WatchdogFired);
        prop_assert!(result.exchange.is_terminal());
        if text.is_empty() {
            prop_assert_eq!(result.exchange.status, ExchangeStatus::Failed);
            prop_assert_eq!(result.exchange.assistant_text, TIMEOUT_ERROR_TEXT);
        } else {
            prop_assert_eq!(result.exchange.status, ExchangeStatus::Complete);
            prop_assert_eq!(result.exchange.assistant_text, text);
        }
    }

    // Invariant 9: Transport failure preserves partial content
    #[test]
    fn prop_transport_error_preserves_partial(
        text in "[a-z ]{1,20}",
        message in "[a-z ]{1,20}"
    ) {
        let exchange = exchange_with(ExchangeStatus::Streaming, &text);
        let result = transition(
            &exchange,
            &test_context(),
            Event::TransportError { message },
        );
        prop_assert_eq!(result.exchange.status, ExchangeStatus::Failed);
        prop_assert_eq!(result.exchange.assistant_text, text);
    }
}

// ============================================================================
// Sequence Tests
// ============================================================================

#[test]
fn test_full_stream_scenario() {
    let sources = vec![SourceRef {
        title: "FAQ".to_string(),
        source_file: "faq.md".to_string(),
    }];
    let history = run_events(vec![
        Event::Opened,
        Event::Record(ChatRecord::Sources(sources.clone())),
        Event::Record(ChatRecord::Token("Olá".to_string())),
        Event::Record(ChatRecord::Token("!".to_string())),
        Event::Record(ChatRecord::End),
    ]);

    let last = history.last().unwrap();
    assert_eq!(last.status, ExchangeStatus::Complete);
    assert_eq!(last.assistant_text, "Olá!");
    assert_eq!(last.sources, sources);
}

#[test]
fn test_completion_hint_then_grace_settles_stream() {
    let history = run_events(vec![
        Event::Opened,
        Event::Record(ChatRecord::Token("resposta final\n\n".to_string())),
        Event::GraceElapsed,
    ]);

    let last = history.last().unwrap();
    assert_eq!(last.status, ExchangeStatus::Complete);
    assert_eq!(last.assistant_text, "resposta final\n\n");
}
