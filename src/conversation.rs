//! In-memory conversation state
//!
//! One exchange per submitted question. The store enforces the rules the
//! session runtime leans on: ids increase in creation order, at most one
//! exchange accepts stream input at a time, and a finished exchange never
//! changes again except for a single feedback rating.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::SourceRef;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("exchange {0} is still in flight")]
    ExchangeInFlight(ExchangeId),
    #[error("exchange not found: {0}")]
    ExchangeNotFound(ExchangeId),
    #[error("exchange {0} is already final")]
    ExchangeFrozen(ExchangeId),
    #[error("exchange {0} has not finished")]
    NotTerminal(ExchangeId),
    #[error("exchange {0} already has feedback")]
    FeedbackAlreadySet(ExchangeId),
}

/// Monotonically increasing exchange identifier.
///
/// Creation order is display order, so ids are plain counters rather than
/// random identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExchangeId(pub u64);

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    /// Submitted, stream not yet open.
    Pending,
    /// Stream open, answer text may still grow.
    Streaming,
    Complete,
    Failed,
}

impl ExchangeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// User rating on a finished exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackRating {
    Positive,
    Negative,
}

/// One question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub id: ExchangeId,
    pub user_text: String,
    pub assistant_text: String,
    pub sources: Vec<SourceRef>,
    pub status: ExchangeStatus,
    pub feedback: Option<FeedbackRating>,
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(id: ExchangeId, user_text: impl Into<String>) -> Self {
        Self {
            id,
            user_text: user_text.into(),
            assistant_text: String::new(),
            sources: Vec::new(),
            status: ExchangeStatus::Pending,
            feedback: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Append-only exchange store owned by the session runtime.
#[derive(Debug)]
pub struct Conversation {
    exchanges: Vec<Exchange>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            exchanges: Vec::new(),
            next_id: 1,
        }
    }

    /// Open a new exchange for a user question.
    ///
    /// Rejected while another exchange is still in flight; the caller
    /// surfaces that as a concurrency rejection without touching the store.
    pub fn begin(&mut self, user_text: impl Into<String>) -> Result<ExchangeId, ConversationError> {
        if let Some(active) = self.exchanges.iter().find(|e| !e.is_terminal()) {
            return Err(ConversationError::ExchangeInFlight(active.id));
        }
        let id = ExchangeId(self.next_id);
        self.next_id += 1;
        self.exchanges.push(Exchange::new(id, user_text));
        Ok(id)
    }

    /// Replace a stored exchange with an updated value.
    ///
    /// A finished exchange is frozen; a late update can never rewrite it.
    pub fn commit(&mut self, updated: Exchange) -> Result<(), ConversationError> {
        let Some(slot) = self.exchanges.iter_mut().find(|e| e.id == updated.id) else {
            return Err(ConversationError::ExchangeNotFound(updated.id));
        };
        if slot.is_terminal() {
            return Err(ConversationError::ExchangeFrozen(slot.id));
        }
        *slot = updated;
        Ok(())
    }

    /// Record a rating on a finished exchange. Write-once.
    pub fn record_feedback(
        &mut self,
        id: ExchangeId,
        rating: FeedbackRating,
    ) -> Result<(), ConversationError> {
        let Some(exchange) = self.exchanges.iter_mut().find(|e| e.id == id) else {
            return Err(ConversationError::ExchangeNotFound(id));
        };
        if !exchange.is_terminal() {
            return Err(ConversationError::NotTerminal(id));
        }
        if exchange.feedback.is_some() {
            return Err(ConversationError::FeedbackAlreadySet(id));
        }
        exchange.feedback = Some(rating);
        Ok(())
    }

    pub fn get(&self, id: ExchangeId) -> Option<&Exchange> {
        self.exchanges.iter().find(|e| e.id == id)
    }

    /// Exchange currently accepting stream input, if any.
    pub fn active(&self) -> Option<&Exchange> {
        self.exchanges.iter().find(|e| !e.is_terminal())
    }

    /// All exchanges in creation order.
    pub fn snapshot(&self) -> Vec<Exchange> {
        self.exchanges.clone()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
