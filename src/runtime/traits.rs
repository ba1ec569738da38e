//! Trait abstractions for runtime I/O
//!
//! These traits let the executor run against mock implementations in tests.

use crate::feedback::{FeedbackError, FeedbackSubmission};
use crate::transport::{ChatRequest, TransportEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Source of chat response streams.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a stream for `request` and push everything observed into
    /// `events`, ending with either `Closed` or `Failed`. Dropping the
    /// returned future aborts the underlying request.
    async fn stream_chat(&self, request: ChatRequest, events: mpsc::Sender<TransportEvent>);
}

/// Destination for feedback ratings.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn submit(&self, submission: FeedbackSubmission) -> Result<(), FeedbackError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ChatTransport + ?Sized> ChatTransport for Arc<T> {
    async fn stream_chat(&self, request: ChatRequest, events: mpsc::Sender<TransportEvent>) {
        (**self).stream_chat(request, events).await;
    }
}

#[async_trait]
impl<T: FeedbackSink + ?Sized> FeedbackSink for Arc<T> {
    async fn submit(&self, submission: FeedbackSubmission) -> Result<(), FeedbackError> {
        (**self).submit(submission).await
    }
}
