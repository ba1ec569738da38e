//! Feedback submission client
//!
//! Ratings go to `POST /feedback` as JSON. The call runs in the background;
//! a failed submission leaves the exchange unrated so the user can try again.

use crate::conversation::FeedbackRating;
use crate::runtime::traits::FeedbackSink;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Body for `POST /feedback`. The question is always the rated exchange's
/// own question, not whatever the user asked afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackSubmission {
    pub question: String,
    pub answer: String,
    pub feedback: FeedbackRating,
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("server returned HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
}

pub struct FeedbackClient {
    client: Client,
    base_url: String,
    /// Session token from login; deployments without one send nothing.
    bearer: Option<String>,
}

impl FeedbackClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, bearer: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            bearer,
        }
    }
}

#[async_trait]
impl FeedbackSink for FeedbackClient {
    async fn submit(&self, submission: FeedbackSubmission) -> Result<(), FeedbackError> {
        let mut request = self
            .client
            .post(format!("{}/feedback", self.base_url))
            .json(&submission);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FeedbackError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FeedbackError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}
