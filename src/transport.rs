//! HTTP transport for the chat streaming endpoint
//!
//! Opens `GET /chat` and forwards response units over a channel. The server
//! normally answers with `text/event-stream`; some deployments buffer the
//! whole body instead, so the response content type decides between
//! incremental and buffered delivery. Either way the same unit framing
//! applies.

use crate::protocol::UnitSplitter;
use crate::runtime::traits::ChatTransport;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// A single question bound for the chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    /// Session token from login, sent as a query parameter when present.
    pub token: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, token: Option<String>) -> Self {
        Self {
            message: message.into(),
            token,
        }
    }
}

/// What the transport observed on the wire, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// The server accepted the request; body delivery follows.
    Opened,
    /// One complete protocol unit (blank-line delimited block).
    Unit(String),
    /// The request or body read failed. No further events follow.
    Failed(TransportError),
    /// The body ended normally. No further events follow.
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never reached the server.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server accepted the connection but the request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The server answered with a non-success status.
    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// The body ended abnormally mid-stream.
    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }
}

/// Production transport backed by a shared reqwest client.
///
/// The client carries a connect timeout only. A total request timeout would
/// cut long streams short, and stalled streams are the watchdog's job.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn run(
        &self,
        request: &ChatRequest,
        events: &mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let mut query: Vec<(&str, &str)> = vec![("message", request.message.as_str())];
        if let Some(token) = &request.token {
            query.push(("token", token.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/chat", self.base_url))
            .query(&query)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let streaming = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));

        let _ = events.send(TransportEvent::Opened).await;

        if streaming {
            Self::forward_stream(response, events).await
        } else {
            Self::forward_buffered(response, events).await
        }
    }

    /// Incremental delivery: feed each body chunk through the splitter and
    /// forward units as soon as they complete.
    async fn forward_stream(
        response: reqwest::Response,
        events: &mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let mut splitter = UnitSplitter::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransportError::stream(e.to_string()))?;
            splitter.push(&chunk);
            while let Some(unit) = splitter.next_unit() {
                if events.send(TransportEvent::Unit(unit)).await.is_err() {
                    // Receiver went away, stop reading.
                    return Ok(());
                }
            }
        }

        if let Some(unit) = splitter.finish() {
            let _ = events.send(TransportEvent::Unit(unit)).await;
        }
        Ok(())
    }

    /// Buffered delivery: the server sent the whole body at once. Split it
    /// with the same framing rules and forward the units in order.
    async fn forward_buffered(
        response: reqwest::Response,
        events: &mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::stream(e.to_string()))?;

        let mut splitter = UnitSplitter::new();
        splitter.push(body.as_bytes());
        while let Some(unit) = splitter.next_unit() {
            if events.send(TransportEvent::Unit(unit)).await.is_err() {
                return Ok(());
            }
        }
        if let Some(unit) = splitter.finish() {
            let _ = events.send(TransportEvent::Unit(unit)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn stream_chat(&self, request: ChatRequest, events: mpsc::Sender<TransportEvent>) {
        match self.run(&request, &events).await {
            Ok(()) => {
                let _ = events.send(TransportEvent::Closed).await;
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Failed(e)).await;
            }
        }
    }
}

fn classify_send_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(format!("Request timed out: {error}"))
    } else if error.is_connect() {
        TransportError::connect(format!("Connection failed: {error}"))
    } else {
        TransportError::connect(format!("Request failed: {error}"))
    }
}

fn status_error(status: StatusCode, body: &str) -> TransportError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    // Prefer the server's structured message, fall back to the raw body.
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| body.trim().to_string());

    TransportError::Status {
        status: status.as_u16(),
        message,
    }
}
