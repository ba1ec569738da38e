//! Backend availability probe
//!
//! Polls `GET /` on a fixed interval and publishes the result on a watch
//! channel, so the UI can show online/offline without ever blocking on it.

use reqwest::Client;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No probe has landed yet.
    Unknown,
    Online,
    Offline,
}

pub struct HealthMonitor {
    client: Client,
    base_url: String,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(base_url: impl Into<String>, interval: Duration, probe_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(probe_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            interval,
        }
    }

    /// Spawn the probe loop. The receiver always holds the latest status;
    /// the first probe fires immediately.
    pub fn spawn(self, cancel: CancellationToken) -> watch::Receiver<ConnectionStatus> {
        let (tx, rx) = watch::channel(ConnectionStatus::Unknown);

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticks.tick() => {
                        let status = self.probe().await;
                        if *tx.borrow() != status {
                            tracing::info!(?status, "Backend availability changed");
                        }
                        tx.send_replace(status);
                    }
                }
            }
        });

        rx
    }

    async fn probe(&self) -> ConnectionStatus {
        match self.client.get(format!("{}/", self.base_url)).send().await {
            Ok(response) if response.status().is_success() => ConnectionStatus::Online,
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Probe answered non-success");
                ConnectionStatus::Offline
            }
            Err(e) => {
                tracing::debug!(error = %e, "Probe failed");
                ConnectionStatus::Offline
            }
        }
    }
}
