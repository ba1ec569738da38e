//! Login against the backend `/api/auth` endpoint
//!
//! The server answers `{"status": "success"}` with an optional session
//! token. Deployments without token auth just omit the field and the chat
//! stream goes out bare.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const INVALID_CREDENTIALS_TEXT: &str = "Credenciais inválidas";

const DEV_USERNAME: &str = "admin";
const DEV_PASSWORD: &str = "boticario2024";

#[derive(Debug, Error)]
pub enum AuthError {
    /// The server rejected the username/password pair.
    #[error("{message}")]
    Rejected { message: String },
    /// The server could not be reached at all.
    #[error("servidor de autenticação inacessível: {0}")]
    Unreachable(String),
    /// The server answered with something other than the auth contract.
    #[error("resposta de autenticação inválida: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum AuthStatus {
    Success,
    Error,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    status: AuthStatus,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct AuthClient {
    client: Client,
    base_url: String,
    /// Accept the offline development login when the server is unreachable.
    /// Never enable outside local development.
    dev_fallback: bool,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, dev_fallback: bool) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            dev_fallback,
        }
    }

    /// Exchange credentials for an optional session token.
    ///
    /// `Ok(None)` means the server accepted the login without issuing a
    /// token; chat requests then go out without one.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<String>, AuthError> {
        let response = match self
            .client
            .post(format!("{}/api/auth", self.base_url))
            .json(&AuthRequest { username, password })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return self.offline_fallback(username, password, &e),
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        if let Ok(parsed) = serde_json::from_str::<AuthResponse>(&body) {
            if status.is_success() && parsed.status == AuthStatus::Success {
                return Ok(parsed.token);
            }
            let message = parsed
                .message
                .unwrap_or_else(|| INVALID_CREDENTIALS_TEXT.to_string());
            return Err(AuthError::Rejected { message });
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::Rejected {
                message: INVALID_CREDENTIALS_TEXT.to_string(),
            });
        }
        Err(AuthError::Malformed(body))
    }

    /// Development-only escape hatch: when the auth server is down and the
    /// fallback is enabled, one fixed local credential pair logs in without
    /// a token. Off by default and loud on purpose; production builds must
    /// keep it disabled.
    fn offline_fallback(
        &self,
        username: &str,
        password: &str,
        error: &reqwest::Error,
    ) -> Result<Option<String>, AuthError> {
        if self.dev_fallback && username == DEV_USERNAME && password == DEV_PASSWORD {
            tracing::warn!(
                "Auth server unreachable; accepting the DEVELOPMENT fallback login. \
                 Never ship with this enabled."
            );
            return Ok(None);
        }
        Err(AuthError::Unreachable(error.to_string()))
    }
}
