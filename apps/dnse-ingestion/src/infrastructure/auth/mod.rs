//! DNSE Auth Client
//!
//! HTTP adapter for the `AuthPort`:
//!
//! - `POST {base}/api/auth` with `{username, password}` returns `{token}`
//! - `GET {base}/api/me` with a bearer token returns `{investorId}`
//!
//! Non-2xx responses and empty fields are errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::application::ports::{AuthError, AuthPort};
use crate::infrastructure::config::AuthSettings;

const AUTH_PATH: &str = "/api/auth";
const ME_PATH: &str = "/api/me";

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvestorInfo {
    #[serde(default)]
    investor_id: String,
}

/// `reqwest` implementation of `AuthPort`.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: Client,
    base_url: String,
}

impl HttpAuthClient {
    /// Create a client for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport {
                endpoint: AUTH_PATH,
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a client from settings.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` if the HTTP client cannot be built.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthError> {
        Self::new(settings.base_url.clone(), settings.timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl AuthPort for HttpAuthClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(self.url(AUTH_PATH))
            .json(&AuthRequest { username, password })
            .send()
            .await
            .map_err(|e| transport(AUTH_PATH, &e))?;

        let body: AuthResponse = decode(AUTH_PATH, response).await?;
        if body.token.is_empty() {
            return Err(AuthError::EmptyField("token"));
        }

        tracing::debug!(token_len = body.token.len(), "Token issued");
        Ok(body.token)
    }

    async fn resolve_identity(&self, token: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .get(self.url(ME_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport(ME_PATH, &e))?;

        let body: InvestorInfo = decode(ME_PATH, response).await?;
        if body.investor_id.is_empty() {
            return Err(AuthError::EmptyField("investorId"));
        }

        Ok(body.investor_id)
    }
}

fn transport(endpoint: &'static str, e: &reqwest::Error) -> AuthError {
    AuthError::Transport {
        endpoint,
        message: e.to_string(),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<T, AuthError> {
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Status {
            endpoint,
            status: status.as_u16(),
        });
    }

    response.json().await.map_err(|e| AuthError::Decode {
        endpoint,
        message: e.to_string(),
    })
}
