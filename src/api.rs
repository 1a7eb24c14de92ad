//! HTTP client for the backend's REST endpoints.
//!
//! Login exchanges turn an OAuth code or a wallet signature into an
//! [`Exchange`] the [`SessionManager`](crate::session::SessionManager)
//! establishes. The remaining calls are bearer-authenticated profile
//! operations.

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::constants;
use crate::session::Exchange;

/// Errors from backend calls.
#[derive(Debug)]
pub enum ApiError {
    /// The request could not be sent or the body not read.
    Http(reqwest::Error),
    /// The backend answered `401`; the credential is no longer valid.
    Unauthorized,
    /// The backend answered with another non-success status.
    Status(u16),
    /// The body did not carry the fields a successful exchange needs.
    InvalidResponse(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => write!(f, "HTTP request failed: {e}"),
            Self::Unauthorized => write!(f, "Unauthorized (credential rejected)"),
            Self::Status(code) => write!(f, "HTTP error! status: {code}"),
            Self::InvalidResponse(msg) => write!(f, "Invalid response from server: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

/// Body of `POST /api/user/code`.
#[derive(Debug, Deserialize)]
struct CodeExchangeResponse {
    #[serde(default)]
    success: bool,
    token: Option<String>,
    user: Option<Value>,
}

/// Body of `POST /api/v1/user/metamask-auth`.
#[derive(Debug, Deserialize)]
struct SignatureExchangeResponse {
    #[serde(default)]
    success: bool,
    jwt: Option<String>,
    user: Option<Value>,
}

/// Client for the backend REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    backend_url: String,
}

impl ApiClient {
    /// Creates a client for `backend_url` with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(backend_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, backend_url))
    }

    /// Creates a client around a pre-configured `reqwest::Client`.
    pub fn with_client(client: Client, backend_url: impl Into<String>) -> Self {
        Self {
            client,
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Backend base URL.
    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.backend_url, path)
    }

    /// Exchange an OAuth authorization code and its PKCE verifier.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success statuses, or a body without
    /// `success`, `token` and `user`.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<Exchange, ApiError> {
        log::info!("[Api] Exchanging authorization code");
        let response = self
            .client
            .post(self.url("/api/user/code"))
            .json(&json!({ "code": code, "code_verifier": code_verifier }))
            .send()
            .await?;

        let body: CodeExchangeResponse = check_status(response)?.json().await?;
        match body {
            CodeExchangeResponse {
                success: true,
                token: Some(token),
                user: Some(user),
            } => Ok(Exchange {
                credential: token,
                identity: user,
            }),
            _ => Err(ApiError::InvalidResponse(
                "expected success, token and user".to_string(),
            )),
        }
    }

    /// Exchange a signed wallet message.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success statuses, or a body without
    /// `success`, `user` and `jwt`.
    pub async fn exchange_signature(
        &self,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<Exchange, ApiError> {
        log::info!("[Api] Exchanging wallet signature for {address}");
        let response = self
            .client
            .post(self.url("/api/v1/user/metamask-auth"))
            .json(&json!({
                "address": address,
                "message": message,
                "signature": signature,
            }))
            .send()
            .await?;

        let body: SignatureExchangeResponse = check_status(response)?.json().await?;
        match body {
            SignatureExchangeResponse {
                success: true,
                jwt: Some(jwt),
                user: Some(user),
            } => Ok(Exchange {
                credential: jwt,
                identity: user,
            }),
            _ => Err(ApiError::InvalidResponse(
                "expected success, user and jwt".to_string(),
            )),
        }
    }

    /// Fetch the profile of the credential's owner.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unauthorized`] on `401`.
    pub async fn fetch_profile(&self, token: &str) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(self.url("/api/v1/user/profile"))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(check_status(response)?.json().await?)
    }

    /// Add `points` to the user's balance.
    pub async fn add_points(&self, token: &str, points: i64) -> Result<(), ApiError> {
        self.post_authed(token, "/api/v1/user/points", json!({ "points": points }))
            .await
    }

    /// Add one fitcoin.
    pub async fn add_fitcoin(&self, token: &str) -> Result<(), ApiError> {
        self.post_authed(token, "/api/v1/fitcoin", json!({})).await
    }

    /// Register a wallet address with the user.
    pub async fn register_wallet(&self, token: &str, address: &str) -> Result<(), ApiError> {
        self.post_authed(
            token,
            "/api/v1/user/ethereum-address",
            json!({ "address": address }),
        )
        .await
    }

    async fn post_authed(&self, token: &str, path: &str, body: Value) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check_status(response)?;
        log::debug!("[Api] POST {path} ok");
        Ok(())
    }
}

fn check_status(response: Response) -> Result<Response, ApiError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
        status => {
            log::warn!("[Api] {} returned {}", response.url().path(), status);
            Err(ApiError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_url_trailing_slash_trimmed() {
        let client = ApiClient::new("http://localhost:4000/").unwrap();
        assert_eq!(client.backend_url(), "http://localhost:4000");
        assert_eq!(client.url("/api/user/code"), "http://localhost:4000/api/user/code");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ApiError::Status(500).to_string(), "HTTP error! status: 500");
    }
}
