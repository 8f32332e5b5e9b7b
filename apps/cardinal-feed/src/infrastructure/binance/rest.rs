//! Binance Listen Key Client
//!
//! User data stream key lifecycle over the spot REST API:
//!
//! - `POST   /api/v3/userDataStream` creates a key
//! - `PUT    /api/v3/userDataStream?listenKey=..` extends it by 60 minutes
//! - `DELETE /api/v3/userDataStream?listenKey=..` closes it
//!
//! Requests carry the API key in the `X-MBX-APIKEY` header; no signature is
//! required.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;

use crate::application::ports::{AuthError, ListenKeySource};

const USER_DATA_STREAM_PATH: &str = "/api/v3/userDataStream";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// REST client for Binance listen keys.
#[derive(Clone)]
pub struct BinanceListenKeyClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl std::fmt::Debug for BinanceListenKeyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceListenKeyClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl BinanceListenKeyClient {
    /// Create a client for `base_url` (e.g. `https://api.binance.com`).
    ///
    /// # Errors
    ///
    /// Returns `MissingCredentials` for an empty API key and `Transport` if
    /// the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, AuthError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    async fn request(&self, method: Method, key: Option<&str>) -> Result<String, AuthError> {
        let url = format!("{}{USER_DATA_STREAM_PATH}", self.base_url);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(API_KEY_HEADER, &self.api_key);
        if let Some(key) = key {
            request = request.query(&[("listenKey", key)]);
        }

        tracing::debug!(
            method = %method,
            endpoint = USER_DATA_STREAM_PATH,
            "Binance listen key request"
        );

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(rejection(status, &body));
        }
        Ok(body)
    }
}

fn rejection(status: StatusCode, body: &str) -> AuthError {
    let message = serde_json::from_str::<ApiError>(body).map_or_else(
        |_| body.to_string(),
        |err| format!("{} ({})", err.msg, err.code),
    );
    AuthError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ListenKeySource for BinanceListenKeyClient {
    async fn create_listen_key(&self) -> Result<String, AuthError> {
        let body = self.request(Method::POST, None).await?;
        let response: ListenKeyResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(response.listen_key)
    }

    async fn keep_alive_listen_key(&self, key: &str) -> Result<(), AuthError> {
        self.request(Method::PUT, Some(key)).await.map(|_| ())
    }

    async fn close_listen_key(&self, key: &str) -> Result<(), AuthError> {
        self.request(Method::DELETE, Some(key)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        assert_eq!(
            BinanceListenKeyClient::new("https://api.binance.com", "  ").unwrap_err(),
            AuthError::MissingCredentials
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let client = BinanceListenKeyClient::new("https://api.binance.com/", "secret").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("https://api.binance.com\""));
    }

    #[test]
    fn api_error_body_becomes_rejection_message() {
        let err = rejection(
            StatusCode::UNAUTHORIZED,
            r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#,
        );
        assert_eq!(
            err,
            AuthError::Rejected {
                status: 401,
                message: "Invalid API-key, IP, or permissions for action. (-2015)".to_string(),
            }
        );
    }

    #[test]
    fn opaque_error_body_is_kept() {
        let err = rejection(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(
            err,
            AuthError::Rejected {
                status: 502,
                message: "upstream down".to_string(),
            }
        );
    }

    #[test]
    fn listen_key_response_shape() {
        let body = r#"{"listenKey":"pqia91ma19a5s61cv6a81va65sdf19v8a65a1"}"#;
        let response: ListenKeyResponse = serde_json::from_str(body).unwrap();
        assert!(response.listen_key.starts_with("pqia"));
    }
}
