//! HTTP adapter over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::application::ports::{HttpClient, HttpError};

const USER_AGENT: &str = concat!("feed-normalizer/", env!("CARGO_PKG_VERSION"));

/// JSON `GET` client with per-request timeouts.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Request`] if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HttpError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_json(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, HttpError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(url.to_string())
            } else {
                HttpError::Decode(e.to_string())
            }
        })
    }
}

fn request_error(url: &str, error: &reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::Timeout(url.to_string())
    } else {
        HttpError::Request(error.to_string())
    }
}
