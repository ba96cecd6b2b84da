use async_trait::async_trait;
use reqwest::{Client, header};
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub const ACCEPT_EVENT_STREAM: &str = "text/event-stream";
pub const ACCEPT_JSON: &str = "application/json";

/// A GET request against the TTN API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub accept: &'static str,
}

impl ApiRequest {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a completed exchange; non-2xx statuses are not errors here.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// The seam between the retrieval logic and the network.
///
/// Implementations return `AppError::Transport` for network-level failures
/// (connect, timeout, broken body); every HTTP status comes back as a
/// `RawResponse`.
#[async_trait]
pub trait StorageTransport: Send + Sync {
    async fn get(&self, request: &ApiRequest) -> AppResult<RawResponse>;
}

pub struct HttpTransport {
    http_client: Client,
    bearer_token: String,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> AppResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            bearer_token: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl StorageTransport for HttpTransport {
    async fn get(&self, request: &ApiRequest) -> AppResult<RawResponse> {
        let response = self
            .http_client
            .get(&request.url)
            .query(&request.query)
            .bearer_auth(&self.bearer_token)
            .header(header::ACCEPT, request.accept)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Transport(format!("Failed to get response text: {e}")))?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}
