use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, SubsecRound, Utc};
use reqwest::Url;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::ttn::models::{EndDevicesResponse, UplinkRecord};
use crate::ttn::parser::{entry_count, parse_records};
use crate::ttn::transport::{
    ACCEPT_EVENT_STREAM, ACCEPT_JSON, ApiRequest, HttpTransport, RawResponse, StorageTransport,
};

/// Exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.retry_max,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based); a server hint wins but is capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        hint.unwrap_or_else(|| self.base_delay * 2_u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Result of pulling one device's storage.
#[derive(Debug, Clone)]
pub struct Pull {
    pub records: Vec<UplinkRecord>,
    /// Raw page bodies, kept for the diagnostic capture file.
    pub bodies: Vec<String>,
    pub requests: usize,
    /// Cursor the next page (or run) would start from.
    pub next_cursor: DateTime<Utc>,
}

enum PageOutcome {
    Body(String),
    NoContent,
    /// The server refused the request shape (400/422).
    Rejected(u16),
}

#[derive(Debug, Clone, Copy)]
struct RequestShape {
    limit: u32,
    with_cursor: bool,
}

pub struct TtnClient<T = HttpTransport> {
    transport: T,
    base_url: String,
    app_id: String,
    page_limit: u32,
    fallback_page_limit: u32,
    retry: RetryPolicy,
}

impl TtnClient<HttpTransport> {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &Config) -> AppResult<Self> {
        Ok(Self::with_transport(config, HttpTransport::new(config)?))
    }
}

impl<T: StorageTransport> TtnClient<T> {
    #[must_use]
    pub fn with_transport(config: &Config, transport: T) -> Self {
        Self {
            transport,
            base_url: config.base_url.clone(),
            app_id: config.app_id.clone(),
            page_limit: config.page_limit,
            fallback_page_limit: config.fallback_page_limit.min(config.page_limit),
            retry: RetryPolicy::from_config(config),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn api_url(&self, segments: &[&str]) -> AppResult<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::Api(format!("Invalid base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| {
                AppError::Api(format!("Base URL cannot hold a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }

    /// Pull every uplink of `device_id` stored at or after `after`.
    ///
    /// Pages are requested until one comes back smaller than the cap or
    /// yields no timestamp to advance on. A request shape the server
    /// rejects is narrowed (smaller cap, then no cursor) before giving up
    /// with whatever was collected so far.
    ///
    /// # Errors
    ///
    /// Returns an error when retries are exhausted on transient failures or
    /// the server answers with a non-retryable, non-shape error (401, 404, ...).
    pub async fn fetch_uplinks(&self, device_id: &str, after: DateTime<Utc>) -> AppResult<Pull> {
        let url = self.api_url(&[
            "api",
            "v3",
            "as",
            "applications",
            self.app_id.as_str(),
            "devices",
            device_id,
            "packages",
            "storage",
            "uplink_message",
        ])?;

        let mut shape = RequestShape {
            limit: self.page_limit,
            with_cursor: true,
        };
        let mut pull = Pull {
            records: Vec::new(),
            bodies: Vec::new(),
            requests: 0,
            next_cursor: after,
        };

        loop {
            let mut query = vec![("limit".to_string(), shape.limit.to_string())];
            if shape.with_cursor {
                query.push(("after".to_string(), format_cursor(pull.next_cursor)));
            }
            let request = ApiRequest {
                url: url.clone(),
                query,
                accept: ACCEPT_EVENT_STREAM,
            };

            pull.requests += 1;
            let body = match self.fetch_page(&request).await? {
                PageOutcome::NoContent => break,
                PageOutcome::Body(body) => body,
                PageOutcome::Rejected(status) => {
                    if shape.with_cursor && shape.limit > self.fallback_page_limit {
                        tracing::warn!(
                            device = device_id,
                            status,
                            limit = self.fallback_page_limit,
                            "Storage request rejected, retrying with smaller page"
                        );
                        shape.limit = self.fallback_page_limit;
                    } else if shape.with_cursor {
                        tracing::warn!(
                            device = device_id,
                            status,
                            "Storage request rejected, retrying without cursor"
                        );
                        shape.with_cursor = false;
                    } else {
                        tracing::warn!(
                            device = device_id,
                            status,
                            collected = pull.records.len(),
                            "Storage request rejected in every shape, giving up"
                        );
                        break;
                    }
                    continue;
                }
            };

            let page: Vec<UplinkRecord> = parse_records(device_id, &body).collect();
            let page_len = entry_count(&body);
            let page_max = page.iter().filter_map(|r| r.received_at).max();

            tracing::debug!(
                device = device_id,
                page = pull.requests,
                entries = page_len,
                records = page.len(),
                max = ?page_max,
                "Fetched storage page"
            );

            pull.bodies.push(body);
            pull.records.extend(page);

            let Some(max) = page_max else { break };
            let cursor = next_cursor(max);
            if !shape.with_cursor {
                // Without a cursor there is no way to ask for the next page.
                pull.next_cursor = pull.next_cursor.max(cursor);
                break;
            }
            if cursor > pull.next_cursor {
                pull.next_cursor = cursor;
            } else {
                tracing::warn!(device = device_id, %max, "Page did not advance the cursor");
                break;
            }

            if page_len < shape.limit as usize {
                break;
            }
        }

        Ok(pull)
    }

    /// List the device ids registered in the application.
    ///
    /// # Errors
    ///
    /// Returns an error if any listing page fails.
    pub async fn list_devices(&self) -> AppResult<Vec<String>> {
        let url = self.api_url(&["api", "v3", "applications", self.app_id.as_str(), "devices"])?;
        let mut devices = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("limit".to_string(), self.page_limit.to_string())];
            if let Some(token) = &page_token {
                query.push(("page_token".to_string(), token.clone()));
            }
            let request = ApiRequest {
                url: url.clone(),
                query,
                accept: ACCEPT_JSON,
            };

            let body = match self.fetch_page(&request).await? {
                PageOutcome::Body(body) => body,
                PageOutcome::NoContent => break,
                PageOutcome::Rejected(status) => {
                    return Err(AppError::Api(format!("Device listing rejected (HTTP {status})")));
                }
            };

            let page: EndDevicesResponse = serde_json::from_str(&body).map_err(|e| {
                tracing::error!(
                    error = %e,
                    body_preview = %preview(&body),
                    "Failed to parse device listing"
                );
                AppError::Api(format!("Failed to parse device listing: {e}"))
            })?;
            devices.extend(page.end_devices.into_iter().map(|d| d.ids.device_id));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) if page_token.as_deref() != Some(token.as_str()) => {
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        tracing::info!(count = devices.len(), "Discovered devices");
        Ok(devices)
    }

    /// One request with retry on transient failures.
    async fn fetch_page(&self, request: &ApiRequest) -> AppResult<PageOutcome> {
        let mut attempt = 0;

        loop {
            let (reason, hint) = match self.transport.get(request).await {
                Ok(RawResponse { status: 204, .. }) => return Ok(PageOutcome::NoContent),
                Ok(RawResponse { status, body, .. }) if (200..300).contains(&status) => {
                    return Ok(if body.trim().is_empty() {
                        PageOutcome::NoContent
                    } else {
                        PageOutcome::Body(body)
                    });
                }
                Ok(RawResponse { status, body, .. }) if status == 400 || status == 422 => {
                    tracing::debug!(
                        status,
                        body_preview = %preview(&body),
                        "Request shape rejected"
                    );
                    return Ok(PageOutcome::Rejected(status));
                }
                Ok(RawResponse {
                    status,
                    retry_after,
                    ..
                }) if status == 429 || status >= 500 => {
                    let reason = if status == 429 {
                        "Rate limited (429)".to_string()
                    } else {
                        format!("HTTP {status}")
                    };
                    (reason, retry_after)
                }
                Ok(RawResponse { status, body, .. }) => {
                    return Err(AppError::Api(format!("HTTP {status}: {}", preview(&body))));
                }
                Err(e) if e.is_transient() => (e.to_string(), None),
                Err(e) => return Err(e),
            };

            if attempt >= self.retry.max_retries {
                tracing::error!(
                    url = %request.url,
                    reason = %reason,
                    retries = attempt,
                    "Request failed after max retries"
                );
                return Err(AppError::Api(format!(
                    "{reason} (after {attempt} retries)"
                )));
            }

            let delay = self.retry.delay_for(attempt, hint);
            tracing::warn!(
                url = %request.url,
                reason = %reason,
                retry = attempt + 1,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// The first instant strictly after `max_seen` to request from.
///
/// One second past the maximum, rounded up to a whole second so that the
/// second-precision wire format never moves it back below `max_seen + 1s`.
#[must_use]
pub fn next_cursor(max_seen: DateTime<Utc>) -> DateTime<Utc> {
    let next = max_seen + ChronoDuration::seconds(1);
    let whole = next.trunc_subsecs(0);
    if whole < next {
        whole + ChronoDuration::seconds(1)
    } else {
        whole
    }
}

/// RFC 3339 UTC with second precision, as the `after` parameter expects.
#[must_use]
pub fn format_cursor(cursor: DateTime<Utc>) -> String {
    cursor.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn preview(body: &str) -> String {
    body.chars().take(300).collect()
}
