//! Shared fixtures for unit tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::ttn::transport::{ApiRequest, RawResponse, StorageTransport};

/// Replays canned responses in order and records every request.
/// Once the script runs out it answers 204.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<AppResult<RawResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(self, body: impl Into<String>) -> Self {
        self.push(Ok(RawResponse {
            status: 200,
            retry_after: None,
            body: body.into(),
        }))
    }

    pub fn status(self, status: u16, body: &str) -> Self {
        self.push(Ok(RawResponse {
            status,
            retry_after: None,
            body: body.to_string(),
        }))
    }

    pub fn transport_error(self) -> Self {
        self.push(Err(AppError::Transport("connection reset".to_string())))
    }

    fn push(self, response: AppResult<RawResponse>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageTransport for ScriptedTransport {
    async fn get(&self, request: &ApiRequest) -> AppResult<RawResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(RawResponse {
                status: 204,
                retry_after: None,
                body: String::new(),
            }))
    }
}

/// Configuration with instant retries and no inter-device delay.
pub fn test_config(data_dir: &Path) -> Config {
    let data_dir = data_dir.to_string_lossy().into_owned();
    let docs_dir = Path::new(&data_dir).join("docs").to_string_lossy().into_owned();
    Config::from_lookup(|key| {
        let value = match key {
            "TTN_APP_ID" => "test-app",
            "TTN_REGION" => "eu1",
            "TTN_API_KEY" => "NNSXS.test",
            "TTN_BASE_URL" => "http://ttn.test",
            "RETRY_MAX" => "2",
            "RETRY_BASE_DELAY_MS" | "RETRY_MAX_DELAY_MS" | "DEVICE_DELAY_MS" => "0",
            "DATA_DIR" => data_dir.as_str(),
            "DOCS_DIR" => docs_dir.as_str(),
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap()
}

/// One NDJSON storage line from a DDS75-LB style decoder.
pub fn uplink_line(device: &str, received_at: &str, distance_mm: u32) -> String {
    json!({
        "end_device_ids": {"device_id": device},
        "received_at": received_at,
        "uplink_message": {
            "f_port": 2,
            "decoded_payload": {"Distance_mm": distance_mm, "Bat": 3.6},
            "rx_metadata": [{"rssi": -101, "snr": 6.25}]
        }
    })
    .to_string()
}
