//! Fixtures shared by the integration tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use ttn_fleet::config::Config;
use ttn_fleet::error::AppResult;
use ttn_fleet::ttn::transport::{ApiRequest, RawResponse, StorageTransport};

/// In-memory storage API: answers each request with the next canned body,
/// then 204 once the script is exhausted.
#[derive(Default)]
pub struct FakeStorage {
    bodies: Mutex<VecDeque<(u16, String)>>,
    seen: Mutex<Vec<ApiRequest>>,
}

impl FakeStorage {
    pub fn with(responses: impl IntoIterator<Item = (u16, String)>) -> Self {
        Self {
            bodies: Mutex::new(responses.into_iter().collect()),
            seen: Mutex::default(),
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageTransport for FakeStorage {
    async fn get(&self, request: &ApiRequest) -> AppResult<RawResponse> {
        self.seen.lock().unwrap().push(request.clone());
        let (status, body) = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((204, String::new()));
        Ok(RawResponse {
            status,
            retry_after: None,
            body,
        })
    }
}

pub fn config(dir: &Path, devices: &str) -> Config {
    let data_dir = dir.join("data").to_string_lossy().into_owned();
    let docs_dir = dir.join("docs").to_string_lossy().into_owned();
    let devices = devices.to_string();
    Config::from_lookup(move |key| {
        let value = match key {
            "TTN_APP_ID" => "hydro-testbed",
            "TTN_REGION" => "eu1",
            "TTN_API_KEY" => "NNSXS.integration",
            "TTN_BASE_URL" => "http://storage.test/",
            "DEVICES" => devices.as_str(),
            "RETRY_BASE_DELAY_MS" | "RETRY_MAX_DELAY_MS" | "DEVICE_DELAY_MS" => "0",
            "DATA_DIR" => data_dir.as_str(),
            "DOCS_DIR" => docs_dir.as_str(),
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap()
}

pub fn dds75_line(received_at: &str, distance_mm: u32) -> String {
    json!({
        "end_device_ids": {"device_id": "dds75-lb-001", "dev_eui": "A84041000181C7E4"},
        "received_at": received_at,
        "uplink_message": {
            "f_port": 2,
            "decoded_payload": {
                "Bat": 3.61,
                "Distance_mm": distance_mm,
                "Interrupt_flag": 0,
                "Sensor_flag": 1,
                "TempC_DS18B20": "12.40"
            },
            "rx_metadata": [{"gateway_ids": {"gateway_id": "gw-1"}, "rssi": -97, "snr": 8.5}]
        }
    })
    .to_string()
}
