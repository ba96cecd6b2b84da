use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One uplink observation from one device.
///
/// `payload_json` is the decoder output serialized with sorted keys, so two
/// copies of the same uplink always produce the same text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkRecord {
    pub device_id: String,
    /// `None` when no usable timestamp was found; such records never reach history.
    pub received_at: Option<DateTime<Utc>>,
    pub f_port: Option<u16>,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    pub payload_json: String,
}

/// Dedup identity of a record: (device, timestamp, port, payload text).
pub type RecordIdentity<'a> = (&'a str, Option<DateTime<Utc>>, Option<u16>, &'a str);

impl UplinkRecord {
    #[must_use]
    pub fn identity(&self) -> RecordIdentity<'_> {
        (
            &self.device_id,
            self.received_at,
            self.f_port,
            &self.payload_json,
        )
    }

    /// Decoded payload as a JSON tree; unparsable text yields an empty object.
    #[must_use]
    pub fn payload(&self) -> Value {
        serde_json::from_str(&self.payload_json).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Whether the decoder produced anything at all.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        match self.payload() {
            Value::Object(map) => !map.is_empty(),
            Value::Null => false,
            _ => true,
        }
    }
}

/// Response from `/api/v3/applications/{app}/devices`
#[derive(Debug, Clone, Deserialize)]
pub struct EndDevicesResponse {
    #[serde(default)]
    pub end_devices: Vec<EndDevice>,
    /// Opaque continuation token; absent or empty on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndDevice {
    pub ids: EndDeviceIds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndDeviceIds {
    pub device_id: String,
}
