//! SenseCAP measurement-list extraction.
//!
//! SenseCAP decoders report `data.messages` (or a top-level `messages`) as a
//! list of measurement entries, sometimes nested one list per channel. An
//! entry is either `{"type": <label>, "measurementValue": <v>}` or an object
//! keyed directly by label (`{"measureInterval": 3600}`).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::json::{coerce_number, number};
use crate::normalize::FlatRow;
use crate::normalize::rules::{Partial, to_hectopascal};

const MESSAGE_COLUMNS: [&str; 2] = ["data.messages", "messages"];

const PRESSURE: &str = "pressure";

/// Measurement label to canonical name.
pub static LABELS: &[(&str, &str)] = &[
    ("Air Temperature", "temperature"),
    ("Air Humidity", "humidity"),
    ("Light Intensity", "illumination"),
    ("UV Index", "uv_index"),
    ("Wind Speed", "wind_speed"),
    ("Wind Direction Sensor", "wind_dir"),
    ("Rain Gauge", "rainfall"),
    ("Barometric Pressure", PRESSURE),
    ("Battery(%)", "battery_pct"),
    ("measureInterval", "measure_interval_s"),
    ("gpsInterval", "gps_interval_s"),
    ("status", "status"),
    ("channelType", "channel_type"),
    ("sensorEui", "sensor_eui"),
    ("errCode", "sensor_error_code"),
];

fn canonical_name(label: &str) -> Option<&'static str> {
    LABELS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, canonical)| *canonical)
}

/// Derive canonical fields from the measurement list of a flattened payload.
#[must_use]
pub fn extract(raw: &FlatRow) -> Partial {
    let Some(messages) = MESSAGE_COLUMNS.iter().find_map(|c| raw.get(*c)) else {
        return Vec::new();
    };

    let mut latest: BTreeMap<&'static str, Value> = BTreeMap::new();
    let mut entries = Vec::new();
    collect_entries(messages, &mut entries);

    for entry in entries {
        let typed = entry.get("type").and_then(Value::as_str).zip(entry.get("measurementValue"));
        if let Some((label, value)) = typed {
            record(&mut latest, label, value);
            continue;
        }
        for (label, value) in entry {
            record(&mut latest, label, value);
        }
    }

    latest
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn collect_entries<'a>(node: &'a Value, out: &mut Vec<&'a serde_json::Map<String, Value>>) {
    match node {
        Value::Array(items) => items.iter().for_each(|item| collect_entries(item, out)),
        Value::Object(entry) => out.push(entry),
        _ => {}
    }
}

fn record(latest: &mut BTreeMap<&'static str, Value>, label: &str, value: &Value) {
    let Some(name) = canonical_name(label) else {
        return;
    };
    let Some(value) = measurement(value) else {
        return;
    };
    let value = match (name, value.as_f64()) {
        (PRESSURE, Some(v)) => number(to_hectopascal(v)).unwrap_or(value),
        _ => value,
    };
    latest.insert(name, value);
}

fn measurement(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Number(n) => n.as_f64().and_then(number),
        Value::String(s) => Some(
            coerce_number(s)
                .and_then(number)
                .unwrap_or_else(|| value.clone()),
        ),
        other => Some(other.clone()),
    }
}
