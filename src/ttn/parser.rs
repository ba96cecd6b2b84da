//! Storage Integration response parsing.
//!
//! The storage endpoint answers in one of three framings depending on the
//! `Accept` header and cluster version:
//!
//! - newline-delimited JSON, one uplink per line
//! - Server-Sent Events, each uplink on a `data:` line
//! - a wrapper object `{"result": {...}}` around each uplink
//!
//! Parsing is best-effort: blank lines, SSE control lines and anything that
//! is not a JSON object are skipped without error.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::json::ValueExt;
use crate::ttn::models::UplinkRecord;

const SSE_DATA: &str = "data:";
const SSE_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Lazily yield every uplink object contained in a response body.
pub fn uplink_objects(body: &str) -> impl Iterator<Item = Value> + '_ {
    // A body that is one complete JSON document (possibly pretty-printed) is
    // taken as a whole; anything else is read line by line.
    let whole: Vec<Value> = match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Array(items)) => items,
        Ok(value) => vec![value],
        Err(_) => Vec::new(),
    };
    let line_mode = whole.is_empty();

    whole
        .into_iter()
        .filter_map(unwrap_envelope)
        .chain(
            body.lines()
                .filter(move |_| line_mode)
                .filter_map(parse_line),
        )
}

/// Parse the records of one device out of a response body.
///
/// Records whose timestamp cannot be resolved are still yielded with
/// `received_at: None`; the history merge drops them.
pub fn parse_records<'a>(
    device_id: &'a str,
    body: &'a str,
) -> impl Iterator<Item = UplinkRecord> + 'a {
    uplink_objects(body).filter_map(move |entry| to_record(device_id, &entry))
}

/// Number of entries the server sent in a body, whether or not they parse.
///
/// Pagination compares this with the page cap: a full page with a broken
/// line is still a full page.
#[must_use]
pub fn entry_count(body: &str) -> usize {
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Array(items)) => items.len(),
        Ok(_) => 1,
        Err(_) => body.lines().filter_map(entry_text).count(),
    }
}

/// The JSON text of a line, or `None` for blank lines and SSE control lines.
fn entry_text(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') || SSE_FIELDS.iter().any(|f| line.starts_with(f)) {
        return None;
    }
    Some(line.strip_prefix(SSE_DATA).map_or(line, str::trim_start))
}

fn parse_line(line: &str) -> Option<Value> {
    let json = entry_text(line)?;
    serde_json::from_str(json).ok().and_then(unwrap_envelope)
}

fn unwrap_envelope(value: Value) -> Option<Value> {
    let Value::Object(mut map) = value else {
        return None;
    };
    match map.remove("result") {
        Some(inner @ Value::Object(_)) => Some(inner),
        Some(other) => {
            map.insert("result".to_string(), other);
            Some(Value::Object(map))
        }
        None => Some(Value::Object(map)),
    }
}

/// Best available receive time of an uplink.
///
/// Priority: record `received_at`, then `uplink_message.received_at`, then
/// the earliest gateway metadata time, then the record's `created_at`. The
/// first candidate that parses as RFC 3339 wins.
#[must_use]
pub fn pick_timestamp(entry: &Value) -> Option<DateTime<Utc>> {
    parse_time(entry.str_at(&["received_at"]))
        .or_else(|| parse_time(entry.str_at(&["uplink_message", "received_at"])))
        .or_else(|| earliest_gateway_time(entry))
        .or_else(|| parse_time(entry.str_at(&["created_at"])))
}

fn earliest_gateway_time(entry: &Value) -> Option<DateTime<Utc>> {
    entry
        .array_at(&["uplink_message", "rx_metadata"])?
        .iter()
        .filter_map(|rx| {
            parse_time(rx.str_at(&["time"])).or_else(|| parse_time(rx.str_at(&["received_at"])))
        })
        .min()
}

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Project one uplink object onto a record of `device_id`.
///
/// Returns `None` when the object names a different device.
#[must_use]
pub fn to_record(device_id: &str, entry: &Value) -> Option<UplinkRecord> {
    if let Some(id) = entry.str_at(&["end_device_ids", "device_id"])
        && id != device_id
    {
        return None;
    }

    let uplink = entry.at(&["uplink_message"]);
    let gateway = uplink
        .and_then(|u| u.array_at(&["rx_metadata"]))
        .and_then(|rx| rx.first());
    let payload = uplink
        .and_then(|u| u.at(&["decoded_payload"]))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    Some(UplinkRecord {
        device_id: device_id.to_string(),
        received_at: pick_timestamp(entry),
        f_port: uplink
            .and_then(|u| u.at(&["f_port"]))
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok()),
        rssi: gateway.and_then(|rx| rx.f64_at(&["rssi"]).or_else(|| rx.f64_at(&["channel_rssi"]))),
        snr: gateway.and_then(|rx| rx.f64_at(&["snr"])),
        payload_json: payload.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uplink(ts: &str, distance: u32) -> String {
        json!({
            "end_device_ids": {"device_id": "dds75-lb-001"},
            "received_at": ts,
            "uplink_message": {
                "f_port": 2,
                "decoded_payload": {"Distance_mm": distance, "Bat": 3.6},
                "rx_metadata": [{"rssi": -97, "snr": 7.5}]
            }
        })
        .to_string()
    }

    #[test]
    fn ndjson_with_blank_and_truncated_lines_yields_valid_entries() {
        let body = format!(
            "{}\n\n{}\n{{\"received_at\": \"2025-01-01T00:0\n",
            uplink("2025-01-01T10:00:00Z", 1000),
            uplink("2025-01-01T10:10:00Z", 1010),
        );

        let records: Vec<_> = parse_records("dds75-lb-001", &body).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].f_port, Some(2));
        assert_eq!(records[0].rssi, Some(-97.0));
        assert_eq!(records[1].snr, Some(7.5));
    }

    #[test]
    fn sse_framing_is_stripped() {
        let body = format!(
            ": keepalive\nevent: message\ndata: {}\n\ndata: {}\n",
            uplink("2025-01-01T10:00:00Z", 1000),
            uplink("2025-01-01T10:10:00Z", 1010),
        );
        assert_eq!(uplink_objects(&body).count(), 2);
    }

    #[test]
    fn result_envelope_is_unwrapped_per_line_and_whole_body() {
        let inner = uplink("2025-01-01T10:00:00Z", 1000);
        let line_body = format!("{{\"result\": {inner}}}\n{{\"result\": {inner}}}");
        let objects: Vec<_> = uplink_objects(&line_body).collect();
        assert_eq!(objects.len(), 2);
        assert!(objects[0].at(&["uplink_message"]).is_some());

        let pretty = serde_json::to_string_pretty(&json!({
            "result": serde_json::from_str::<Value>(&inner).unwrap()
        }))
        .unwrap();
        let records: Vec<_> = parse_records("dds75-lb-001", &pretty).collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].received_at.is_some());
    }

    #[test]
    fn timestamp_falls_back_in_priority_order() {
        let message_level = json!({
            "uplink_message": {"received_at": "2025-01-01T10:00:01Z"},
            "created_at": "2025-01-01T09:00:00Z"
        });
        assert_eq!(
            pick_timestamp(&message_level).unwrap().to_rfc3339(),
            "2025-01-01T10:00:01+00:00"
        );

        let gateways = json!({
            "uplink_message": {"rx_metadata": [
                {"time": "2025-01-01T10:00:03Z"},
                {"time": "not a time"},
                {"time": "2025-01-01T10:00:02Z"}
            ]},
            "created_at": "2025-01-01T09:00:00Z"
        });
        assert_eq!(
            pick_timestamp(&gateways).unwrap().to_rfc3339(),
            "2025-01-01T10:00:02+00:00"
        );

        let created = json!({"created_at": "2025-01-01T09:00:00.5+01:00"});
        assert_eq!(
            pick_timestamp(&created).unwrap().to_rfc3339(),
            "2025-01-01T08:00:00.500+00:00"
        );

        assert!(pick_timestamp(&json!({"received_at": "yesterday"})).is_none());
    }

    #[test]
    fn foreign_device_entries_are_skipped() {
        let other = json!({
            "end_device_ids": {"device_id": "pslb-02"},
            "received_at": "2025-01-01T10:00:00Z"
        })
        .to_string();
        assert_eq!(parse_records("dds75-lb-001", &other).count(), 0);
    }

    #[test]
    fn entry_count_includes_unparsable_lines() {
        let body = format!(
            ": keepalive\n\ndata: {}\n{{\"received_at\": \"2025-01-01T00:0\n",
            uplink("2025-01-01T10:00:00Z", 1000),
        );
        assert_eq!(entry_count(&body), 2);
        assert_eq!(uplink_objects(&body).count(), 1);

        let array = format!("[{0}, {0}, 7]", uplink("2025-01-01T10:00:00Z", 1000));
        assert_eq!(entry_count(&array), 3);
        assert_eq!(entry_count("[]"), 0);
    }

    #[test]
    fn missing_payload_becomes_empty_object() {
        let bare = json!({"received_at": "2025-01-01T10:00:00Z"}).to_string();
        let record = parse_records("dds75-lb-001", &bare).next().unwrap();
        assert_eq!(record.payload_json, "{}");
        assert!(!record.has_payload());
    }
}
