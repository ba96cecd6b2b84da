use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::classify::{DeviceType, classify};
use crate::common::AppState;
use crate::error::AppResult;
use crate::normalize::{Canonical, NormalizedRecord, normalize_all};
use crate::store::{DeviceHistory, FileSizes};
use crate::ttn::StorageTransport;
use crate::ttn::client::next_cursor;

/// Samples kept per device for the debug page.
pub const RECENT_SAMPLES: usize = 3;

/// Health of one device after a run, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DeviceStatus {
    /// The pipeline failed for this device.
    #[serde(rename = "error")]
    Error,
    /// Nothing stored and nothing pulled.
    #[serde(rename = "no data")]
    NoData,
    /// Last uplink is older than the staleness threshold.
    #[serde(rename = "stale")]
    Stale,
    /// Uplinks arrive but no decoder output (missing payload formatter).
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "ok")]
    Ok,
}

impl DeviceStatus {
    pub const ALL: [Self; 5] = [Self::Error, Self::NoData, Self::Stale, Self::Empty, Self::Ok];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::NoData => "no data",
            Self::Stale => "stale",
            Self::Empty => "empty",
            Self::Ok => "ok",
        }
    }

    /// Status of a device whose pipeline completed.
    #[must_use]
    pub fn assess(
        records: &[NormalizedRecord],
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Self {
        let last_seen = records.iter().filter_map(|n| n.record.received_at).max();
        match last_seen {
            None => Self::NoData,
            Some(t) if now - t > stale_after => Self::Stale,
            Some(_) if records.iter().all(|n| !n.record.has_payload()) => Self::Empty,
            Some(_) => Self::Ok,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One raw uplink as shown on the debug page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentSample {
    pub received_at: Option<DateTime<Utc>>,
    pub f_port: Option<u16>,
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    pub payload_json: String,
}

/// Outcome of syncing one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub device_id: String,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub total_records: usize,
    pub new_records: usize,
    /// Records received within the lookback window.
    pub window_records: usize,
    pub requests: usize,
    pub last_seen: Option<DateTime<Utc>>,
    /// Newest non-null value of every canonical metric.
    pub latest: Canonical,
    pub recent: Vec<RecentSample>,
    pub files: FileSizes,
    pub error: Option<String>,
}

impl DeviceReport {
    /// Report for a device whose pipeline returned an error.
    #[must_use]
    pub fn failed(
        device_id: &str,
        device_type: DeviceType,
        history: &DeviceHistory,
        files: FileSizes,
        error: String,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_type,
            status: DeviceStatus::Error,
            total_records: history.len(),
            new_records: 0,
            window_records: 0,
            requests: 0,
            last_seen: history.watermark(),
            latest: Canonical::new(),
            recent: Vec::new(),
            files,
            error: Some(error),
        }
    }
}

/// Pull, merge, normalize and persist one device.
///
/// The pull starts at the later of the lookback horizon and one second past
/// the stored watermark, so a re-run never requests what is already held.
///
/// # Errors
///
/// Returns an error if the storage pull fails. Persistence failures are
/// logged and do not fail the device.
pub async fn sync_device<T: StorageTransport>(
    state: &AppState<T>,
    device_id: &str,
    now: DateTime<Utc>,
) -> AppResult<DeviceReport> {
    let config = &state.config;
    let mut history = state.store.load(device_id);

    let horizon = now
        .checked_sub_signed(config.lookback())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let start = history
        .watermark()
        .map_or(horizon, |w| next_cursor(w).max(horizon));

    tracing::debug!(
        device = device_id,
        stored = history.len(),
        watermark = ?history.watermark(),
        from = %start,
        "Pulling uplinks"
    );

    let pull = state.client.fetch_uplinks(device_id, start).await?;

    if !pull.bodies.is_empty()
        && let Err(e) = state.store.capture_raw(device_id, &pull.bodies)
    {
        tracing::warn!(device = device_id, error = %e, "Failed to write raw capture");
    }

    let new_records = history.merge(pull.records);
    let normalized = normalize_all(history.records());

    if let Err(e) = state.store.save(device_id, &normalized) {
        tracing::warn!(device = device_id, error = %e, "Failed to save history");
    }

    let device_type = classify(device_id, &normalized);
    let status = DeviceStatus::assess(&normalized, now, config.stale_after());

    tracing::info!(
        device = device_id,
        device_type = %device_type,
        status = %status,
        new = new_records,
        total = normalized.len(),
        requests = pull.requests,
        "Synced device"
    );

    Ok(DeviceReport {
        device_id: device_id.to_string(),
        device_type,
        status,
        total_records: normalized.len(),
        new_records,
        window_records: normalized
            .iter()
            .filter(|n| n.record.received_at.is_some_and(|t| t >= horizon))
            .count(),
        requests: pull.requests,
        last_seen: history.watermark(),
        latest: latest_metrics(&normalized),
        recent: recent_samples(&normalized),
        files: state.store.file_sizes(device_id),
        error: None,
    })
}

/// Newest non-null value of every canonical metric across the history.
#[must_use]
pub fn latest_metrics(records: &[NormalizedRecord]) -> Canonical {
    let mut latest = Canonical::new();
    for n in records.iter().rev() {
        for (name, value) in &n.canonical {
            if !value.is_null() && !latest.contains_key(name) {
                latest.insert(name.clone(), value.clone());
            }
        }
    }
    latest
}

fn recent_samples(records: &[NormalizedRecord]) -> Vec<RecentSample> {
    records
        .iter()
        .rev()
        .take(RECENT_SAMPLES)
        .map(|n| RecentSample {
            received_at: n.record.received_at,
            f_port: n.record.f_port,
            rssi: n.record.rssi,
            snr: n.record.snr,
            payload_json: n.record.payload_json.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::testing::{ScriptedTransport, test_config, uplink_line};
    use crate::ttn::{TtnClient, UplinkRecord};
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempfile::TempDir;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, minute, 0).unwrap()
    }

    fn normalized(t: DateTime<Utc>, payload: serde_json::Value) -> NormalizedRecord {
        normalize(&UplinkRecord {
            device_id: "dds75-lb-001".to_string(),
            received_at: Some(t),
            f_port: Some(2),
            rssi: None,
            snr: None,
            payload_json: payload.to_string(),
        })
    }

    fn state(dir: &TempDir, transport: ScriptedTransport) -> AppState<ScriptedTransport> {
        let config = test_config(dir.path());
        let client = TtnClient::with_transport(&config, transport);
        AppState::new(config, client)
    }

    #[test]
    fn status_follows_precedence() {
        let stale = Duration::minutes(180);
        let now = at(12, 0);

        assert_eq!(DeviceStatus::assess(&[], now, stale), DeviceStatus::NoData);

        let old_and_empty = vec![normalized(at(1, 0), json!({}))];
        assert_eq!(DeviceStatus::assess(&old_and_empty, now, stale), DeviceStatus::Stale);

        let fresh_empty = vec![normalized(at(11, 0), json!({}))];
        assert_eq!(DeviceStatus::assess(&fresh_empty, now, stale), DeviceStatus::Empty);

        let fresh = vec![
            normalized(at(10, 0), json!({})),
            normalized(at(11, 0), json!({"Bat": 3.6})),
        ];
        assert_eq!(DeviceStatus::assess(&fresh, now, stale), DeviceStatus::Ok);
        assert!(DeviceStatus::Error < DeviceStatus::NoData);
    }

    #[test]
    fn latest_metrics_take_newest_value_per_name() {
        let records = vec![
            normalized(at(10, 0), json!({"Distance_mm": 1000, "TempC_DS18B20": 4.5})),
            normalized(at(10, 10), json!({"Distance_mm": 1200})),
        ];

        let latest = latest_metrics(&records);

        assert_eq!(latest["distance_cm"], json!(120.0));
        assert_eq!(latest["temperature"], json!(4.5));
    }

    #[tokio::test]
    async fn rerun_starts_after_watermark_and_adds_nothing() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "{}\n{}\n",
            uplink_line("dds75-lb-001", "2025-03-01T10:00:00Z", 1000),
            uplink_line("dds75-lb-001", "2025-03-01T10:10:00Z", 1010),
        );
        let now = at(11, 0);

        let first = state(&dir, ScriptedTransport::new().ok(body.clone()));
        let report = sync_device(&first, "dds75-lb-001", now).await.unwrap();
        assert_eq!(report.new_records, 2);
        assert_eq!(report.status, DeviceStatus::Ok);
        assert_eq!(report.device_type, DeviceType::Dds75Lb);
        assert_eq!(report.recent.len(), 2);

        // The server ignores the cursor and replays everything.
        let second = state(&dir, ScriptedTransport::new().ok(body));
        let report = sync_device(&second, "dds75-lb-001", now).await.unwrap();

        assert_eq!(report.new_records, 0);
        assert_eq!(report.total_records, 2);
        let requests = second.client.transport().requests();
        assert_eq!(requests[0].param("after"), Some("2025-03-01T10:10:01Z"));
    }

    #[tokio::test]
    async fn first_pull_starts_at_lookback_horizon() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, ScriptedTransport::new());

        let report = sync_device(&state, "pslb-02", at(12, 0)).await.unwrap();

        assert_eq!(report.status, DeviceStatus::NoData);
        assert_eq!(report.device_type, DeviceType::PsLb);
        let requests = state.client.transport().requests();
        assert_eq!(requests[0].param("after"), Some("2025-02-28T12:00:00Z"));
        assert!(!state.store.raw_path("pslb-02").exists());
    }

    #[tokio::test]
    async fn save_failure_is_logged_and_device_still_reports() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "{}\n{}\n",
            uplink_line("dds75-lb-001", "2025-03-01T10:00:00Z", 1000),
            uplink_line("dds75-lb-001", "2025-03-01T10:10:00Z", 1010),
        );
        let state = state(&dir, ScriptedTransport::new().ok(body));
        let csv = state.store.csv_path("dds75-lb-001");
        // A directory in the temp file's place makes the write fail.
        std::fs::create_dir_all(csv.with_extension("csv.tmp")).unwrap();

        let report = sync_device(&state, "dds75-lb-001", at(11, 0)).await.unwrap();

        assert_eq!(report.status, DeviceStatus::Ok);
        assert_eq!(report.new_records, 2);
        assert_eq!(report.total_records, 2);
        assert_eq!(report.error, None);
        assert!(!csv.exists());
        assert_eq!(report.files.csv_bytes, None);
        assert!(state.store.raw_path("dds75-lb-001").exists());
    }

    #[tokio::test]
    async fn oversized_lookback_pulls_from_the_earliest_time() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.lookback_hours = i64::MAX / 2;
        let client = TtnClient::with_transport(&config, ScriptedTransport::new());
        let state = AppState::new(config, client);

        let report = sync_device(&state, "pslb-02", at(12, 0)).await.unwrap();

        assert_eq!(report.status, DeviceStatus::NoData);
        assert_eq!(state.client.transport().requests().len(), 1);
    }
}
