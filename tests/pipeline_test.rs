//! End-to-end runs against an in-memory storage API.
//!
//! Run with: cargo test --test pipeline_test

mod common;

use chrono::{TimeZone, Utc};
use serde_json::Value;
use tempfile::TempDir;
use tokio_test::assert_ok;

use common::{FakeStorage, config, dds75_line};
use ttn_fleet::classify::DeviceType;
use ttn_fleet::common::AppState;
use ttn_fleet::normalize::normalize_all;
use ttn_fleet::render;
use ttn_fleet::store::HistoryStore;
use ttn_fleet::sync::{DeviceStatus, run_fleet, sync_device};
use ttn_fleet::ttn::TtnClient;

fn state(dir: &TempDir, devices: &str, storage: FakeStorage) -> AppState<FakeStorage> {
    let config = config(dir.path(), devices);
    let client = TtnClient::with_transport(&config, storage);
    AppState::new(config, client)
}

#[tokio::test]
async fn dds75_scenario_ingests_normalizes_and_persists() {
    let dir = TempDir::new().unwrap();
    let body = format!(
        "{}\n{{\"received_at\": \"2025-03-01T10:0\n{}\n",
        dds75_line("2025-03-01T10:10:00Z", 1020),
        dds75_line("2025-03-01T10:00:00Z", 1000),
    );
    let state = state(&dir, "dds75-lb-001", FakeStorage::with([(200, body)]));
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap();

    let report = assert_ok!(sync_device(&state, "dds75-lb-001", now).await);

    assert_eq!(report.new_records, 2);
    assert_eq!(report.device_type, DeviceType::Dds75Lb);
    assert_eq!(report.status, DeviceStatus::Ok);
    assert_eq!(report.latest["distance_cm"], 102.0);
    assert_eq!(report.latest["temperature"], 12.4);

    let history = HistoryStore::new(&state.config.data_dir).load("dds75-lb-001");
    let times: Vec<_> = history
        .records()
        .iter()
        .map(|r| r.received_at.unwrap().to_rfc3339())
        .collect();
    assert_eq!(times, vec!["2025-03-01T10:00:00+00:00", "2025-03-01T10:10:00+00:00"]);

    let normalized = normalize_all(history.records());
    for n in &normalized {
        let mm = n.raw["Distance_mm"].as_f64().unwrap();
        assert_eq!(n.metric_f64("distance_cm"), Some(mm / 10.0));
    }
    assert_eq!(normalized[0].record.rssi, Some(-97.0));
    assert!(state.store.raw_path("dds75-lb-001").exists());
}

#[tokio::test]
async fn second_run_resumes_from_watermark_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap();
    let first_body = format!(
        "{}\n{}\n",
        dds75_line("2025-03-01T10:00:00Z", 1000),
        dds75_line("2025-03-01T10:10:00Z", 1010),
    );

    let first = state(&dir, "dds75-lb-001", FakeStorage::with([(200, first_body.clone())]));
    let report = assert_ok!(sync_device(&first, "dds75-lb-001", now).await);
    assert_eq!(report.total_records, 2);

    // Overlapping replay plus one genuinely new uplink.
    let second_body = format!("{first_body}{}\n", dds75_line("2025-03-01T10:20:00Z", 1020));
    let second = state(&dir, "dds75-lb-001", FakeStorage::with([(200, second_body)]));
    let report = assert_ok!(sync_device(&second, "dds75-lb-001", now).await);

    assert_eq!(report.new_records, 1);
    assert_eq!(report.total_records, 3);
    let requests = second.client.transport().requests();
    assert_eq!(requests[0].param("after"), Some("2025-03-01T10:10:01Z"));
    let device_path = "/api/v3/as/applications/hydro-testbed/devices/dds75-lb-001/";
    assert!(requests[0].url.starts_with(&format!("http://storage.test{device_path}")));
}

#[tokio::test]
async fn full_run_renders_every_output() {
    let dir = TempDir::new().unwrap();
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap();
    let storage = FakeStorage::with([
        (200, format!("{}\n", dds75_line("2025-03-01T10:00:00Z", 1000))),
        (401, "unauthorized".to_string()),
    ]);
    let state = state(&dir, "dds75-lb-001 pslb-02", storage);

    let report = run_fleet(&state, now).await;
    let written = assert_ok!(render::write_all(&state.config.docs_dir, &report));

    assert_eq!(written.len(), 5);
    assert!(written.iter().all(|p| p.exists()));
    assert_eq!(report.count(DeviceStatus::Ok), 1);
    assert_eq!(report.count(DeviceStatus::Error), 1);

    let health: Value = serde_json::from_str(
        &std::fs::read_to_string(state.config.docs_dir.join(render::HEALTH_JSON)).unwrap(),
    )
    .unwrap();
    assert_eq!(health["devices"][1]["device_id"], "pslb-02");
    assert_eq!(health["devices"][1]["status"], "error");
    assert_eq!(health["devices"][1]["device_type"], "PS-LB");

    let index = std::fs::read_to_string(state.config.docs_dir.join(render::INDEX_HTML)).unwrap();
    assert!(index.contains("<h2>DDS75-LB</h2>"));
    assert!(index.contains("<h2>PS-LB</h2>"));
}
