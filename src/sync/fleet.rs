use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::classify::{DeviceType, classify};
use crate::common::AppState;
use crate::config::DeviceSource;
use crate::normalize::normalize_all;
use crate::sync::worker::{DeviceReport, DeviceStatus, sync_device};
use crate::ttn::StorageTransport;

/// Everything the renderers need about one run.
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub app_id: String,
    pub generated_at: DateTime<Utc>,
    pub devices: Vec<DeviceReport>,
    /// Device ids per assigned type, in processing order.
    pub groups: BTreeMap<DeviceType, Vec<String>>,
    /// Run-level problems worth surfacing on the dashboard.
    pub notes: Vec<String>,
}

impl FleetReport {
    #[must_use]
    pub fn count(&self, status: DeviceStatus) -> usize {
        self.devices.iter().filter(|d| d.status == status).count()
    }

    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<&DeviceReport> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }
}

/// Device ids to process this run: sorted, unique, filtered.
///
/// A failing discovery call is reported as a note and yields no devices.
pub async fn resolve_devices<T: StorageTransport>(
    state: &AppState<T>,
) -> (Vec<String>, Vec<String>) {
    let mut notes = Vec::new();

    let mut devices = match &state.config.devices {
        DeviceSource::Listed(list) => list.clone(),
        DeviceSource::Discover => match state.client.list_devices().await {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(error = %e, "Device discovery failed");
                notes.push(format!("Device discovery failed: {e}"));
                Vec::new()
            }
        },
    };

    let before = devices.len();
    devices.retain(|d| state.config.admits(d));
    devices.sort();
    devices.dedup();

    if devices.len() < before {
        tracing::debug!(kept = devices.len(), listed = before, "Applied device filters");
    }
    if devices.is_empty() {
        notes.push("No devices selected".to_string());
    }

    (devices, notes)
}

/// Sync every selected device, one at a time.
///
/// A device that fails is recorded with status `error` and the run moves on.
pub async fn run_fleet<T: StorageTransport>(
    state: &AppState<T>,
    now: DateTime<Utc>,
) -> FleetReport {
    let (device_ids, notes) = resolve_devices(state).await;

    tracing::info!(count = device_ids.len(), "Starting fleet sync");

    let mut report = FleetReport {
        app_id: state.config.app_id.clone(),
        generated_at: now,
        devices: Vec::with_capacity(device_ids.len()),
        groups: BTreeMap::new(),
        notes,
    };

    for (i, device_id) in device_ids.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(state.config.device_delay()).await;
        }

        let device = match sync_device(state, device_id, now).await {
            Ok(device) => device,
            Err(e) => {
                tracing::error!(device = %device_id, error = %e, "Device sync failed");
                let history = state.store.load(device_id);
                let device_type = classify(device_id, &normalize_all(history.records()));
                DeviceReport::failed(
                    device_id,
                    device_type,
                    &history,
                    state.store.file_sizes(device_id),
                    e.to_string(),
                )
            }
        };

        report
            .groups
            .entry(device.device_type)
            .or_default()
            .push(device.device_id.clone());
        report.devices.push(device);
    }

    tracing::info!(
        devices = report.devices.len(),
        ok = report.count(DeviceStatus::Ok),
        stale = report.count(DeviceStatus::Stale),
        empty = report.count(DeviceStatus::Empty),
        no_data = report.count(DeviceStatus::NoData),
        errors = report.count(DeviceStatus::Error),
        "Fleet sync completed"
    );

    report
}
