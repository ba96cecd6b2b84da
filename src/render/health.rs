//! Machine-readable run health, for monitors and CI checks.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classify::DeviceType;
use crate::error::{AppError, AppResult};
use crate::render::format_instant;
use crate::sync::{DeviceStatus, FleetReport};

#[derive(Debug, Clone, Serialize)]
pub struct HealthRow {
    pub device_id: String,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub records: usize,
    pub new_records: usize,
    pub window_records: usize,
    pub last_seen: Option<DateTime<Utc>>,
    pub age_minutes: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub app_id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: BTreeMap<&'static str, usize>,
    pub devices: Vec<HealthRow>,
    pub notes: Vec<String>,
}

#[must_use]
pub fn rows(report: &FleetReport) -> Vec<HealthRow> {
    report
        .devices
        .iter()
        .map(|d| HealthRow {
            device_id: d.device_id.clone(),
            device_type: d.device_type,
            status: d.status,
            records: d.total_records,
            new_records: d.new_records,
            window_records: d.window_records,
            last_seen: d.last_seen,
            age_minutes: d.last_seen.map(|t| (report.generated_at - t).num_minutes()),
            error: d.error.clone(),
        })
        .collect()
}

#[must_use]
pub fn build(report: &FleetReport) -> HealthReport {
    HealthReport {
        app_id: report.app_id.clone(),
        generated_at: report.generated_at,
        summary: DeviceStatus::ALL
            .iter()
            .map(|s| (s.label(), report.count(*s)))
            .collect(),
        devices: rows(report),
        notes: report.notes.clone(),
    }
}

/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_json(report: &FleetReport) -> AppResult<String> {
    Ok(serde_json::to_string_pretty(&build(report))?)
}

/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_csv(report: &FleetReport) -> AppResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows(report) {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| AppError::History(format!("health.csv is not UTF-8: {e}")))
}

#[must_use]
pub fn to_text(report: &FleetReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} @ {}",
        report.app_id,
        format_instant(Some(report.generated_at))
    );
    for (status, count) in build(report).summary {
        let _ = writeln!(out, "{status:>8}: {count}");
    }
    out.push('\n');
    for row in rows(report) {
        let _ = writeln!(
            out,
            "{:<24} {:<9} {:<8} {:>6}  {}{}",
            row.device_id,
            row.device_type.label(),
            row.status.label(),
            row.records,
            format_instant(row.last_seen),
            row.error.map(|e| format!("  ({e})")).unwrap_or_default(),
        );
    }
    for note in &report.notes {
        let _ = writeln!(out, "note: {note}");
    }
    out
}
