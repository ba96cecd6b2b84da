//! Per-device history persistence.
//!
//! Each device owns two files under the data directory:
//!
//! - `{device}.csv`: the merged history, base columns followed by every
//!   canonical metric column. Canonical columns are for readers of the file;
//!   they are ignored on load and derived again.
//! - `{device}_raw.ndjson`: the response bodies of the last pull, kept for
//!   diagnosing decoder and parser problems.

mod history;

pub use history::DeviceHistory;

use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use csv::StringRecord;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::normalize::NormalizedRecord;
use crate::ttn::UplinkRecord;

pub const BASE_COLUMNS: [&str; 6] = [
    "device_id",
    "received_at",
    "f_port",
    "rssi",
    "snr",
    "payload_json",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileSizes {
    pub csv_bytes: Option<u64>,
    pub raw_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    data_dir: PathBuf,
}

impl HistoryStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.data_dir)
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn csv_path(&self, device_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", file_stem(device_id)))
    }

    #[must_use]
    pub fn raw_path(&self, device_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}_raw.ndjson", file_stem(device_id)))
    }

    /// Load the stored history of a device.
    ///
    /// Never fails: a missing, unreadable or malformed file is treated as an
    /// empty history so the next pull can rebuild it.
    #[must_use]
    pub fn load(&self, device_id: &str) -> DeviceHistory {
        let path = self.csv_path(device_id);
        match read_history(&path, device_id) {
            Ok(records) => {
                tracing::debug!(device = device_id, count = records.len(), "Loaded history");
                DeviceHistory::from_records(records)
            }
            Err(AppError::Csv(e)) if is_not_found(&e) => {
                tracing::debug!(device = device_id, "No stored history");
                DeviceHistory::new()
            }
            Err(e) => {
                tracing::warn!(
                    device = device_id,
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable history file"
                );
                DeviceHistory::new()
            }
        }
    }

    /// Rewrite the history file of a device.
    ///
    /// The file is written next to its final location and renamed into place,
    /// so an interrupted run leaves the previous version intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written or renamed.
    pub fn save(&self, device_id: &str, records: &[NormalizedRecord]) -> AppResult<()> {
        fs::create_dir_all(&self.data_dir)?;

        let path = self.csv_path(device_id);
        let tmp = path.with_extension("csv.tmp");

        let metrics: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.canonical.keys().map(String::as_str))
            .collect();

        let mut writer = csv::Writer::from_path(&tmp)?;
        writer.write_record(BASE_COLUMNS.iter().copied().chain(metrics.iter().copied()))?;
        for n in records {
            let r = &n.record;
            let mut row = vec![
                r.device_id.clone(),
                r.received_at.map(format_time).unwrap_or_default(),
                r.f_port.map(|p| p.to_string()).unwrap_or_default(),
                r.rssi.map(|v| v.to_string()).unwrap_or_default(),
                r.snr.map(|v| v.to_string()).unwrap_or_default(),
                r.payload_json.clone(),
            ];
            row.extend(
                metrics
                    .iter()
                    .map(|m| n.canonical.get(*m).map(cell).unwrap_or_default()),
            );
            writer.write_record(&row)?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp, &path)?;
        tracing::debug!(
            device = device_id,
            count = records.len(),
            path = %path.display(),
            "Saved history"
        );
        Ok(())
    }

    /// Keep the bodies of the last pull for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn capture_raw(&self, device_id: &str, bodies: &[String]) -> AppResult<()> {
        fs::create_dir_all(&self.data_dir)?;
        let mut file = fs::File::create(self.raw_path(device_id))?;
        for body in bodies {
            let body = body.trim_end();
            if body.is_empty() {
                continue;
            }
            file.write_all(body.as_bytes())?;
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    #[must_use]
    pub fn file_sizes(&self, device_id: &str) -> FileSizes {
        let size = |p: PathBuf| fs::metadata(p).ok().map(|m| m.len());
        FileSizes {
            csv_bytes: size(self.csv_path(device_id)),
            raw_bytes: size(self.raw_path(device_id)),
        }
    }
}

/// File-system safe form of a device id.
#[must_use]
pub fn file_stem(device_id: &str) -> String {
    let stem: String = device_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem.to_string()
    }
}

#[must_use]
pub fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_not_found(e: &csv::Error) -> bool {
    matches!(e.kind(), csv::ErrorKind::Io(io) if io.kind() == ErrorKind::NotFound)
}

fn read_history(path: &Path, device_id: &str) -> AppResult<Vec<UplinkRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let (Some(time_col), Some(payload_col)) = (column("received_at"), column("payload_json"))
    else {
        return Err(AppError::History(
            "missing received_at or payload_json column".to_string(),
        ));
    };
    let id_col = column("device_id");
    let port_col = column("f_port");
    let rssi_col = column("rssi");
    let snr_col = column("snr");

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row?;
        // Distinct ids can share a file stem; rows of another device are not ours.
        let row_device = field(&row, id_col).unwrap_or(device_id);
        if row_device != device_id {
            tracing::debug!(
                device = device_id,
                row_device,
                row = line + 1,
                "Skipping row of another device"
            );
            continue;
        }

        let received_at = field(&row, Some(time_col))
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        AppError::History(format!("row {}: bad received_at {s:?}: {e}", line + 1))
                    })
            })
            .transpose()?;

        records.push(UplinkRecord {
            device_id: row_device.to_string(),
            received_at,
            f_port: parse_optional(&row, port_col, line)?,
            rssi: parse_optional(&row, rssi_col, line)?,
            snr: parse_optional(&row, snr_col, line)?,
            payload_json: field(&row, Some(payload_col)).unwrap_or("{}").to_string(),
        });
    }
    Ok(records)
}

fn field(row: &StringRecord, col: Option<usize>) -> Option<&str> {
    col.and_then(|c| row.get(c)).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_optional<T>(row: &StringRecord, col: Option<usize>, line: usize) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    field(row, col)
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| AppError::History(format!("row {}: bad value {s:?}: {e}", line + 1)))
        })
        .transpose()
}
