//! Device type assignment.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::normalize::NormalizedRecord;
use crate::normalize::vendor::Vendor;

/// Fields a decoder may use to state the device model outright.
const EXPLICIT_TYPE_FIELDS: [&str; 4] = ["node_type", "model", "device_model", "sensor_type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DeviceType {
    #[serde(rename = "DDS75-LB")]
    Dds75Lb,
    #[serde(rename = "PS-LB")]
    PsLb,
    #[serde(rename = "SenseCAP")]
    SenseCap,
    Other,
}

impl DeviceType {
    /// Known types in tie-break order.
    pub const KNOWN: [Self; 3] = [Self::Dds75Lb, Self::PsLb, Self::SenseCap];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Dds75Lb => "DDS75-LB",
            Self::PsLb => "PS-LB",
            Self::SenseCap => "SenseCAP",
            Self::Other => "Other",
        }
    }

    /// Metrics worth showing first for this type, in display order.
    #[must_use]
    pub fn preferred_metrics(self) -> &'static [&'static str] {
        match self {
            Self::Dds75Lb => &["distance_cm", "temperature", "battery"],
            Self::PsLb => &[
                "water_cm",
                "pressure_kpa",
                "pressure_mpa",
                "diff_pressure_pa",
                "idc_input_ma",
                "vdc_input_v",
                "battery",
            ],
            Self::SenseCap => &[
                "temperature",
                "humidity",
                "pressure",
                "illumination",
                "uv_index",
                "wind_speed",
                "wind_dir",
                "rainfall",
                "battery_pct",
            ],
            Self::Other => &["temperature", "humidity", "pressure", "pm25", "co2", "battery"],
        }
    }

    /// Canonical columns only this type produces.
    #[must_use]
    pub fn signature(self) -> &'static [&'static str] {
        match self {
            Self::Dds75Lb => &[
                "distance_cm",
                "additional_distance_mm",
                "interrupt_flag",
                "sensor_flag",
            ],
            Self::PsLb => &[
                "water_cm",
                "pressure_kpa",
                "pressure_mpa",
                "diff_pressure_pa",
                "idc_input_ma",
                "vdc_input_v",
                "probe_mode",
                "in1_pin",
                "in2_pin",
            ],
            Self::SenseCap => &[
                "illumination",
                "uv_index",
                "wind_speed",
                "wind_dir",
                "rainfall",
                "battery_pct",
                "measure_interval_s",
            ],
            Self::Other => &[],
        }
    }
}

impl From<Vendor> for DeviceType {
    fn from(vendor: Vendor) -> Self {
        match vendor {
            Vendor::Dds75Lb => Self::Dds75Lb,
            Vendor::PsLb => Self::PsLb,
            Vendor::SenseCap => Self::SenseCap,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Assign one type to a device from its id and normalized history.
///
/// In order of trust: an explicit model field (newest record first), a
/// vendor fragment in the device id, the best overlap with a type's
/// signature columns, then `Other`.
#[must_use]
pub fn classify(device_id: &str, records: &[NormalizedRecord]) -> DeviceType {
    if let Some(explicit) = explicit_type(records) {
        return explicit;
    }
    if let Some(vendor) = Vendor::from_fragment(device_id) {
        return vendor.into();
    }
    signature_match(records).unwrap_or(DeviceType::Other)
}

fn explicit_type(records: &[NormalizedRecord]) -> Option<DeviceType> {
    records.iter().rev().find_map(|n| {
        EXPLICIT_TYPE_FIELDS
            .iter()
            .filter_map(|f| n.canonical.get(*f).or_else(|| n.raw.get(*f)))
            .filter_map(type_text)
            .find_map(|text| Vendor::from_fragment(&text))
            .map(DeviceType::from)
    })
}

fn type_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn signature_match(records: &[NormalizedRecord]) -> Option<DeviceType> {
    let present: BTreeSet<&str> = records
        .iter()
        .flat_map(|n| n.canonical.keys().map(String::as_str))
        .collect();

    let mut best: Option<(DeviceType, usize)> = None;
    for ty in DeviceType::KNOWN {
        let hits = ty.signature().iter().filter(|c| present.contains(*c)).count();
        if hits > 0 && best.is_none_or(|(_, top)| hits > top) {
            best = Some((ty, hits));
        }
    }
    best.map(|(ty, _)| ty)
}
