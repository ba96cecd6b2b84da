//! Field mapping rules.
//!
//! Every rule is a pure function from a flattened payload to a partial set of
//! canonical fields. Precedence between rules is decided by the reducer in
//! [`crate::normalize`], never by the rules themselves.

use serde_json::Value;

use crate::json::{as_f64, number};
use crate::normalize::FlatRow;

/// Values above this are taken to be pascals rather than hectopascals.
pub const PASCAL_THRESHOLD: f64 = 2000.0;

/// Canonical fields derived by one rule, in derivation order.
pub type Partial = Vec<(String, Value)>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Convert {
    /// Numeric, unchanged.
    Number,
    /// Numeric, divided by the factor (unit change such as mm to cm).
    Divide(f64),
    /// Barometric pressure, rescaled to hPa when the magnitude says pascals.
    Pressure,
    /// Passed through as-is (pin levels, model names).
    Keep,
    /// Lists and objects serialized to JSON text; scalars kept.
    JsonText,
}

impl Convert {
    #[must_use]
    pub fn apply(self, raw: &Value) -> Option<Value> {
        match self {
            Self::Number => as_f64(raw).and_then(number),
            Self::Divide(factor) => as_f64(raw).and_then(|v| number(v / factor)),
            Self::Pressure => as_f64(raw).map(to_hectopascal).and_then(number),
            Self::Keep => Some(raw.clone()).filter(|v| !v.is_null()),
            Self::JsonText => match raw {
                Value::Null => None,
                Value::Array(_) | Value::Object(_) => Some(Value::String(raw.to_string())),
                scalar => Some(scalar.clone()),
            },
        }
    }
}

/// Rescale a pressure reading to hectopascals.
#[must_use]
pub fn to_hectopascal(value: f64) -> f64 {
    if value > PASCAL_THRESHOLD {
        value / 100.0
    } else {
        value
    }
}

/// "If raw column `source` is present, derive `target` from it."
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    pub source: &'static str,
    pub target: &'static str,
    pub convert: Convert,
}

#[derive(Debug, Clone, Copy)]
pub enum Rule {
    Field(FieldRule),
    /// Structural extraction that does not fit a one-column mapping.
    Extract(fn(&FlatRow) -> Partial),
}

impl Rule {
    #[must_use]
    pub fn apply(&self, raw: &FlatRow) -> Partial {
        match self {
            Self::Field(rule) => raw
                .get(rule.source)
                .and_then(|v| rule.convert.apply(v))
                .map(|v| vec![(rule.target.to_string(), v)])
                .unwrap_or_default(),
            Self::Extract(extract) => extract(raw),
        }
    }
}

const fn field(source: &'static str, target: &'static str, convert: Convert) -> Rule {
    Rule::Field(FieldRule {
        source,
        target,
        convert,
    })
}

const fn num(source: &'static str, target: &'static str) -> Rule {
    field(source, target, Convert::Number)
}

/// Dragino DDS75-LB ultrasonic distance sensor.
pub static DDS75_LB: &[Rule] = &[
    num("Bat", "battery"),
    num("BAT", "battery"),
    field("Distance_mm", "distance_cm", Convert::Divide(10.0)),
    field("Additional_Distance_mm", "additional_distance_mm", Convert::JsonText),
    num("TempC_DS18B20", "temperature"),
    num("Interrupt_flag", "interrupt_flag"),
    num("Sensor_flag", "sensor_flag"),
    field("Node_type", "node_type", Convert::Keep),
];

/// Dragino PS-LB pressure / water level sensor.
pub static PS_LB: &[Rule] = &[
    num("Bat_V", "battery"),
    num("BAT", "battery"),
    num("Water_deep_cm", "water_cm"),
    num("Water_pressure_kPa", "pressure_kpa"),
    num("Water_pressure_MPa", "pressure_mpa"),
    num("Differential_pressure_Pa", "diff_pressure_pa"),
    num("VDC_intput_V", "vdc_input_v"),
    num("IDC_intput_mA", "idc_input_ma"),
    num("Probe_mod", "probe_mode"),
    field("IN1_pin_level", "in1_pin", Convert::Keep),
    field("IN2_pin_level", "in2_pin", Convert::Keep),
    field("Exti_pin_level", "exti_pin", Convert::Keep),
    field("Exti_status", "exti_status", Convert::Keep),
    num("SENSOR_MODEL", "sensor_model"),
    num("FIRMWARE_VERSION", "fw_version"),
    num("FREQUENCY_BAND", "freq_band"),
    num("SUB_BAND", "sub_band"),
    field("DATALOG", "datalog_pslb", Convert::JsonText),
];

/// Fallback names used by hand-written decoders.
pub static GENERIC: &[Rule] = &[
    num("temperature", "temperature"),
    num("temp", "temperature"),
    num("t", "temperature"),
    num("humidity", "humidity"),
    num("rh", "humidity"),
    num("battery", "battery"),
    num("vbat", "battery"),
    field("pressure", "pressure", Convert::Pressure),
    field("p", "pressure", Convert::Pressure),
    num("pm25", "pm25"),
    num("co2", "co2"),
    num("no2", "no2"),
    num("o3", "o3"),
];
