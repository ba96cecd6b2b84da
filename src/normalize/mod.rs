//! Payload normalization.
//!
//! A decoded payload goes through three stages:
//!
//! 1. [`flatten::flatten`] turns the JSON tree into one column per leaf.
//! 2. [`flatten::coerce_numeric`] turns numeric-looking text into numbers.
//!    This runs before any rule, so rules always see numeric semantics.
//! 3. The rule tables run in order (sniffed vendor, remaining vendors,
//!    generic). Each rule returns a partial set of canonical fields and the
//!    reducer keeps the first value written for every name.

pub mod flatten;
pub mod rules;
pub mod sensecap;
pub mod vendor;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::json::as_f64;
use crate::ttn::UplinkRecord;

use self::flatten::{coerce_numeric, flatten};
use self::rules::{GENERIC, Partial, Rule};
use self::vendor::Vendor;

/// Flattened decoded payload, keyed by dotted path.
pub type FlatRow = BTreeMap<String, Value>;

/// Canonical metric name to value.
pub type Canonical = BTreeMap<String, Value>;

/// A record together with its flattened payload and derived metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub record: UplinkRecord,
    pub vendor: Option<Vendor>,
    pub raw: FlatRow,
    pub canonical: Canonical,
}

impl NormalizedRecord {
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&Value> {
        self.canonical.get(name)
    }

    #[must_use]
    pub fn metric_f64(&self, name: &str) -> Option<f64> {
        self.metric(name).and_then(as_f64)
    }
}

#[must_use]
pub fn normalize(record: &UplinkRecord) -> NormalizedRecord {
    let raw = coerce_numeric(flatten(&record.payload()));
    let vendor = Vendor::sniff(&record.device_id, &raw);
    let canonical = derive(&raw, vendor, Canonical::new());

    NormalizedRecord {
        record: record.clone(),
        vendor,
        raw,
        canonical,
    }
}

#[must_use]
pub fn normalize_all(records: &[UplinkRecord]) -> Vec<NormalizedRecord> {
    records.iter().map(normalize).collect()
}

/// Run every rule over `raw`, on top of an existing canonical set.
///
/// Fields already present in `existing` are never replaced, so deriving twice
/// gives the same result as deriving once.
#[must_use]
pub fn derive(raw: &FlatRow, vendor: Option<Vendor>, existing: Canonical) -> Canonical {
    rule_order(vendor).fold(existing, |canonical, rule| reduce(canonical, rule.apply(raw)))
}

fn rule_order(vendor: Option<Vendor>) -> impl Iterator<Item = &'static Rule> {
    Vendor::ordered(vendor)
        .flat_map(|v| v.rules().iter())
        .chain(GENERIC.iter())
}

fn reduce(mut canonical: Canonical, partial: Partial) -> Canonical {
    for (name, value) in partial {
        canonical.entry(name).or_insert(value);
    }
    canonical
}
