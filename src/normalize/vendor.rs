use serde::Serialize;

use crate::normalize::FlatRow;
use crate::normalize::rules::{DDS75_LB, PS_LB, Rule};
use crate::normalize::sensecap;

/// Sensor families with a dedicated rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Vendor {
    Dds75Lb,
    PsLb,
    SenseCap,
}

static SENSECAP: &[Rule] = &[Rule::Extract(sensecap::extract)];

impl Vendor {
    /// Fixed precedence order when no vendor was sniffed first.
    pub const ALL: [Self; 3] = [Self::Dds75Lb, Self::PsLb, Self::SenseCap];

    #[must_use]
    pub fn rules(self) -> &'static [Rule] {
        match self {
            Self::Dds75Lb => DDS75_LB,
            Self::PsLb => PS_LB,
            Self::SenseCap => SENSECAP,
        }
    }

    /// Raw keys that only this vendor's decoder emits.
    #[must_use]
    pub fn signature_keys(self) -> &'static [&'static str] {
        match self {
            Self::Dds75Lb => &["Distance_mm", "TempC_DS18B20", "Additional_Distance_mm"],
            Self::PsLb => &["Water_deep_cm", "Water_pressure_kPa", "IDC_intput_mA", "Probe_mod"],
            Self::SenseCap => &["data.messages", "messages"],
        }
    }

    /// Recognize a vendor from a device id or model name fragment.
    ///
    /// Matching ignores case and punctuation, so `dds75-lb-001`, `DDS75_LB`
    /// and `Dragino DDS75-LB` all resolve.
    #[must_use]
    pub fn from_fragment(text: &str) -> Option<Self> {
        let folded: String = text
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if folded.contains("dds75") {
            Some(Self::Dds75Lb)
        } else if folded.contains("pslb") {
            Some(Self::PsLb)
        } else if folded.contains("sensecap") {
            Some(Self::SenseCap)
        } else {
            None
        }
    }

    /// Best guess for one record: the device id first, then signature keys.
    #[must_use]
    pub fn sniff(device_id: &str, raw: &FlatRow) -> Option<Self> {
        Self::from_fragment(device_id).or_else(|| {
            Self::ALL
                .into_iter()
                .find(|v| v.signature_keys().iter().any(|k| raw.contains_key(*k)))
        })
    }

    /// Vendor tables in application order, `first` leading.
    pub fn ordered(first: Option<Self>) -> impl Iterator<Item = Self> {
        first
            .into_iter()
            .chain(Self::ALL.into_iter().filter(move |v| Some(*v) != first))
    }
}
