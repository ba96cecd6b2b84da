use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::ttn::UplinkRecord;

/// All known records of one device, sorted by receive time, free of duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceHistory {
    records: Vec<UplinkRecord>,
}

impl DeviceHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_records(records: Vec<UplinkRecord>) -> Self {
        let mut history = Self::new();
        history.merge(records);
        history
    }

    /// Union `incoming` into the history and return how many records were added.
    ///
    /// Records already held win over re-fetched copies with the same identity.
    /// Records without a timestamp are dropped. Ordering is stable, so equal
    /// timestamps keep their arrival order.
    pub fn merge<I>(&mut self, incoming: I) -> usize
    where
        I: IntoIterator<Item = UplinkRecord>,
    {
        let before = self.records.len();

        let mut combined = std::mem::take(&mut self.records);
        combined.extend(incoming);
        combined.retain(|r| r.received_at.is_some());

        let keep: Vec<bool> = {
            let mut seen = HashSet::with_capacity(combined.len());
            combined.iter().map(|r| seen.insert(r.identity())).collect()
        };
        let mut keep = keep.into_iter();
        combined.retain(|_| keep.next().unwrap_or(false));

        combined.sort_by_key(|r| r.received_at);
        self.records = combined;

        self.records.len().saturating_sub(before)
    }

    #[must_use]
    pub fn records(&self) -> &[UplinkRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<UplinkRecord> {
        self.records
    }

    /// Latest ingested receive time.
    #[must_use]
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.records.last().and_then(|r| r.received_at)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
