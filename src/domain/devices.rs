//! Advertisement device table
//!
//! Holds the most recent advertisement of every device seen during the
//! current scan pass.

use crate::domain::models::AdvertisingRecord;
use std::collections::HashMap;

/// Latest record per device address, in first-seen order.
#[derive(Debug, Default)]
pub struct DeviceTable {
    records: Vec<AdvertisingRecord>,
    index: HashMap<String, usize>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, replacing any earlier record with the same address.
    pub fn upsert(&mut self, record: AdvertisingRecord) {
        match self.index.get(&record.address) {
            Some(&slot) => self.records[slot] = record,
            None => {
                self.index.insert(record.address.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = AdvertisingRecord>) {
        for record in records {
            self.upsert(record);
        }
    }

    /// Must run at the start of every scan pass.
    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    pub fn get(&self, address: &str) -> Option<&AdvertisingRecord> {
        self.index.get(address).map(|&slot| &self.records[slot])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AdvertisingRecord] {
        &self.records
    }
}
