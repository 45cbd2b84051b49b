//! Per-run cache of built user records keyed by identity key.

use std::collections::HashMap;

use tracing::trace;

use crate::models::UserRecord;

/// Identity key to record, preserving first-seen order.
///
/// Lives for one resolution run. Group memberships only ever accumulate.
#[derive(Debug, Default)]
pub struct DedupCache {
    index: HashMap<String, usize>,
    records: Vec<UserRecord>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&UserRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert a record. An existing record under the same key is kept and
    /// only gains the new record's groups.
    pub fn put(&mut self, key: &str, record: UserRecord) {
        match self.index.get(key) {
            Some(&i) => {
                for group in &record.groups {
                    self.records[i].add_group(group);
                }
            }
            None => {
                self.index.insert(key.to_string(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Record `group` for `key`. Unknown keys and repeated groups are ignored.
    pub fn append_group(&mut self, key: &str, group: &str) {
        let Some(&i) = self.index.get(key) else {
            trace!(key, group, "append_group for unknown key ignored");
            return;
        };
        self.records[i].add_group(group);
    }

    pub fn records(&self) -> &[UserRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<UserRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
