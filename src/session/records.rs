use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

/// External storage for session records.
///
/// Used for durability and audit only. The store never reads records back.
pub trait SessionRecords: Send + Sync {
    /// Creates a record for `session_guid` and returns its id.
    fn create(&self, session_guid: &str) -> anyhow::Result<i64>;

    fn delete(&self, record_id: i64) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct MemorySessionRecords {
    next_id: AtomicI64,
    records: Mutex<HashMap<i64, String>>,
}

impl MemorySessionRecords {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn contains(&self, session_guid: &str) -> bool {
        self.records.lock().values().any(|g| g == session_guid)
    }
}

impl Default for MemorySessionRecords {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRecords for MemorySessionRecords {
    fn create(&self, session_guid: &str) -> anyhow::Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.records.lock().insert(id, session_guid.to_string());
        Ok(id)
    }

    fn delete(&self, record_id: i64) -> anyhow::Result<()> {
        match self.records.lock().remove(&record_id) {
            Some(_) => Ok(()),
            None => anyhow::bail!("no session record with id {}", record_id),
        }
    }
}
