use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug)]
struct Activity {
    last_accessed: Instant,
    last_accessed_at: DateTime<Utc>,
    references: usize,
}

/// An authenticated caller.
///
/// Sessions are owned by the [`SessionManager`](super::SessionManager).
/// Everything reachable through `&Session` outside this crate is read-only;
/// touching, pinning and attribute changes go through the manager.
#[derive(Debug)]
pub struct Session {
    guid: String,
    user_guid: String,
    remote_address: String,
    user_agent: String,
    created_at: DateTime<Utc>,
    record_id: i64,
    activity: Mutex<Activity>,
    attributes: Mutex<HashMap<String, String>>,
}

impl Session {
    pub(crate) fn new(
        guid: String,
        user_guid: String,
        remote_address: String,
        user_agent: String,
        record_id: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            guid,
            user_guid,
            remote_address,
            user_agent,
            created_at: now,
            record_id,
            activity: Mutex::new(Activity {
                last_accessed: Instant::now(),
                last_accessed_at: now,
                references: 0,
            }),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn user_guid(&self) -> &str {
        &self.user_guid
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Id of the external record created for this session.
    pub fn record_id(&self) -> i64 {
        self.record_id
    }

    pub fn references(&self) -> usize {
        self.activity.lock().references
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.activity.lock().last_accessed_at
    }

    pub fn idle_time(&self) -> Duration {
        self.activity.lock().last_accessed.elapsed()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.lock().get(name).cloned()
    }

    /// Unpinned and idle for longer than `timeout`.
    pub(crate) fn is_expired(&self, timeout: Duration) -> bool {
        let activity = self.activity.lock();
        activity.references == 0 && activity.last_accessed.elapsed() > timeout
    }

    pub(crate) fn touch(&self) {
        let mut activity = self.activity.lock();
        activity.last_accessed = Instant::now();
        activity.last_accessed_at = Utc::now();
    }

    pub(crate) fn add_reference(&self) {
        let mut activity = self.activity.lock();
        activity.references += 1;
        activity.last_accessed = Instant::now();
        activity.last_accessed_at = Utc::now();
    }

    pub(crate) fn remove_reference(&self) {
        let mut activity = self.activity.lock();
        activity.references = activity.references.saturating_sub(1);
        activity.last_accessed = Instant::now();
        activity.last_accessed_at = Utc::now();
    }

    pub(crate) fn set_attribute(&self, name: &str, value: String) {
        self.attributes.lock().insert(name.to_string(), value);
    }

    pub(crate) fn remove_attribute(&self, name: &str) -> Option<String> {
        self.attributes.lock().remove(name)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let activity = self.activity.lock();
        SessionSnapshot {
            guid: self.guid.clone(),
            user_guid: self.user_guid.clone(),
            remote_address: self.remote_address.clone(),
            user_agent: self.user_agent.clone(),
            created_at: self.created_at,
            last_accessed_at: activity.last_accessed_at,
            references: activity.references,
            record_id: self.record_id,
            attributes: self.attributes.lock().clone(),
        }
    }
}

/// Point-in-time copy of a session, safe to hold without any lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub guid: String,
    pub user_guid: String,
    pub remote_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub references: usize,
    pub record_id: i64,
    pub attributes: HashMap<String, String>,
}
