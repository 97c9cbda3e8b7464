use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{RemovalReason, SessionEvent};
use super::records::{MemorySessionRecords, SessionRecords};
use super::session::{Session, SessionSnapshot};
use crate::config::SessionConfig;
use crate::error::ServerError;

/// Capacity of the event channel. Slow subscribers lag rather than block.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `max_sessions` sessions are already active.
    #[error("maximum number of sessions reached")]
    Full,

    #[error("could not persist session record: {0}")]
    Persistence(#[source] anyhow::Error),
}

struct Reaper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    session_timeout: Duration,
    records: Arc<dyn SessionRecords>,
    events: broadcast::Sender<SessionEvent>,
    reaper: Mutex<Option<Reaper>>,
}

/// Registry of active sessions.
///
/// Cheap to clone; all clones share the same store. One mutex guards the
/// collection and is only held for lookups, inserts and removals. Record
/// persistence, logging and event delivery happen after it is released.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_records(config, Arc::new(MemorySessionRecords::new()))
    }

    pub fn with_records(config: &SessionConfig, records: Arc<dyn SessionRecords>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                max_sessions: config.max_sessions,
                session_timeout: config.session_timeout(),
                records,
                events,
                reaper: Mutex::new(None),
            }),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.inner.max_sessions
    }

    pub fn session_timeout(&self) -> Duration {
        self.inner.session_timeout
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Starts the reaper task. It wakes every session timeout and evicts
    /// idle, unreferenced sessions.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut reaper = self.inner.reaper.lock();
        if reaper.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let cancel = CancellationToken::new();
        let interval = if self.inner.session_timeout.is_zero() {
            Duration::from_millis(10)
        } else {
            self.inner.session_timeout
        };
        let handle = tokio::spawn(run_reaper(
            Arc::downgrade(&self.inner),
            interval,
            cancel.clone(),
        ));

        *reaper = Some(Reaper { cancel, handle });
        tracing::debug!(timeout_ms = interval.as_millis() as u64, "session reaper started");
        Ok(())
    }

    /// Invalidates every session, then stops the reaper.
    pub async fn stop(&self) {
        let reaper = self.inner.reaper.lock().take();

        if let Some(reaper) = &reaper {
            reaper.cancel.cancel();
        }

        let guids: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        for guid in guids {
            self.invalidate_session(&guid);
        }

        if let Some(reaper) = reaper {
            if let Err(e) = reaper.handle.await {
                tracing::warn!(error = %e, "session reaper ended abnormally");
            }
        }

        self.inner.sessions.lock().clear();
    }

    pub fn is_running(&self) -> bool {
        self.inner.reaper.lock().is_some()
    }

    /// Admits a new session.
    ///
    /// The external record is created first; if the store turns out to be
    /// full the record is deleted again.
    pub fn add_session(
        &self,
        user_guid: &str,
        user_agent: &str,
        remote_address: &str,
    ) -> Result<Arc<Session>, SessionError> {
        let guid = Uuid::new_v4().to_string();
        let record_id = self
            .inner
            .records
            .create(&guid)
            .map_err(SessionError::Persistence)?;

        let session = Arc::new(Session::new(
            guid.clone(),
            user_guid.to_string(),
            remote_address.to_string(),
            user_agent.to_string(),
            record_id,
        ));

        let admitted = {
            let mut sessions = self.inner.sessions.lock();
            if sessions.len() < self.inner.max_sessions {
                sessions.insert(guid.clone(), session.clone());
                true
            } else {
                false
            }
        };

        if !admitted {
            self.delete_record(record_id);
            tracing::warn!(user = %user_guid, remote = %remote_address, "session rejected, server full");
            return Err(SessionError::Full);
        }

        tracing::info!(session = %guid, user = %user_guid, remote = %remote_address, "logged on");
        let _ = self.inner.events.send(SessionEvent::Added {
            session: session.snapshot(),
        });

        Ok(session)
    }

    /// Removes a session on an administrator's request.
    pub fn kick_session(&self, guid: &str) -> bool {
        self.remove_session(guid, RemovalReason::Kicked)
    }

    /// Removes a session on logout.
    pub fn invalidate_session(&self, guid: &str) -> bool {
        self.remove_session(guid, RemovalReason::Invalidated)
    }

    pub fn find_session_by_guid(&self, guid: &str) -> Option<Arc<Session>> {
        self.inner.sessions.lock().get(guid).cloned()
    }

    /// The session with `guid`, provided it was created from `remote_address`.
    pub fn match_session(&self, guid: &str, remote_address: &str) -> Option<Arc<Session>> {
        self.find_session_by_guid(guid)
            .filter(|session| session.remote_address() == remote_address)
    }

    /// Pins a session so the reaper leaves it alone.
    pub fn reference_session(&self, session: &Session) {
        session.add_reference();
    }

    pub fn dereference_session(&self, session: &Session) {
        session.remove_reference();
    }

    pub fn touch(&self, session: &Session) {
        session.touch();
    }

    pub fn set_attribute(&self, session: &Session, name: &str, value: impl Into<String>) {
        session.set_attribute(name, value.into());
    }

    pub fn remove_attribute(&self, session: &Session, name: &str) -> Option<String> {
        session.remove_attribute(name)
    }

    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Session>> = self.inner.sessions.lock().values().cloned().collect();
        sessions.iter().map(|s| s.snapshot()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Sessions of `user_guid`, optionally only those from `remote_address`.
    pub fn count_user_sessions(&self, user_guid: &str, remote_address: Option<&str>) -> usize {
        self.inner
            .sessions
            .lock()
            .values()
            .filter(|s| s.user_guid() == user_guid)
            .filter(|s| remote_address.is_none_or(|addr| s.remote_address() == addr))
            .count()
    }

    /// Evicts idle, unreferenced sessions. Returns how many were removed.
    pub fn expire_idle_sessions(&self) -> usize {
        let timeout = self.inner.session_timeout;

        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.inner.sessions.lock();
            let guids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.is_expired(timeout))
                .map(|(guid, _)| guid.clone())
                .collect();
            guids.iter().filter_map(|g| sessions.remove(g)).collect()
        };

        for session in &expired {
            self.finish_removal(session, RemovalReason::TimedOut);
        }

        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "expired idle sessions");
        }
        expired.len()
    }

    fn remove_session(&self, guid: &str, reason: RemovalReason) -> bool {
        let removed = self.inner.sessions.lock().remove(guid);
        match removed {
            Some(session) => {
                self.finish_removal(&session, reason);
                true
            }
            None => false,
        }
    }

    fn finish_removal(&self, session: &Session, reason: RemovalReason) {
        self.delete_record(session.record_id());

        tracing::info!(
            session = %session.guid(),
            user = %session.user_guid(),
            remote = %session.remote_address(),
            reason = %reason,
            "session removed"
        );

        let _ = self.inner.events.send(SessionEvent::Removed {
            session: session.snapshot(),
            reason,
        });
    }

    fn delete_record(&self, record_id: i64) {
        if let Err(e) = self.inner.records.delete(record_id) {
            tracing::warn!(record = record_id, error = %e, "could not delete session record");
        }
    }
}

async fn run_reaper(inner: Weak<Inner>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        SessionManager { inner }.expire_idle_sessions();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.session_count())
            .field("max_sessions", &self.inner.max_sessions)
            .field("session_timeout", &self.inner.session_timeout)
            .finish()
    }
}
