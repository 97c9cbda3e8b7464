use std::sync::Arc;
use std::time::Duration;

use vibe_streamer::config::SessionConfig;
use vibe_streamer::session::{
    MemorySessionRecords, RemovalReason, SessionError, SessionEvent, SessionManager,
    SessionRecords,
};

fn config(max_sessions: usize, timeout_ms: u64) -> SessionConfig {
    SessionConfig {
        max_sessions,
        session_timeout_ms: timeout_ms,
    }
}

struct FailingRecords;

impl SessionRecords for FailingRecords {
    fn create(&self, _session_guid: &str) -> anyhow::Result<i64> {
        anyhow::bail!("database unavailable")
    }

    fn delete(&self, _record_id: i64) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_add_and_find_session() {
    let records = Arc::new(MemorySessionRecords::new());
    let manager = SessionManager::with_records(&config(10, 45_000), records.clone());

    let session = manager.add_session("u1", "vlc/3.0", "10.0.0.5").unwrap();

    assert_eq!(session.user_guid(), "u1");
    assert_eq!(session.user_agent(), "vlc/3.0");
    assert_eq!(session.remote_address(), "10.0.0.5");
    assert_eq!(session.references(), 0);
    assert!(records.contains(session.guid()));

    let found = manager.find_session_by_guid(session.guid()).unwrap();
    assert!(Arc::ptr_eq(&found, &session));
    assert_eq!(manager.session_count(), 1);
}

#[tokio::test]
async fn test_guids_are_unique() {
    let manager = SessionManager::new(&config(10, 45_000));
    let a = manager.add_session("u1", "", "10.0.0.5").unwrap();
    let b = manager.add_session("u1", "", "10.0.0.5").unwrap();
    assert_ne!(a.guid(), b.guid());
}

#[tokio::test]
async fn test_match_session_requires_same_remote_address() {
    let manager = SessionManager::new(&config(10, 45_000));
    let session = manager.add_session("u1", "", "10.0.0.5").unwrap();

    assert!(manager.match_session(session.guid(), "10.0.0.5").is_some());
    assert!(manager.match_session(session.guid(), "10.0.0.6").is_none());
    assert!(manager.match_session("no-such-guid", "10.0.0.5").is_none());
}

#[tokio::test]
async fn test_full_store_rejects_and_deletes_record() {
    let records = Arc::new(MemorySessionRecords::new());
    let manager = SessionManager::with_records(&config(1, 45_000), records.clone());

    manager.add_session("u1", "", "10.0.0.5").unwrap();
    let err = manager.add_session("u2", "", "10.0.0.6").unwrap_err();

    assert!(matches!(err, SessionError::Full));
    assert_eq!(manager.session_count(), 1);
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_persistence_failure_admits_nothing() {
    let manager = SessionManager::with_records(&config(10, 45_000), Arc::new(FailingRecords));

    let err = manager.add_session("u1", "", "10.0.0.5").unwrap_err();
    assert!(matches!(err, SessionError::Persistence(_)));
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test]
async fn test_reference_counting_is_balanced() {
    let manager = SessionManager::new(&config(10, 45_000));
    let session = manager.add_session("u1", "", "10.0.0.5").unwrap();

    manager.reference_session(&session);
    manager.reference_session(&session);
    assert_eq!(session.references(), 2);

    manager.dereference_session(&session);
    manager.dereference_session(&session);
    assert_eq!(session.references(), 0);

    // Never goes negative.
    manager.dereference_session(&session);
    assert_eq!(session.references(), 0);
}

#[tokio::test]
async fn test_kick_and_invalidate_publish_events() {
    let records = Arc::new(MemorySessionRecords::new());
    let manager = SessionManager::with_records(&config(10, 45_000), records.clone());
    let mut events = manager.subscribe();

    let a = manager.add_session("u1", "", "10.0.0.5").unwrap();
    let b = manager.add_session("u2", "", "10.0.0.6").unwrap();

    assert!(manager.kick_session(a.guid()));
    assert!(!manager.kick_session(a.guid()));
    assert!(manager.invalidate_session(b.guid()));
    assert_eq!(manager.session_count(), 0);
    assert!(records.is_empty());

    let mut removed = Vec::new();
    for _ in 0..4 {
        match events.recv().await.unwrap() {
            SessionEvent::Added { .. } => {}
            SessionEvent::Removed { session, reason } => removed.push((session.guid, reason)),
        }
    }
    assert_eq!(
        removed,
        vec![
            (a.guid().to_string(), RemovalReason::Kicked),
            (b.guid().to_string(), RemovalReason::Invalidated),
        ]
    );
}

#[tokio::test]
async fn test_count_user_sessions() {
    let manager = SessionManager::new(&config(10, 45_000));
    manager.add_session("u1", "", "10.0.0.5").unwrap();
    manager.add_session("u1", "", "10.0.0.6").unwrap();
    manager.add_session("u2", "", "10.0.0.5").unwrap();

    assert_eq!(manager.count_user_sessions("u1", None), 2);
    assert_eq!(manager.count_user_sessions("u1", Some("10.0.0.6")), 1);
    assert_eq!(manager.count_user_sessions("u3", None), 0);
}

#[tokio::test]
async fn test_attributes() {
    let manager = SessionManager::new(&config(10, 45_000));
    let session = manager.add_session("u1", "", "10.0.0.5").unwrap();

    manager.set_attribute(&session, "playlist", "42");
    assert_eq!(session.attribute("playlist").as_deref(), Some("42"));
    assert_eq!(session.snapshot().attributes.len(), 1);

    assert_eq!(manager.remove_attribute(&session, "playlist").as_deref(), Some("42"));
    assert!(session.attribute("playlist").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reaper_never_evicts_referenced_session() {
    let manager = SessionManager::new(&config(10, 1_000));
    manager.start().unwrap();

    let session = manager.add_session("u1", "", "10.0.0.5").unwrap();
    manager.reference_session(&session);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(manager.find_session_by_guid(session.guid()).is_some());

    manager.dereference_session(&session);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(manager.find_session_by_guid(session.guid()).is_none());

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reaper_expires_idle_session() {
    let manager = SessionManager::new(&config(10, 1_000));
    let mut events = manager.subscribe();
    manager.start().unwrap();

    let session = manager.add_session("u1", "", "10.0.0.5").unwrap();
    let guid = session.guid().to_string();
    drop(session);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(manager.session_count(), 0);

    assert!(matches!(events.recv().await.unwrap(), SessionEvent::Added { .. }));
    match events.recv().await.unwrap() {
        SessionEvent::Removed { session, reason } => {
            assert_eq!(session.guid, guid);
            assert_eq!(reason, RemovalReason::TimedOut);
        }
        other => panic!("unexpected event {:?}", other),
    }

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_touch_keeps_session_alive() {
    let manager = SessionManager::new(&config(10, 1_000));
    let session = manager.add_session("u1", "", "10.0.0.5").unwrap();

    tokio::time::advance(Duration::from_millis(800)).await;
    manager.touch(&session);
    tokio::time::advance(Duration::from_millis(800)).await;
    assert_eq!(manager.expire_idle_sessions(), 0);

    tokio::time::advance(Duration::from_millis(300)).await;
    assert_eq!(manager.expire_idle_sessions(), 1);
}

#[tokio::test]
async fn test_stop_invalidates_everything() {
    let records = Arc::new(MemorySessionRecords::new());
    let manager = SessionManager::with_records(&config(10, 45_000), records.clone());
    manager.start().unwrap();
    assert!(manager.is_running());
    assert!(manager.start().is_err());

    manager.add_session("u1", "", "10.0.0.5").unwrap();
    manager.add_session("u2", "", "10.0.0.6").unwrap();
    let mut events = manager.subscribe();

    manager.stop().await;

    assert!(!manager.is_running());
    assert_eq!(manager.session_count(), 0);
    assert!(records.is_empty());
    for _ in 0..2 {
        match events.recv().await.unwrap() {
            SessionEvent::Removed { reason, .. } => assert_eq!(reason, RemovalReason::Invalidated),
            other => panic!("unexpected event {:?}", other),
        }
    }

    // Restartable.
    manager.start().unwrap();
    manager.stop().await;
}
