//! Session store.
//!
//! [`SessionManager`] is the single source of truth for authenticated
//! sessions. Sessions are pinned with reference counts while a request uses
//! them; the reaper only evicts sessions that are unpinned and idle for
//! longer than the session timeout.

pub mod events;
pub mod manager;
pub mod records;
pub mod session;

pub use events::{RemovalReason, SessionEvent};
pub use manager::{SessionError, SessionManager};
pub use records::{MemorySessionRecords, SessionRecords};
pub use session::{Session, SessionSnapshot};
