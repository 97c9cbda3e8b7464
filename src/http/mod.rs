//! HTTP protocol implementation.
//!
//! A deliberately small HTTP/1.x server side: GET and POST only,
//! length-delimited bodies, one request per connection.
//!
//! # Architecture
//!
//! - **`client`**: One accepted socket (plain or TLS) with timeout-bounded reads and writes
//! - **`parser`**: Parses request heads, cookies, credentials and form bodies
//! - **`request`**: The request being routed, with its resolved site, session and user
//! - **`response`**: Buffered response whose head is committed exactly once
//! - **`writer`**: Serializes the response head
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Request State Machine
//!
//! Each client is processed by one worker:
//!
//! ```text
//!        ┌──────────────────┐
//!        │ ReceivingHeader  │ ← Accumulate until the blank line
//!        └──────┬───────────┘
//!               │ Head parsed
//!               ├─ POST ──────────────┐
//!               │                     ▼
//!               │          ┌──────────────────┐
//!               │          │  ReceivingBody   │ ← Exactly Content-Length bytes
//!               │          └──────┬───────────┘
//!               ▼                 ▼
//!        ┌──────────────────────────────┐
//!        │           Routing            │ ← Host, site, credentials, handler
//!        └──────┬───────────────────────┘
//!               │ Response flushed
//!               ▼
//!        ┌──────────────────┐
//!        │     Handled      │ ← Connection closed
//!        └──────────────────┘
//! ```

pub mod client;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
