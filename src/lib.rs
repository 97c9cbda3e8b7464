//! Vibe Streamer - media streaming HTTP server
//!
//! Core library: connection handling, request routing and the session store.

pub mod access_log;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod server;
pub mod session;
pub mod site;
pub mod users;

pub use error::ServerError;
pub use server::HttpServer;
