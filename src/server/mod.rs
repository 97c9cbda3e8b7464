//! Connection handling: accept loop, worker pool and the composition root.
//!
//! ```text
//!   Connector (1 accept task) ──► bounded queue (max_clients) ──► Worker × max_workers
//!                                                                   │
//!                            SessionManager ◄── routing ────────────┤
//!                                                                   ▼
//!                                                      RequestHandler / DefaultHandler
//! ```

pub mod connector;
pub mod http_server;
pub mod worker;

use std::sync::Arc;

use crate::config::ConnectorConfig;
use crate::handler::{HandlerRegistry, RequestHandler};
use crate::session::SessionManager;
use crate::site::SiteResolver;
use crate::users::UserStore;

pub use connector::Connector;
pub use http_server::{HttpServer, HttpServerBuilder};
pub use worker::Worker;

/// Request attribute holding the status of the error being forwarded.
pub const ATTRIBUTE_ERROR_STATUSCODE: &str = "vibe.httpconnector.error.statuscode";
pub const ATTRIBUTE_ERROR_SUBSTATUSCODE: &str = "vibe.httpconnector.error.substatuscode";
/// Request attribute holding the query string before the last forward.
pub const ATTRIBUTE_FORWARD_QUERYSTRING: &str = "vibe.httpconnector.forward.querystring";
/// Request attribute holding the URI before the last forward.
pub const ATTRIBUTE_FORWARD_URI: &str = "vibe.httpconnector.forward.uri";

/// Site-relative endpoint form logins are posted to.
pub const AUTH_URI: &str = "/auth/";
/// Site-relative prefix served without credentials.
pub const PUBLIC_URI: &str = "/_public/";
/// Site-relative prefix that is never served.
pub const PRIVATE_URI: &str = "/_private/";
pub const SESSION_COOKIE_NAME: &str = "sessionguid";
/// Parameter that may carry the session guid instead of the cookie.
pub const SESSION_PARAMETER_NAME: &str = "auth_sessionguid";

/// Everything a worker needs to route a request. Shared by all workers.
pub struct ServerContext {
    pub settings: ConnectorConfig,
    pub sessions: SessionManager,
    pub sites: Arc<dyn SiteResolver>,
    pub users: Arc<dyn UserStore>,
    pub handlers: HandlerRegistry,
    pub default_handler: Arc<dyn RequestHandler>,
}
