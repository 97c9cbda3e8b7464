//! Request handlers.
//!
//! Handlers are registered with a URL pattern (a regex searched in the
//! site-relative request path). When several patterns match, the one
//! registered last wins. A handler that returns `false` declines the
//! request and the [`DefaultHandler`] takes over.

pub mod default;
pub mod logout;
pub mod sessions;

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::server::worker::Worker;

pub use default::DefaultHandler;
pub use logout::LogoutHandler;
pub use sessions::SessionsHandler;

#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Called once while the server starts. An error aborts the start.
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handles a routed request. Returns `false` to decline.
    async fn handle_request(
        &self,
        worker: &Worker,
        request: &mut Request,
        response: &mut Response,
    ) -> bool;

    /// Called once after the server stopped.
    fn cleanup(&self) {}
}

/// Looks up a built-in handler by its configuration name.
pub fn built_in(name: &str) -> Option<Arc<dyn RequestHandler>> {
    match name {
        "logout" => Some(Arc::new(LogoutHandler)),
        "sessions" => Some(Arc::new(SessionsHandler)),
        _ => None,
    }
}

#[derive(Clone)]
struct Registration {
    pattern: Regex,
    handler: Arc<dyn RequestHandler>,
}

/// Ordered list of handlers and their URL patterns.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        url_pattern: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), regex::Error> {
        self.handlers.push(Registration {
            pattern: Regex::new(url_pattern)?,
            handler,
        });
        Ok(())
    }

    /// The last registered handler whose pattern matches `path`.
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers
            .iter()
            .rev()
            .find(|r| r.pattern.is_match(path))
            .map(|r| r.handler.clone())
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn RequestHandler>> {
        self.handlers.iter().map(|r| &r.handler)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|r| r.pattern.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_match_wins() {
        let mut registry = HandlerRegistry::new();
        let first: Arc<dyn RequestHandler> = Arc::new(LogoutHandler);
        let second: Arc<dyn RequestHandler> = Arc::new(SessionsHandler);
        registry.register(r"\.mp3$", first.clone()).unwrap();
        registry.register(r"^/music/", second.clone()).unwrap();

        let resolved = registry.resolve("/music/a.mp3").unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));

        let resolved = registry.resolve("/other/a.mp3").unwrap();
        assert!(Arc::ptr_eq(&resolved, &first));

        assert!(registry.resolve("/index.html").is_none());
    }

    #[test]
    fn unknown_built_in() {
        assert!(built_in("logout").is_some());
        assert!(built_in("javascript").is_none());
    }
}
