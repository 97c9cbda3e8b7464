use async_trait::async_trait;

use super::RequestHandler;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::server::SESSION_COOKIE_NAME;
use crate::server::worker::Worker;

/// Ends the caller's session and sends them back to the site root.
#[derive(Debug, Default)]
pub struct LogoutHandler;

#[async_trait]
impl RequestHandler for LogoutHandler {
    async fn handle_request(
        &self,
        worker: &Worker,
        request: &mut Request,
        response: &mut Response,
    ) -> bool {
        if let Some(session) = &request.session {
            worker.sessions().invalidate_session(session.guid());
            tracing::info!(session = %session.guid(), remote = %request.remote_address, "logged out");
        }

        response.set_cookie(SESSION_COOKIE_NAME, "");

        let target = match request.site.as_ref().map(|s| s.path.as_str()) {
            Some("") | None => "/".to_string(),
            Some(path) => format!("{}/", path),
        };
        response.redirect(&target);
        response.set_content_length(0);

        if let Err(e) = response.flush().await {
            tracing::debug!(error = %e, "flush failed");
        }
        true
    }
}
