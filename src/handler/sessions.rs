use async_trait::async_trait;
use serde::Serialize;

use super::RequestHandler;
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::server::worker::Worker;
use crate::session::SessionSnapshot;

#[derive(Serialize)]
struct SessionsBody {
    count: usize,
    max_sessions: usize,
    sessions: Vec<SessionSnapshot>,
}

/// Lists active sessions as JSON.
#[derive(Debug, Default)]
pub struct SessionsHandler;

#[async_trait]
impl RequestHandler for SessionsHandler {
    async fn handle_request(
        &self,
        worker: &Worker,
        _request: &mut Request,
        response: &mut Response,
    ) -> bool {
        let sessions = worker.sessions().sessions();
        let body = SessionsBody {
            count: sessions.len(),
            max_sessions: worker.sessions().max_sessions(),
            sessions,
        };

        let json = match serde_json::to_vec(&body) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "could not serialize sessions");
                response.set_status(StatusCode::InternalServerError);
                return false;
            }
        };

        response.set_content_type("application/json");
        response.set_content_length(json.len() as u64);

        let result = async {
            response.write(&json).await?;
            response.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "could not send sessions");
        }
        true
    }
}
