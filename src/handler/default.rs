//! Terminal fallback: static files, redirects and error pages.

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::RequestHandler;
use crate::http::mime;
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::server::worker::Worker;
use crate::server::{
    ATTRIBUTE_ERROR_STATUSCODE, ATTRIBUTE_ERROR_SUBSTATUSCODE, ATTRIBUTE_FORWARD_URI,
};

/// Content type of inline error messages.
pub const ERROR_CONTENT_TYPE: &str = "text/html;charset=iso-8859-1";

const IO_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Default)]
pub struct DefaultHandler;

impl DefaultHandler {
    pub fn new() -> Self {
        Self
    }

    /// Serves the file behind the request path. Returns `false` with an
    /// error or redirect status set when there is nothing to serve.
    async fn handle_file_response(
        &self,
        worker: &Worker,
        request: &mut Request,
        response: &mut Response,
    ) -> bool {
        let (Some(site), Some(path)) = (request.site.clone(), request.real_path()) else {
            response.set_status(StatusCode::NotFound);
            return false;
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                response.set_status(StatusCode::NotFound);
                return false;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not stat file");
                response.set_status(StatusCode::InternalServerError);
                return false;
            }
        };

        if metadata.is_dir() {
            if !request.uri.ends_with('/') {
                let location = format!("{}/", request.uri);
                response.redirect(&location);
                return false;
            }

            for document in &site.default_documents {
                if tokio::fs::try_exists(path.join(document))
                    .await
                    .unwrap_or(false)
                {
                    let uri = format!("{}{}", request.uri, document);
                    worker.forward_request(request, response, &uri).await;
                    return true;
                }
            }

            // Directory listings are not served.
            response.set_status(StatusCode::Forbidden);
            return false;
        }

        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "could not open file");
                response.set_status(StatusCode::NotFound);
                return false;
            }
        };

        let content_type = mime::extension(&path)
            .and_then(|ext| {
                site.mime_mapping(ext)
                    .map(str::to_string)
                    .or_else(|| mime::from_extension(ext).map(str::to_string))
            })
            .unwrap_or_else(|| mime::DEFAULT_MIME_TYPE.to_string());

        response.set_content_type(&content_type);
        response.set_content_length(metadata.len());
        response.set_header("Connection", "close");

        let mut buf = vec![0u8; IO_BUFFER_SIZE];
        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "read failed mid-file");
                    return true;
                }
            };

            if let Err(e) = response.write(&buf[..n]).await {
                tracing::debug!(remote = %request.remote_address, error = %e, "client went away");
                return true;
            }
        }

        if let Err(e) = response.flush().await {
            tracing::debug!(remote = %request.remote_address, error = %e, "flush failed");
        }
        true
    }

    async fn handle_redirect_response(&self, response: &mut Response) -> bool {
        if response.header("Content-Length").is_none() {
            response.set_content_length(0);
        }
        if let Err(e) = response.flush().await {
            tracing::debug!(error = %e, "flush failed");
        }
        true
    }

    /// Forwards to the site's error page for the current status, or sends
    /// its inline message. Forwarding is refused when it would repeat the
    /// previous forward for the same status.
    async fn handle_error_response(
        &self,
        worker: &Worker,
        request: &mut Request,
        response: &mut Response,
    ) -> bool {
        let code = response.status_key();
        let mut message = String::new();

        if let Some(site) = request.site.clone() {
            let status = response.status().as_u16().to_string();
            let sub_status = response
                .sub_status()
                .map(|s| s.as_u16())
                .unwrap_or(0)
                .to_string();

            let forward_uri = request.attribute(ATTRIBUTE_FORWARD_URI).unwrap_or("");
            let forwarding_allowed = if request.uri != forward_uri {
                true
            } else {
                match request.attribute(ATTRIBUTE_ERROR_STATUSCODE) {
                    Some(previous) => {
                        previous != status
                            || request.attribute(ATTRIBUTE_ERROR_SUBSTATUSCODE).unwrap_or("0")
                                != sub_status
                    }
                    None => false,
                }
            };

            if let Some(page) = site.error_page(&code) {
                if forwarding_allowed && !page.location.is_empty() {
                    request.set_attribute(ATTRIBUTE_ERROR_STATUSCODE, status);
                    request.set_attribute(ATTRIBUTE_ERROR_SUBSTATUSCODE, sub_status);

                    let uri = format!("{}{}", site.path, page.location);
                    worker.forward_request(request, response, &uri).await;
                    return true;
                }
                message = page.message.clone();
            }
        }

        response.set_content_length(message.len() as u64);
        response.set_content_type(ERROR_CONTENT_TYPE);

        let result = async {
            response.write(message.as_bytes()).await?;
            response.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::debug!(remote = %request.remote_address, error = %e, "could not send error");
        }
        true
    }
}

#[async_trait]
impl RequestHandler for DefaultHandler {
    async fn handle_request(
        &self,
        worker: &Worker,
        request: &mut Request,
        response: &mut Response,
    ) -> bool {
        tracing::debug!(uri = %request.uri, status = response.status().as_u16(), "default handler");

        if (response.status() == StatusCode::Ok || request.has_attribute(ATTRIBUTE_FORWARD_URI))
            && self.handle_file_response(worker, request, response).await
        {
            return true;
        }

        if response.status() == StatusCode::Found {
            return self.handle_redirect_response(response).await;
        }

        self.handle_error_response(worker, request, response).await
    }
}
