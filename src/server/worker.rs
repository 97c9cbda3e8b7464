use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connector::ClientQueue;
use super::{
    ATTRIBUTE_FORWARD_QUERYSTRING, ATTRIBUTE_FORWARD_URI, AUTH_URI, PRIVATE_URI, PUBLIC_URI,
    SESSION_COOKIE_NAME, SESSION_PARAMETER_NAME, ServerContext,
};
use crate::config::ConnectorConfig;
use crate::http::client::{Client, ClientReader};
use crate::http::parser::{ParseError, find_headers_end, parse_form_urlencoded, parse_request_head};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode, SubStatus};
use crate::session::{SessionError, SessionManager};
use crate::site::{AuthType, SiteResolver};
use crate::users::{User, UserStore};

/// One member of the worker pool.
///
/// A worker takes clients from the connector's queue one at a time and
/// carries each through parsing, routing and dispatch before taking the
/// next. It keeps no state between clients.
pub struct Worker {
    id: usize,
    ctx: Arc<ServerContext>,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<ServerContext>) -> Self {
        Self { id, ctx }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn settings(&self) -> &ConnectorConfig {
        &self.ctx.settings
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.ctx.sessions
    }

    pub fn users(&self) -> &dyn UserStore {
        self.ctx.users.as_ref()
    }

    pub fn sites(&self) -> &dyn SiteResolver {
        self.ctx.sites.as_ref()
    }

    pub(crate) async fn run(self, queue: ClientQueue, cancel: CancellationToken) {
        debug!(worker = self.id, "worker started");

        loop {
            let client = {
                let mut queue = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    queue = queue.lock() => queue,
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    client = queue.recv() => client,
                }
            };

            let Some(client) = client else {
                break;
            };
            self.process(client, &cancel).await;
        }

        debug!(worker = self.id, "worker stopped");
    }

    /// Serves one client from handshake to closed connection.
    pub async fn process(&self, mut client: Client, cancel: &CancellationToken) {
        let remote_addr = client.remote_addr();

        if let Err(e) = client.handshake().await {
            debug!(worker = self.id, remote = %remote_addr, error = %e, "handshake failed");
            return;
        }

        let (mut reader, writer) = match client.into_split() {
            Ok(halves) => halves,
            Err(e) => {
                debug!(worker = self.id, remote = %remote_addr, error = %e, "client not ready");
                return;
            }
        };

        let mut request = Request::new(remote_addr.ip().to_string());
        let mut response = Response::new(writer, self.ctx.settings.buffer_size);

        match self.receive(&mut reader, &mut request, cancel).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(worker = self.id, remote = %remote_addr, error = %e, "rejected request");
                response.set_status(e.status());
            }
            Err(e) => {
                debug!(worker = self.id, remote = %remote_addr, error = %e, "abandoning client");
                return;
            }
        }

        self.handle_request(&mut request, &mut response).await;

        if let Err(e) = response.finish().await {
            debug!(worker = self.id, remote = %remote_addr, error = %e, "could not finish response");
        }
    }

    /// Reads the request head and, for POST, exactly `Content-Length` body
    /// bytes. Transport failures are the outer error; protocol violations
    /// the inner one.
    async fn receive(
        &self,
        reader: &mut ClientReader,
        request: &mut Request,
        cancel: &CancellationToken,
    ) -> io::Result<Result<(), ParseError>> {
        let settings = &self.ctx.settings;
        let mut buf = vec![0u8; settings.buffer_size];
        let mut head = BytesMut::with_capacity(settings.buffer_size);
        let mut body = BytesMut::new();
        let mut parsed = false;

        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "worker stopping"));
                }
                n = reader.recv(&mut buf) => n?,
            };
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client disconnected"));
            }

            if parsed {
                body.extend_from_slice(&buf[..n]);
            } else {
                head.extend_from_slice(&buf[..n]);

                let Some(end) = find_headers_end(&head) else {
                    if head.len() > settings.max_header_size {
                        return Ok(Err(ParseError::HeaderTooLarge));
                    }
                    continue;
                };
                if end > settings.max_header_size {
                    return Ok(Err(ParseError::HeaderTooLarge));
                }

                body.extend_from_slice(&head.split_off(end + 4));
                head.truncate(end);

                let Ok(text) = std::str::from_utf8(&head) else {
                    return Ok(Err(ParseError::InvalidRequest));
                };
                if let Err(e) = parse_request_head(text, request) {
                    return Ok(Err(e));
                }
                parsed = true;

                if request.method == Method::POST && request.content_length > settings.max_post_size {
                    return Ok(Err(ParseError::BodyTooLarge));
                }
            }

            if request.method != Method::POST {
                if !body.is_empty() {
                    return Ok(Err(ParseError::UnexpectedBody));
                }
                return Ok(Ok(()));
            }

            let received = body.len() as u64;
            if received > request.content_length {
                return Ok(Err(ParseError::BodyTooLarge));
            }
            if received == request.content_length {
                let data = String::from_utf8_lossy(&body);
                for (name, value) in parse_form_urlencoded(&data) {
                    request.set_parameter(&name, value);
                }
                return Ok(Ok(()));
            }
        }
    }

    /// Routes a parsed request and produces its response.
    pub async fn handle_request(&self, request: &mut Request, response: &mut Response) {
        if response.status() == StatusCode::Ok {
            self.check_host(request, response);
        }
        if response.status() == StatusCode::Ok {
            self.check_site(request, response);
        }
        if response.status() == StatusCode::Ok {
            if is_private_request(request) {
                response.set_status(StatusCode::Forbidden);
            } else if !is_auth_form_request(request) && !is_public_request(request) {
                self.check_credentials(request, response);
            }
        }

        // Pinned until the response is written so the reaper cannot expire it.
        let session = request.session.clone();
        if let Some(session) = &session {
            self.ctx.sessions.reference_session(session);
        }

        if response.status() == StatusCode::Ok {
            self.dispatch(request, response).await;
        } else {
            self.ctx
                .default_handler
                .handle_request(self, request, response)
                .await;
        }

        if let Some(session) = &session {
            self.ctx.sessions.dereference_session(session);
        }

        if let Some(site) = request.site.clone() {
            if let Some(logger) = &site.access_logger {
                logger.log(request, response.status()).await;
            }
        }
    }

    /// Hands the request to the last handler whose pattern matches the
    /// request path, falling back to the default handler.
    async fn dispatch(&self, request: &mut Request, response: &mut Response) {
        let handled = match self.ctx.handlers.resolve(request.path()) {
            Some(handler) => handler.handle_request(self, request, response).await,
            None => false,
        };

        if !handled {
            self.ctx
                .default_handler
                .handle_request(self, request, response)
                .await;
        }
    }

    /// Re-dispatches the request under `uri`, remembering where it came from
    /// in the forward attributes. Parameters and query string are dropped.
    pub fn forward_request<'a>(
        &'a self,
        request: &'a mut Request,
        response: &'a mut Response,
        uri: &str,
    ) -> BoxFuture<'a, ()> {
        let uri = uri.to_string();
        Box::pin(async move {
            let previous_uri = std::mem::replace(&mut request.uri, uri);
            let previous_query = std::mem::take(&mut request.query_string);
            request.set_attribute(ATTRIBUTE_FORWARD_URI, previous_uri);
            request.set_attribute(ATTRIBUTE_FORWARD_QUERYSTRING, previous_query);
            request.clear_parameters();

            debug!(worker = self.id, uri = %request.uri, "forwarding");
            self.dispatch(request, response).await;
        })
    }

    fn check_host(&self, request: &Request, response: &mut Response) {
        let server_host = &self.ctx.settings.host;
        if server_host.is_empty() {
            return;
        }

        if !server_host.eq_ignore_ascii_case(strip_port(&request.host)) {
            debug!(host = %request.host, "unknown host");
            response.set_status(StatusCode::NotFound);
        }
    }

    fn check_site(&self, request: &mut Request, response: &mut Response) {
        match self.ctx.sites.find_site_by_path(&request.uri) {
            Some(site) => request.site = Some(site),
            None => {
                debug!(uri = %request.uri, "no site");
                response.set_status(StatusCode::NotFound);
            }
        }
    }

    fn check_credentials(&self, request: &mut Request, response: &mut Response) {
        let Some(site) = request.site.clone() else {
            response.set_status(StatusCode::NotFound);
            return;
        };

        let session_guid = request
            .parameter(SESSION_PARAMETER_NAME)
            .or_else(|| request.cookie(SESSION_COOKIE_NAME))
            .map(str::to_string);

        if let Some(guid) = session_guid {
            if let Some(session) = self.ctx.sessions.match_session(&guid, &request.remote_address) {
                match self.ctx.users.find_user_by_guid(session.user_guid()) {
                    Some(user) => {
                        request.session = Some(session);
                        request.user = Some(user);
                        return;
                    }
                    None => {
                        debug!(session = %guid, "session user vanished");
                        self.ctx.sessions.kick_session(&guid);
                    }
                }
            }
        }

        match &site.auth_type {
            AuthType::Basic => {
                if !request.auth_username.is_empty() {
                    if let Some(user) = self.find_user(&request.auth_username, &request.auth_password) {
                        self.logon_user(request, response, user);
                        return;
                    }
                } else if site.anonymous_access {
                    self.logon_anonymous_user(request, response);
                    return;
                }

                response.require_authentication(&site.auth_realm);
            }
            AuthType::Form => {
                let login_uri = format!("{}{}", site.path, AUTH_URI);

                if request.method == Method::POST && request.uri == login_uri {
                    let username = request.parameter("auth_username").unwrap_or("").to_string();
                    let password = request.parameter("auth_password").unwrap_or("").to_string();
                    let target = request.parameter("auth_target").unwrap_or("").to_string();

                    match self.find_user(&username, &password) {
                        Some(user) => {
                            if self.logon_user(request, response, user) {
                                let target = if !target.is_empty() {
                                    target
                                } else if site.path.is_empty() {
                                    "/".to_string()
                                } else {
                                    site.path.clone()
                                };
                                response.redirect(&target);
                            }
                        }
                        None => {
                            let mut location = format!("{}{}?error", site.path, site.auth_form);
                            if !target.is_empty() {
                                location.push_str("&target=");
                                location.push_str(&encode_component(&target));
                            }
                            response.redirect(&location);
                        }
                    }
                } else if site.anonymous_access {
                    self.logon_anonymous_user(request, response);
                } else {
                    let mut location = format!("{}{}", site.path, site.auth_form);
                    if request.path() != "/" {
                        location.push_str("?target=");
                        location.push_str(&encode_component(&request.uri));
                    }
                    response.redirect(&location);
                }
            }
            AuthType::Other(name) => {
                debug!(auth_type = %name, "unsupported auth type");
                response.set_status(StatusCode::Forbidden);
            }
        }
    }

    fn find_user(&self, username: &str, password: &str) -> Option<User> {
        self.ctx
            .users
            .find_user_by_name(username)
            .filter(|user| user.check_password(password))
    }

    fn logon_anonymous_user(&self, request: &mut Request, response: &mut Response) -> bool {
        let anonymous = request
            .site
            .as_ref()
            .and_then(|site| self.ctx.users.find_user_by_guid(&site.anonymous_user_guid));

        match anonymous {
            Some(user) => self.logon_user(request, response, user),
            None => {
                response.set_status(StatusCode::Forbidden);
                false
            }
        }
    }

    /// Admits `user`: account state, site permission, session limits and
    /// store capacity are checked in that order.
    fn logon_user(&self, request: &mut Request, response: &mut Response, user: User) -> bool {
        if user.disabled {
            response.set_error(StatusCode::Forbidden, SubStatus::AccountDisabled);
            return false;
        }

        let permitted = request.site.as_ref().is_some_and(|site| {
            site.check_permission(&user, &request.remote_address, self.ctx.users.as_ref())
        });
        if !permitted {
            debug!(user = %user.name, remote = %request.remote_address, "no permission for site");
            response.set_status(StatusCode::Forbidden);
            return false;
        }

        if !self.is_allowed_session(&user, &request.remote_address) {
            response.set_error(StatusCode::Forbidden, SubStatus::SessionLimitExceeded);
            return false;
        }

        match self
            .ctx
            .sessions
            .add_session(&user.guid, request.user_agent(), &request.remote_address)
        {
            Ok(session) => {
                response.set_cookie(SESSION_COOKIE_NAME, session.guid());
                self.ctx.users.record_login(&user.guid, &request.remote_address);
                request.session = Some(session);
                request.user = Some(user);
                true
            }
            Err(SessionError::Full) => {
                response.set_error(StatusCode::Forbidden, SubStatus::ServerFull);
                false
            }
            Err(e) => {
                tracing::error!(user = %user.name, error = %e, "could not create session");
                response.set_status(StatusCode::InternalServerError);
                false
            }
        }
    }

    /// Whether `user` may open one more session from `remote_address`.
    fn is_allowed_session(&self, user: &User, remote_address: &str) -> bool {
        let users = self.ctx.users.as_ref();
        if users.role_bypass_limits(user) {
            return true;
        }

        if let Some(max) = users.role_max_sessions(user) {
            if self.ctx.sessions.count_user_sessions(&user.guid, None) >= max as usize {
                return false;
            }
        }

        if let Some(max) = users.role_max_sessions_per_ip(user) {
            let count = self
                .ctx
                .sessions
                .count_user_sessions(&user.guid, Some(remote_address));
            if count >= max as usize {
                return false;
            }
        }

        true
    }
}

fn is_public_request(request: &Request) -> bool {
    starts_with_ignore_case(request.path(), PUBLIC_URI)
}

fn is_private_request(request: &Request) -> bool {
    starts_with_ignore_case(request.path(), PRIVATE_URI)
}

fn is_auth_form_request(request: &Request) -> bool {
    request.site.as_ref().is_some_and(|site| {
        site.auth_type == AuthType::Form && request.path().eq_ignore_ascii_case(&site.auth_form)
    })
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// `host:port` → `host`, leaving bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}

fn encode_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
