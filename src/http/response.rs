use crate::http::client::ClientWriter;
use crate::http::writer::serialize_head;

/// HTTP status codes produced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 302 Found
    Found,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// ```
    /// # use vibe_streamer::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::PayloadTooLarge.as_u16(), 413);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Found => 302,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Found => "Found",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

/// Why a 403 was issued. Never sent on the wire; used to pick error pages
/// (`"403.3"`) and by handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStatus {
    ServerFull,
    AccountDisabled,
    SessionLimitExceeded,
    DownloadLimitExceeded,
}

impl SubStatus {
    pub fn as_u16(&self) -> u16 {
        match self {
            SubStatus::ServerFull => 1,
            SubStatus::AccountDisabled => 2,
            SubStatus::SessionLimitExceeded => 3,
            SubStatus::DownloadLimitExceeded => 4,
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1 => Some(SubStatus::ServerFull),
            2 => Some(SubStatus::AccountDisabled),
            3 => Some(SubStatus::SessionLimitExceeded),
            4 => Some(SubStatus::DownloadLimitExceeded),
            _ => None,
        }
    }
}

/// The response to the request a worker is processing.
///
/// Body bytes are collected in a fixed-size buffer that is flushed to the
/// client whenever it fills up. The head goes out exactly once, right before
/// the first body bytes (or on [`Response::finish`] for empty bodies). After
/// that, status, headers and cookies can no longer change what the client
/// sees.
pub struct Response {
    status: StatusCode,
    sub_status: Option<SubStatus>,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    buffer: Vec<u8>,
    buffer_size: usize,
    committed: bool,
    writer: ClientWriter,
}

impl Response {
    pub fn new(writer: ClientWriter, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            status: StatusCode::Ok,
            sub_status: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            committed: false,
            writer,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn sub_status(&self) -> Option<SubStatus> {
        self.sub_status
    }

    /// Sets status and sub-status together.
    pub fn set_error(&mut self, status: StatusCode, sub_status: SubStatus) {
        self.status = status;
        self.sub_status = Some(sub_status);
    }

    /// Error page key: `"404"` or `"403.3"`.
    pub fn status_key(&self) -> String {
        match self.sub_status {
            Some(sub) => format!("{}.{}", self.status.as_u16(), sub.as_u16()),
            None => self.status.as_u16().to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Adds or replaces a header. Names compare case-insensitively.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn set_cookie(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.cookies.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.cookies.push((name.to_string(), value)),
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header("Content-Type", content_type);
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.set_header("Content-Length", length.to_string());
    }

    /// 302 to `location`.
    pub fn redirect(&mut self, location: &str) {
        self.status = StatusCode::Found;
        self.set_header("Location", location);
    }

    /// 401 with a Basic challenge for `realm`.
    pub fn require_authentication(&mut self, realm: &str) {
        self.status = StatusCode::Unauthorized;
        self.set_header("WWW-Authenticate", format!("Basic Realm=\"{}\"", realm));
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Bytes buffered but not yet sent.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops buffered body bytes. Has no effect on bytes already sent.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Appends body bytes, flushing every time the buffer fills up.
    pub async fn write(&mut self, mut data: &[u8]) -> std::io::Result<()> {
        while !data.is_empty() {
            let room = self.buffer_size - self.buffer.len();
            let n = room.min(data.len());
            self.buffer.extend_from_slice(&data[..n]);
            data = &data[n..];

            if self.buffer.len() >= self.buffer_size {
                self.flush().await?;
            }
        }
        Ok(())
    }

    /// Commits the head if needed, then sends whatever is buffered.
    /// Connections are never reused, so `Connection: close` always wins.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.committed {
            self.set_header("Connection", "close");
            let head = serialize_head(self.status, &self.headers, &self.cookies);
            self.committed = true;
            self.writer.send(&head).await?;
        }

        if !self.buffer.is_empty() {
            let result = self.writer.send(&self.buffer).await;
            self.buffer.clear();
            result?;
        }

        Ok(())
    }

    /// Flushes and shuts the write side down.
    pub async fn finish(&mut self) -> std::io::Result<()> {
        self.flush().await?;
        self.writer.shutdown().await
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("sub_status", &self.sub_status)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("committed", &self.committed)
            .finish()
    }
}
