use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::session::Session;
use crate::site::Site;
use crate::users::User;

/// HTTP request methods.
///
/// Only GET and POST are served. The parser answers anything else with
/// 405 Method Not Allowed before a `Request` is ever routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Submit a form-urlencoded body
    POST,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// The parser uppercases the request line token first, so this match is
    /// case-sensitive.
    ///
    /// ```
    /// # use vibe_streamer::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("PUT"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
        }
    }
}

/// A request received by a worker.
///
/// Built up incrementally: the parser fills in the wire fields, then routing
/// attaches the site, the session and the authenticated user.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// URL-decoded request URI without the query string.
    pub uri: String,
    /// Raw query string (still encoded), without the leading `?`.
    pub query_string: String,
    pub version: String,
    /// Header names are stored lowercased.
    headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Query and POST parameters, names lowercased.
    parameters: HashMap<String, String>,
    /// Server-side values that travel with the request across forwards.
    attributes: HashMap<String, String>,
    pub auth_username: String,
    pub auth_password: String,
    pub content_length: u64,
    /// `Host` header as sent, port included.
    pub host: String,
    /// Peer IP address.
    pub remote_address: String,
    pub site: Option<Arc<Site>>,
    pub session: Option<Arc<Session>>,
    pub user: Option<User>,
}

impl Request {
    pub fn new(remote_address: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            uri: String::new(),
            query_string: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            parameters: HashMap::new(),
            attributes: HashMap::new(),
            auth_username: String::new(),
            auth_password: String::new(),
            content_length: 0,
            host: String::new(),
            remote_address: remote_address.into(),
            site: None,
            session: None,
            user: None,
        }
    }

    /// Retrieves a header value by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|v| v.as_str())
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<String>) {
        self.parameters.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|v| v.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// The URI relative to the resolved site. Equal to the URI when no site
    /// has been resolved yet.
    pub fn path(&self) -> &str {
        match &self.site {
            Some(site) => self.uri.get(site.path.len()..).unwrap_or(""),
            None => &self.uri,
        }
    }

    /// Filesystem path of the requested resource below the site root.
    pub fn real_path(&self) -> Option<PathBuf> {
        self.site.as_ref().map(|site| site.real_path(self.path()))
    }
}

/// Builder for constructing requests outside the parser, mostly in tests.
pub struct RequestBuilder {
    method: Method,
    uri: Option<String>,
    query_string: String,
    remote_address: String,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    parameters: Vec<(String, String)>,
    site: Option<Arc<Site>>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            uri: None,
            query_string: String::new(),
            remote_address: "127.0.0.1".to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
            parameters: Vec::new(),
            site: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    pub fn remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = address.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn site(mut self, site: Arc<Site>) -> Self {
        self.site = Some(site);
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let mut request = Request::new(self.remote_address);
        request.method = self.method;
        request.uri = self.uri.ok_or("uri missing")?;
        request.query_string = self.query_string;
        request.version = "HTTP/1.1".to_string();
        request.site = self.site;

        for (name, value) in self.headers {
            request.set_header(&name, value);
        }
        for (name, value) in self.cookies {
            request.cookies.insert(name, value);
        }
        for (name, value) in self.parameters {
            request.set_parameter(&name, value);
        }

        Ok(request)
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
