//! Request head and body parsing.
//!
//! The worker accumulates bytes until [`find_headers_end`] reports the blank
//! line, then hands the head to [`parse_request_head`]. Each failure maps to
//! the status the client receives via [`ParseError::status`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("method not allowed")]
    InvalidMethod,
    #[error("invalid request uri")]
    InvalidUri,
    #[error("malformed authorization header")]
    InvalidAuthorization,
    #[error("malformed content-length header")]
    InvalidContentLength,
    #[error("request head too large")]
    HeaderTooLarge,
    #[error("request body too large")]
    BodyTooLarge,
    #[error("unexpected request body")]
    UnexpectedBody,
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::InvalidMethod => StatusCode::MethodNotAllowed,
            ParseError::HeaderTooLarge | ParseError::BodyTooLarge => StatusCode::PayloadTooLarge,
            ParseError::InvalidRequest
            | ParseError::InvalidUri
            | ParseError::InvalidAuthorization
            | ParseError::InvalidContentLength
            | ParseError::UnexpectedBody => StatusCode::BadRequest,
        }
    }
}

/// Offset of the `\r\n\r\n` terminating the head.
pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parses a request head (request line and headers, without the blank line)
/// into `request`.
///
/// Query parameters are parsed into the request's parameter map. Header
/// lines without a colon are ignored.
pub fn parse_request_head(head: &str, request: &mut Request) -> Result<(), ParseError> {
    let mut lines = head.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let (method_str, rest) = request_line
        .split_once(' ')
        .ok_or(ParseError::InvalidRequest)?;

    request.method =
        Method::from_str(&method_str.to_ascii_uppercase()).ok_or(ParseError::InvalidMethod)?;

    let (raw_uri, version) = rest.split_once(' ').ok_or(ParseError::InvalidRequest)?;

    let (path, query) = match raw_uri.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_uri, ""),
    };

    let uri = url_decode(path);
    if !is_valid_uri(&uri) || !is_absolute_uri(&uri) {
        return Err(ParseError::InvalidUri);
    }

    request.uri = uri;
    request.query_string = query.to_string();
    request.version = version.to_string();

    for (name, value) in parse_form_urlencoded(query) {
        request.set_parameter(&name, value);
    }

    // Headers
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim_start();

        request.set_header(name, value);

        match name.to_ascii_lowercase().as_str() {
            "authorization" => {
                let (username, password) = parse_basic_authorization(value)?;
                request.auth_username = username;
                request.auth_password = password;
            }
            "content-length" => {
                request.content_length = parse_content_length(value)?;
            }
            "cookie" => {
                for (name, value) in parse_cookies(value) {
                    request.cookies.insert(name, value);
                }
            }
            "host" => {
                request.host = value.to_string();
            }
            _ => {}
        }
    }

    Ok(())
}

/// Decodes `Basic <base64(user:password)>`, splitting on the first colon.
pub fn parse_basic_authorization(value: &str) -> Result<(String, String), ParseError> {
    if value.len() < 7 {
        return Err(ParseError::InvalidAuthorization);
    }
    let (Some(scheme), Some(encoded)) = (value.get(..5), value.get(6..)) else {
        return Err(ParseError::InvalidAuthorization);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(ParseError::InvalidAuthorization);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ParseError::InvalidAuthorization)?;
    let decoded = String::from_utf8(decoded).map_err(|_| ParseError::InvalidAuthorization)?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or(ParseError::InvalidAuthorization)?;
    Ok((username.to_string(), password.to_string()))
}

pub fn parse_content_length(value: &str) -> Result<u64, ParseError> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidContentLength);
    }
    value.parse().map_err(|_| ParseError::InvalidContentLength)
}

/// `a=1; b=2` into trimmed pairs. Pairs without `=` are skipped.
pub fn parse_cookies(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parses an `application/x-www-form-urlencoded` string. A token without
/// `=` becomes a parameter with an empty value.
pub fn parse_form_urlencoded(data: &str) -> Vec<(String, String)> {
    data.split('&')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| match token.split_once('=') {
            Some((name, value)) => (url_decode(name), url_decode(value)),
            None => (url_decode(token), String::new()),
        })
        .collect()
}

/// Percent-decodes `s`, treating `+` as a space. Invalid UTF-8 is replaced.
pub fn url_decode(s: &str) -> String {
    let spaced = s.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// Rejects empty URIs, backslashes and parent directory segments.
pub fn is_valid_uri(uri: &str) -> bool {
    !uri.is_empty() && !uri.contains('\\') && !uri.contains("../") && !uri.ends_with("/..")
}

pub fn is_absolute_uri(uri: &str) -> bool {
    uri.starts_with('/')
}
