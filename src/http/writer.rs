use crate::http::response::StatusCode;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes the response head: status line, headers, one `Set-Cookie`
/// line per cookie and the blank separator line.
pub fn serialize_head(
    status: StatusCode,
    headers: &[(String, String)],
    cookies: &[(String, String)],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    for (name, value) in cookies {
        buf.extend_from_slice(format!("Set-Cookie: {}={};path=/\r\n", name, value).as_bytes());
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_keeps_header_order() {
        let headers = vec![
            ("Content-Type".to_string(), "text/html".to_string()),
            ("Content-Length".to_string(), "0".to_string()),
        ];
        let cookies = vec![("sessionguid".to_string(), "abc".to_string())];

        let head = serialize_head(StatusCode::Found, &headers, &cookies);

        assert_eq!(
            String::from_utf8(head).unwrap(),
            "HTTP/1.1 302 Found\r\n\
             Content-Type: text/html\r\n\
             Content-Length: 0\r\n\
             Set-Cookie: sessionguid=abc;path=/\r\n\r\n"
        );
    }
}
