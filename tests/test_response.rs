use std::time::Duration;

use tokio::io::{AsyncReadExt, DuplexStream, duplex};
use vibe_streamer::http::client::ClientWriter;
use vibe_streamer::http::response::{Response, StatusCode, SubStatus};

fn response(buffer_size: usize) -> (Response, DuplexStream) {
    let (server, client) = duplex(64 * 1024);
    let writer = ClientWriter::new(Box::new(server), Duration::from_secs(5));
    (Response::new(writer, buffer_size), client)
}

async fn read_all(mut stream: DuplexStream) -> String {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_status_codes() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::Found.as_u16(), 302);
    assert_eq!(StatusCode::Unauthorized.as_u16(), 401);
    assert_eq!(StatusCode::PayloadTooLarge.as_u16(), 413);
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    assert_eq!(StatusCode::MethodNotAllowed.reason_phrase(), "Method Not Allowed");
}

#[test]
fn test_sub_status_codes() {
    assert_eq!(SubStatus::ServerFull.as_u16(), 1);
    assert_eq!(SubStatus::SessionLimitExceeded.as_u16(), 3);
    assert_eq!(SubStatus::from_u16(2), Some(SubStatus::AccountDisabled));
    assert_eq!(SubStatus::from_u16(9), None);
}

#[tokio::test]
async fn test_status_key() {
    let (mut res, _client) = response(128);
    assert_eq!(res.status_key(), "200");

    res.set_status(StatusCode::NotFound);
    assert_eq!(res.status_key(), "404");

    res.set_error(StatusCode::Forbidden, SubStatus::SessionLimitExceeded);
    assert_eq!(res.status_key(), "403.3");
}

#[tokio::test]
async fn test_headers_replace_case_insensitively() {
    let (mut res, _client) = response(128);

    res.set_header("Content-Type", "text/html");
    res.set_header("content-type", "audio/mpeg");
    assert_eq!(res.headers().len(), 1);
    assert_eq!(res.header("CONTENT-TYPE"), Some("audio/mpeg"));
    assert!(res.header("Content-Length").is_none());
}

#[tokio::test]
async fn test_redirect_and_authentication_helpers() {
    let (mut res, _client) = response(128);

    res.redirect("/music/");
    assert_eq!(res.status(), StatusCode::Found);
    assert_eq!(res.header("Location"), Some("/music/"));

    res.require_authentication("Music");
    assert_eq!(res.status(), StatusCode::Unauthorized);
    assert_eq!(res.header("WWW-Authenticate"), Some("Basic Realm=\"Music\""));
}

#[tokio::test]
async fn test_finish_writes_head_and_body() {
    let (mut res, client) = response(1024);

    res.set_content_type("text/plain");
    res.set_content_length(5);
    res.set_cookie("sessionguid", "abc");
    res.write(b"hello").await.unwrap();
    assert!(!res.is_committed());
    assert_eq!(res.buffered(), 5);

    res.finish().await.unwrap();
    assert!(res.is_committed());

    let text = read_all(client).await;
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.contains("Set-Cookie: sessionguid=abc;path=/\r\n"));
    assert!(text.ends_with("\r\n\r\nhello"));
}

#[tokio::test]
async fn test_full_buffer_commits_head() {
    let (mut res, client) = response(4);

    res.write(b"abcdefghij").await.unwrap();
    assert!(res.is_committed());
    assert_eq!(res.buffered(), 2);

    // Too late to change what the client sees.
    res.set_status(StatusCode::InternalServerError);
    res.finish().await.unwrap();

    let text = read_all(client).await;
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("abcdefghij"));
}

#[tokio::test]
async fn test_clear_buffer_discards_unsent_bytes() {
    let (mut res, client) = response(64);

    res.write(b"partial").await.unwrap();
    res.clear_buffer();
    res.set_status(StatusCode::NotFound);
    res.write(b"gone").await.unwrap();
    res.finish().await.unwrap();

    let text = read_all(client).await;
    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(text.ends_with("\r\n\r\ngone"));
    assert!(!text.contains("partial"));
}

#[tokio::test]
async fn test_connection_close_is_forced() {
    let (mut res, client) = response(64);

    res.set_header("Connection", "keep-alive");
    res.finish().await.unwrap();

    let text = read_all(client).await;
    assert!(text.contains("Connection: close\r\n"));
    assert!(!text.contains("keep-alive"));
    assert_eq!(text.matches("Connection:").count(), 1);
}
