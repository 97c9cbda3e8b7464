//! Per-site access log.
//!
//! Every completed request is appended to the file named by the site's
//! `access_log` pattern (expanded with strftime fields against local time,
//! so `logs/access-%Y%m%d.log` rolls daily) and mirrored as a `tracing`
//! event on the `access` target.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::Local;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::http::request::Request;
use crate::http::response::StatusCode;

#[derive(Debug)]
pub struct AccessLogger {
    pattern: String,
    write_lock: Mutex<()>,
}

impl AccessLogger {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The file the next entry goes to.
    pub fn current_path(&self) -> PathBuf {
        let mut path = String::new();
        if write!(path, "{}", Local::now().format(&self.pattern)).is_err() {
            // Unknown strftime specifier; use the pattern literally.
            path = self.pattern.clone();
        }
        PathBuf::from(path)
    }

    pub async fn log(&self, request: &Request, status: StatusCode) {
        let line = format_entry(request, status);

        tracing::info!(target: "access", "{}", line);

        let _guard = self.write_lock.lock().await;
        let path = self.current_path();

        let result = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "could not write access log");
        }
    }
}

/// `date time remote user method uri query status`, `-` for missing fields.
pub fn format_entry(request: &Request, status: StatusCode) -> String {
    let user = request
        .user
        .as_ref()
        .map(|u| u.guid.as_str())
        .unwrap_or("-");
    let query = if request.query_string.is_empty() {
        "-"
    } else {
        request.query_string.as_str()
    };

    format!(
        "{} {} {} {} {} {} {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        request.remote_address,
        user,
        request.method.as_str(),
        request.uri,
        query,
        status.as_u16()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestBuilder;

    #[tokio::test]
    async fn appends_one_line_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let logger = AccessLogger::new(path.to_string_lossy());

        let request = RequestBuilder::new()
            .uri("/music/a.mp3")
            .remote_address("10.0.0.7")
            .build()
            .unwrap();
        logger.log(&request, StatusCode::Ok).await;
        logger.log(&request, StatusCode::NotFound).await;

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" 10.0.0.7 - GET /music/a.mp3 - 200"));
        assert!(lines[1].ends_with(" 404"));
    }

    #[test]
    fn pattern_expands_date_fields() {
        let logger = AccessLogger::new("access-%Y.log");
        let expected = format!("access-{}.log", Local::now().format("%Y"));
        assert_eq!(logger.current_path(), PathBuf::from(expected));
    }
}
