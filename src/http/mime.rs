//! Built-in MIME types for common media and web files.

use std::path::Path;

/// Used when neither the site nor the built-in table knows the extension.
pub const DEFAULT_MIME_TYPE: &str = "text/plain";

pub fn from_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "wma" => "audio/x-ms-wma",
        "m3u" => "audio/x-mpegurl",
        "pls" => "audio/x-scpls",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "text/xml",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => return None,
    };
    Some(mime)
}

/// Extension of `path` without the dot, if any.
pub fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}
