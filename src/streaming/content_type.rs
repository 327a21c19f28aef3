//! Content type resolution for proxied media.

use url::Url;

use crate::content_index::MediaFormat;

pub const FALLBACK_CONTENT_TYPE: &str = "audio/mpeg";

const GENERIC_CONTENT_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

/// True for blank types and the octet-stream family, which say nothing
/// about the media.
pub fn is_generic_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence.is_empty() || GENERIC_CONTENT_TYPES.contains(&essence.as_str())
}

/// Prefers the upstream's declared type, then the URL's `mime` hint, then
/// the path extension, then a generic audio type.
pub fn detect_content_type(declared: Option<&str>, url: &Url) -> String {
    if let Some(declared) = declared.map(str::trim) {
        if !is_generic_content_type(declared) {
            return declared.to_string();
        }
    }

    // googlevideo URLs carry e.g. `mime=audio%2Fwebm`.
    if let Some((_, mime)) = url.query_pairs().find(|(k, _)| k == "mime") {
        let mime = mime.trim();
        if mime.contains('/') {
            return mime.to_string();
        }
    }

    if let Some(format) = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .and_then(|(_, ext)| MediaFormat::from_extension(ext))
    {
        return format.content_type().to_string();
    }

    FALLBACK_CONTENT_TYPE.to_string()
}
