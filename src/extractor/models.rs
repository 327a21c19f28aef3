//! Models for the external extraction provider API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content_index::MediaFormat;

/// A playable upstream URL for a track, as returned by `GET /extract/{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMedia {
    /// Time-limited media URL, usually on a googlevideo host.
    pub url: String,
    #[serde(default)]
    pub format: Option<MediaFormat>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Track not found by extractor: {0}")]
    NotFound(String),

    #[error("Extractor unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid extractor response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_response() {
        let media: ExtractedMedia =
            serde_json::from_str(r#"{"url": "https://rr1.googlevideo.com/videoplayback"}"#).unwrap();
        assert!(media.format.is_none());

        let media: ExtractedMedia = serde_json::from_str(
            r#"{"url": "https://x.googlevideo.com/v", "format": "webm", "quality": "160kbps"}"#,
        )
        .unwrap();
        assert_eq!(media.format, Some(MediaFormat::Webm));
        assert_eq!(media.quality.as_deref(), Some("160kbps"));
    }
}
