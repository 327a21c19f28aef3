//! Narrow interface to the extraction provider, which turns a track id into
//! a playable, time-limited upstream media URL.

mod client;
pub mod models;

use async_trait::async_trait;
use std::collections::HashMap;

pub use client::ExtractorClient;
pub use models::{ExtractedMedia, ExtractorError};

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, track_id: &str) -> Result<ExtractedMedia, ExtractorError>;
}

/// Extractor answering from a fixed table. Used when no provider is
/// configured, in which case every lookup is `NotFound`.
#[derive(Default)]
pub struct StaticExtractor {
    media: HashMap<String, ExtractedMedia>,
}

impl StaticExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, track_id: impl Into<String>, media: ExtractedMedia) -> Self {
        self.media.insert(track_id.into(), media);
        self
    }
}

#[async_trait]
impl MediaExtractor for StaticExtractor {
    async fn extract(&self, track_id: &str) -> Result<ExtractedMedia, ExtractorError> {
        self.media
            .get(track_id)
            .cloned()
            .ok_or_else(|| ExtractorError::NotFound(track_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_extractor_lookup() {
        let extractor = StaticExtractor::new().with_track(
            "t1",
            ExtractedMedia {
                url: "https://rr1.googlevideo.com/videoplayback".to_string(),
                format: None,
                quality: None,
                content_type: None,
            },
        );

        assert!(extractor.extract("t1").await.is_ok());
        assert!(matches!(
            extractor.extract("t2").await,
            Err(ExtractorError::NotFound(_))
        ));
    }
}
