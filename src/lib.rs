//! Moodplay Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod config;
pub mod content_index;
pub mod extractor;
pub mod server;
pub mod streaming;

// Re-export commonly used types for convenience
pub use content_index::{ContentIndexManager, IndexManagerOptions, PlaybackSource, SourceKind};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
pub use streaming::StreamDelivery;
