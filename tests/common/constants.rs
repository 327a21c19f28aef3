//! Shared constants for end-to-end tests
//!
//! When the mock upstream or the seeded extractor table changes,
//! update only this file.

// ============================================================================
// Extractor table
// ============================================================================

/// Track the extractor resolves to a live upstream URL.
pub const REMOTE_TRACK_ID: &str = "remote-track";

/// Track whose upstream URL carries an `expire` already in the past.
pub const EXPIRED_TRACK_ID: &str = "expired-track";

/// Track whose upstream answers 404.
pub const BROKEN_TRACK_ID: &str = "broken-track";

/// Track whose upstream refuses HEAD requests.
pub const NO_HEAD_TRACK_ID: &str = "no-head-track";

/// Track the extractor knows nothing about.
pub const UNKNOWN_TRACK_ID: &str = "unknown-track";

/// Track listed in the favorites set the server starts with.
pub const FAVORITE_TRACK_ID: &str = "favorite-track";

// ============================================================================
// Mock upstream
// ============================================================================

/// Size of every media payload served by the mock upstream.
pub const UPSTREAM_MEDIA_SIZE: usize = 8192;

/// Content type the mock upstream declares.
pub const UPSTREAM_CONTENT_TYPE: &str = "audio/webm";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Default timeout for HTTP requests in tests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum time to wait for a manually triggered job to finish (milliseconds)
pub const JOB_COMPLETION_TIMEOUT_MS: u64 = 5000;
