//! Specific background job implementations.

pub mod integrity_verification;
pub mod retention_cleanup;

pub use integrity_verification::IntegrityVerificationJob;
pub use retention_cleanup::RetentionCleanupJob;
