use crate::content_index::{CleanupOptions, ContentIndexManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    pub index: Arc<ContentIndexManager>,

    /// Options the scheduled retention sweep runs with.
    pub cleanup_options: CleanupOptions,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        index: Arc<ContentIndexManager>,
        cleanup_options: CleanupOptions,
    ) -> Self {
        Self {
            cancellation_token,
            index,
            cleanup_options,
        }
    }

    /// Same resources, different token. Each job run gets a child token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            index: Arc::clone(&self.index),
            cleanup_options: self.cleanup_options.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
