//! Retention cleanup background job.
//!
//! Evicts the oldest non-favorite local copies once the storage root grows
//! past its ceiling, using the options configured under `[retention]`.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use std::time::Duration;
use tracing::{info, warn};

pub struct RetentionCleanupJob {
    interval: Duration,
    run_after_ingest: bool,
}

impl RetentionCleanupJob {
    pub fn new(interval: Duration, run_after_ingest: bool) -> Self {
        Self {
            interval,
            run_after_ingest,
        }
    }
}

impl BackgroundJob for RetentionCleanupJob {
    fn id(&self) -> &'static str {
        "retention_cleanup"
    }

    fn name(&self) -> &'static str {
        "Retention Cleanup"
    }

    fn description(&self) -> &'static str {
        "Evict old local copies while storage is over its size ceiling"
    }

    fn schedule(&self) -> JobSchedule {
        let hooks = if self.run_after_ingest {
            vec![HookEvent::OnIngest]
        } else {
            vec![]
        };
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks,
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let result = ctx.index.cleanup(&ctx.cleanup_options);

        if result.files_removed > 0 {
            info!(
                "Retention cleanup removed {} files ({}), freed {:#}",
                result.files_removed,
                result.removed_titles.join(", "),
                byte_unit::Byte::from(result.bytes_freed)
            );
        } else {
            info!(
                "Retention cleanup: nothing to evict ({} candidates)",
                result.candidates_considered
            );
        }

        for error in &result.errors {
            warn!(
                "Retention cleanup error for {:?}: {}",
                error.retrieval_id, error.message
            );
        }

        Ok(())
    }
}
