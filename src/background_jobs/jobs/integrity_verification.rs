//! Integrity verification background job.
//!
//! Re-checks every index entry against the storage root so that playback
//! resolution stops pointing at files that disappeared out of band.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use std::time::Duration;
use tracing::{info, warn};

pub struct IntegrityVerificationJob {
    interval: Duration,
}

impl IntegrityVerificationJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackgroundJob for IntegrityVerificationJob {
    fn id(&self) -> &'static str {
        "integrity_verification"
    }

    fn name(&self) -> &'static str {
        "Integrity Verification"
    }

    fn description(&self) -> &'static str {
        "Verify indexed files against disk and fix availability"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Corrections are committed one batch at a time, the next run picks up the rest.
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = ctx.index.verify_integrity();

        info!(
            "Integrity sweep complete: checked={}, valid={}, missing={}, corrupt={}, orphaned={}, duration={}ms",
            report.checked,
            report.valid,
            report.missing,
            report.corrupt,
            report.orphaned,
            report.scan_duration_ms
        );

        if !report.is_clean() {
            for fix in &report.fixes {
                info!("  fix: {}", fix);
            }
        }
        for error in &report.errors {
            warn!("  error: {}", error.message);
        }

        Ok(())
    }
}
