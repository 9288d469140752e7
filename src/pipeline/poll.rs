//! Bounded status polling for asynchronous PDF conversions.
//!
//! The loop sleeps `interval`, asks the adapter for the job status, and stops
//! as soon as every requested format is terminal (`completed` or `error`).
//! `processing` and unrecognised states keep it going until `max_attempts`
//! polls have been spent, at which point the run fails with
//! [`MathOcrError::Timeout`]. The cancellation token is checked once per
//! cycle and also interrupts the sleep.

use crate::client::{JobState, JobStatus, PdfAdapter};
use crate::error::MathOcrError;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Interval and attempt bound for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// How the loop ended, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Every requested format is terminal.
    Finished { status: JobStatus, attempts: u32 },
    /// The token was cancelled between polls.
    Cancelled { attempts: u32 },
}

/// True when polling can stop for `formats`.
pub fn all_terminal(status: &JobStatus, formats: &[String]) -> bool {
    if formats.is_empty() {
        return matches!(status.state, JobState::Completed | JobState::Error);
    }
    formats.iter().all(|f| {
        status
            .per_format
            .get(f)
            .is_some_and(|state| state.is_terminal())
    })
}

/// Poll `job_id` until all `formats` are terminal, attempts run out, or
/// `cancel` fires. `on_attempt` sees every status received.
pub async fn poll_until_terminal<F>(
    adapter: &dyn PdfAdapter,
    job_id: &str,
    formats: &[String],
    settings: PollSettings,
    cancel: &CancellationToken,
    mut on_attempt: F,
) -> Result<PollOutcome, MathOcrError>
where
    F: FnMut(u32, &JobStatus),
{
    info!(
        "Polling job {} for {:?} (every {:?}, at most {} times)",
        job_id, formats, settings.interval, settings.max_attempts
    );

    for attempt in 1..=settings.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Job {}: polling cancelled after {} attempts", job_id, attempt - 1);
                return Ok(PollOutcome::Cancelled { attempts: attempt - 1 });
            }
            _ = sleep(settings.interval) => {}
        }
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled {
                attempts: attempt - 1,
            });
        }

        let status = adapter.check_status(job_id, formats).await?;
        on_attempt(attempt, &status);
        debug!(
            "Job {}: attempt {}/{} state {:?} ({:?}% done)",
            job_id, attempt, settings.max_attempts, status.state, status.percent_done
        );

        if all_terminal(&status, formats) {
            return Ok(PollOutcome::Finished {
                status,
                attempts: attempt,
            });
        }
    }

    Err(MathOcrError::Timeout {
        job_id: job_id.to_string(),
        attempts: settings.max_attempts,
        interval_ms: settings.interval.as_millis() as u64,
    })
}
