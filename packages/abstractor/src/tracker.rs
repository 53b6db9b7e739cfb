//! Background task that follows one job to a terminal status.
//!
//! ```text
//! PushActive ──feed error / closed early──► PollActive { attempts }
//!     │                                         │
//!     └──────── terminal snapshot ─────────► Terminal ◄── budget spent / NotFound
//! ```
//!
//! Cancellation is checked around every await; a cancelled tracker stops
//! without touching state, and a tracker whose generation is stale finds its
//! updates rejected by [`Shared::update`].

use std::sync::Arc;

use abstractor_client::{ApiError, JobId, ProgressEvent};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::Shared;
use crate::reconcile::{apply_snapshot, fail, push_log, Applied};
use crate::types::{format_interval, ErrorCode, ErrorDetail, LogLevel, CONNECTION_LOG_STEP};

/// Tracker state. Not visible outside the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedMode {
    PushActive,
    PollActive { attempts: u32 },
    Terminal,
}

/// Follow `job_id` until it resolves, the budget runs out, or `cancel` fires.
pub(crate) async fn run(
    shared: Arc<Shared>,
    job_id: JobId,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut mode = FeedMode::PushActive;

    loop {
        mode = match mode {
            FeedMode::PushActive => tokio::select! {
                _ = cancel.cancelled() => FeedMode::Terminal,
                next = follow_feed(&shared, &job_id, generation) => next,
            },
            FeedMode::PollActive { attempts } => tokio::select! {
                _ = cancel.cancelled() => FeedMode::Terminal,
                next = poll_once(&shared, &job_id, generation, attempts) => next,
            },
            FeedMode::Terminal => break,
        };
    }

    debug!(job_id = %job_id, generation, cancelled = cancel.is_cancelled(), "Tracker stopped");
}

/// Consume the push feed. Returns the next mode.
async fn follow_feed(shared: &Shared, job_id: &JobId, generation: u64) -> FeedMode {
    let mut feed = match shared.gateway.open_progress_feed(job_id).await {
        Ok(feed) => feed,
        Err(e) => return fall_back(shared, job_id, generation, &e.to_string()),
    };

    let connected = shared.update(generation, |state, stamp| {
        push_log(
            state,
            stamp,
            CONNECTION_LOG_STEP,
            LogLevel::Info,
            "Connected to live progress feed",
            None,
        );
    });
    if connected.is_none() {
        return FeedMode::Terminal;
    }

    while let Some(event) = feed.next().await {
        match event {
            Ok(ProgressEvent::Snapshot(snapshot)) => {
                let applied = shared.update(generation, |state, stamp| {
                    apply_snapshot(state, stamp, snapshot)
                });
                match applied {
                    None => return FeedMode::Terminal,
                    Some(applied) if applied.is_terminal() => return FeedMode::Terminal,
                    Some(_) => {}
                }
            }
            Ok(ProgressEvent::Closed { status }) => {
                debug!(job_id = %job_id, status = ?status, "Server closed progress feed");
                break;
            }
            Ok(ProgressEvent::StreamError { message }) => {
                return fall_back(shared, job_id, generation, &message);
            }
            Err(e) => return fall_back(shared, job_id, generation, &e.to_string()),
        }
    }

    fall_back(
        shared,
        job_id,
        generation,
        "progress feed closed before the job finished",
    )
}

fn fall_back(shared: &Shared, job_id: &JobId, generation: u64, reason: &str) -> FeedMode {
    warn!(job_id = %job_id, reason, "Progress feed failed, falling back to polling");

    let interval = format_interval(shared.config.poll_interval);
    let logged = shared.update(generation, |state, stamp| {
        push_log(
            state,
            stamp,
            CONNECTION_LOG_STEP,
            LogLevel::Warning,
            format!(
                "{}: live updates unavailable, checking status every {}",
                ErrorCode::FeedError,
                interval
            ),
            Some(reason.to_string()),
        );
    });

    match logged {
        Some(()) => FeedMode::PollActive { attempts: 0 },
        None => FeedMode::Terminal,
    }
}

/// One status poll, followed by the inter-poll delay when the job is still
/// running. Returns the next mode.
async fn poll_once(shared: &Shared, job_id: &JobId, generation: u64, attempts: u32) -> FeedMode {
    let attempt = attempts + 1;
    let max = shared.config.max_poll_attempts.max(1);

    match shared.gateway.poll_status(job_id).await {
        Ok(snapshot) => {
            let applied =
                shared.update(generation, |state, stamp| apply_snapshot(state, stamp, snapshot));
            match applied {
                None => return FeedMode::Terminal,
                Some(applied) if applied.is_terminal() => return FeedMode::Terminal,
                Some(Applied::Ignored) => {
                    debug!(job_id = %job_id, attempt, "Status poll ignored");
                }
                Some(_) => debug!(job_id = %job_id, attempt, max, "Status poll applied"),
            }
        }
        Err(ApiError::NotFound(message)) => {
            warn!(job_id = %job_id, "Job no longer exists on the server");
            shared.update(generation, |state, stamp| {
                let detail = ErrorDetail::server(
                    CONNECTION_LOG_STEP,
                    format!("Job {} not found: {}", job_id, message),
                    stamp.now,
                );
                fail(state, stamp, detail);
            });
            return FeedMode::Terminal;
        }
        Err(e) => {
            warn!(job_id = %job_id, attempt, max, error = %e, "Status check failed");
            let logged = shared.update(generation, |state, stamp| {
                push_log(
                    state,
                    stamp,
                    CONNECTION_LOG_STEP,
                    LogLevel::Warning,
                    format!("Status check failed (attempt {}/{})", attempt, max),
                    Some(e.user_message()),
                );
            });
            if logged.is_none() {
                return FeedMode::Terminal;
            }
        }
    }

    if attempt >= max {
        info!(job_id = %job_id, attempts = attempt, "Polling budget exhausted");
        let interval = shared.config.poll_interval;
        shared.update(generation, |state, stamp| {
            let step = state.job.as_ref().and_then(|j| j.current_step()).map(|s| s.id);
            let detail = ErrorDetail::timeout(step, attempt, interval, stamp.now);
            fail(state, stamp, detail);
        });
        return FeedMode::Terminal;
    }

    tokio::time::sleep(shared.config.poll_interval).await;
    FeedMode::PollActive { attempts: attempt }
}
